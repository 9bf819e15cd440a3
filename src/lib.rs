pub mod config;
pub mod drive;
pub mod error;
pub mod messages;
pub mod runtime;

pub use error::{DriveError, Result};
