// Error types for the drivetrain core

use crate::drive::hardware::HardwareError;

/// Errors surfaced by the drivetrain
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Module {module} is not calibrated, velocity control refused")]
    Uncalibrated { module: usize },

    #[error("Sensor fault on module {module}: {source}")]
    SensorFault {
        module: usize,
        #[source]
        source: HardwareError,
    },
}

pub type Result<T> = std::result::Result<T, DriveError>;
