// Swerve drive core for a four-module chassis
//
// Provides:
// - Swerve kinematics (chassis velocity <-> module angle/speed)
// - Per-module closed-loop control, angle optimization and calibration
// - Gyro + wheel odometry
// - Drivetrain coordinator owning all of the above
// - Hardware capability traits and a simulated rig

mod drivetrain;
pub mod geometry;
pub mod hardware;
pub mod kinematics;
pub mod module;
pub mod odometry;
pub mod sim;

pub use drivetrain::{CalibrationReport, Corner, Drivetrain};
pub use geometry::{ChassisVelocity, ModuleGeometry, ModuleState, Pose2D};
pub use hardware::{HardwareError, ModuleHardware, TelemetryBuffer, TelemetrySink};
pub use kinematics::{NUM_MODULES, SwerveKinematics};
pub use module::{DriveOutputMode, SwerveModule};
pub use odometry::SwerveOdometry;
