// Define message types for the runtime

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::drive::{ChassisVelocity, Pose2D};

// Drive command from teleop/scripts -> runtime
// Interpreted field- or robot-centric depending on the drivetrain's mode flag
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub vx: f64,    // m/s
    pub vy: f64,    // m/s
    pub omega: f64, // rad/s
    // Skip velocity control and drive with scaled percent output
    #[serde(default)]
    pub open_loop: bool,
}

impl From<&DriveCommand> for ChassisVelocity {
    fn from(cmd: &DriveCommand) -> Self {
        ChassisVelocity::new(cmd.vx, cmd.vy, cmd.omega)
    }
}

/// One-shot requests that change drivetrain state outside of driving
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ControlRequest {
    ToggleFieldCentric,
    Calibrate,
    ZeroHeading,
    ResetPose { x: f64, y: f64, heading: f64 },
}

impl ControlRequest {
    /// Pose carried by a `ResetPose` request
    pub fn pose(&self) -> Option<Pose2D> {
        match *self {
            ControlRequest::ResetPose { x, y, heading } => Some(Pose2D::new(x, y, heading)),
            _ => None,
        }
    }
}

/// Key/value snapshot published once per cycle
pub type Telemetry = BTreeMap<String, f64>;

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    /// A module is uncalibrated; drive commands run open-loop
    OpenLoopFallback,
    /// The last calibration could not read every absolute encoder
    Degraded,
}
