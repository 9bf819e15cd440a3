// Loop rate, topics, drivetrain configuration
use std::f64::consts::PI;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // chassis velocity commands
pub const TOPIC_CMD_CONTROL: &str = "swerve/cmd/control"; // mode toggles, calibration, pose reset
pub const TOPIC_TELEMETRY: &str = "swerve/state/telemetry"; // per-cycle key/value snapshot
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Per-module mechanical zero of the absolute encoders (degrees)
// Order: front-left, front-right, back-left, back-right
pub const MECHANICAL_ZEROS_DEG: [f64; 4] = [263.935547, 109.951172, 178.330078, 32.255859];

// Drive motor inversion, same order
pub const DRIVE_INVERTED: [bool; 4] = [false, false, false, false];

// Chassis dimensions between wheel contact points (meters)
pub const DT_WIDTH: f64 = 0.5461;
pub const DT_LENGTH: f64 = 0.5969;

pub const DRIVE_GEAR_RATIO: f64 = 6.75;
pub const ROTATION_GEAR_RATIO: f64 = 12.8; // 12.8 motor rotations = 1 wheel rotation
pub const ENCODER_TICKS: u32 = 4096;
pub const WHEEL_DIAMETER: f64 = 4.0 * 0.0254; // 4 inches

pub const MIN_OUTPUT: f64 = 0.01;
pub const MAX_DRIVE_VEL: f64 = 3.0; // m/s
pub const MAX_ANGULAR_VEL: f64 = 2.0 * PI; // rad/s
pub const VOLTAGE_COMP: f64 = 10.0; // volts

// Drive velocity feedforward (volts, volts per m/s)
pub const DRIVE_KS: f64 = 0.2;
pub const DRIVE_KV: f64 = 2.8;

/// Per-module settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Absolute encoder reading (degrees) when the wheel points straight ahead
    pub mechanical_zero_deg: f64,
    #[serde(default)]
    pub drive_inverted: bool,
}

/// Everything the drivetrain needs to know about the robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivetrainConfig {
    pub modules: [ModuleConfig; 4],
    pub width: f64,
    pub length: f64,
    pub drive_gear_ratio: f64,
    pub rotation_gear_ratio: f64,
    pub encoder_ticks: u32,
    pub wheel_diameter: f64,
    pub min_output: f64,
    pub max_drive_velocity: f64,
    pub max_angular_velocity: f64,
    pub voltage_comp: f64,
    pub drive_ks: f64,
    pub drive_kv: f64,
    pub field_centric: bool,
}

impl Default for DrivetrainConfig {
    fn default() -> Self {
        let modules = std::array::from_fn(|i| ModuleConfig {
            mechanical_zero_deg: MECHANICAL_ZEROS_DEG[i],
            drive_inverted: DRIVE_INVERTED[i],
        });

        Self {
            modules,
            width: DT_WIDTH,
            length: DT_LENGTH,
            drive_gear_ratio: DRIVE_GEAR_RATIO,
            rotation_gear_ratio: ROTATION_GEAR_RATIO,
            encoder_ticks: ENCODER_TICKS,
            wheel_diameter: WHEEL_DIAMETER,
            min_output: MIN_OUTPUT,
            max_drive_velocity: MAX_DRIVE_VEL,
            max_angular_velocity: MAX_ANGULAR_VEL,
            voltage_comp: VOLTAGE_COMP,
            drive_ks: DRIVE_KS,
            drive_kv: DRIVE_KV,
            field_centric: true,
        }
    }
}

impl DrivetrainConfig {
    /// Load a config from a JSON file. Missing fields fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DriveError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DriveError::Configuration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the conversions or kinematics meaningless
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("width", self.width),
            ("length", self.length),
            ("drive_gear_ratio", self.drive_gear_ratio),
            ("rotation_gear_ratio", self.rotation_gear_ratio),
            ("wheel_diameter", self.wheel_diameter),
            ("max_drive_velocity", self.max_drive_velocity),
            ("max_angular_velocity", self.max_angular_velocity),
            ("voltage_comp", self.voltage_comp),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DriveError::Configuration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if self.encoder_ticks == 0 {
            return Err(DriveError::Configuration(
                "encoder_ticks must be non-zero".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.min_output) {
            return Err(DriveError::Configuration(format!(
                "min_output must be in [0, 1), got {}",
                self.min_output
            )));
        }

        Ok(())
    }

    /// Rotation motor ticks per wheel revolution
    pub fn rotation_ticks_per_rev(&self) -> f64 {
        self.encoder_ticks as f64 * self.rotation_gear_ratio
    }

    /// Drive motor ticks per meter travelled by the wheel
    pub fn drive_ticks_per_meter(&self) -> f64 {
        self.encoder_ticks as f64 * self.drive_gear_ratio / (PI * self.wheel_diameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DrivetrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_ticks_rejected() {
        let config = DrivetrainConfig {
            encoder_ticks: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DriveError::Configuration(_))
        ));
    }

    #[test]
    fn test_negative_dimension_rejected() {
        let config = DrivetrainConfig {
            width: -0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err(), "Negative width should be rejected");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DrivetrainConfig =
            serde_json::from_str(r#"{ "max_drive_velocity": 2.0, "field_centric": false }"#)
                .unwrap();
        assert_eq!(config.max_drive_velocity, 2.0);
        assert!(!config.field_centric);
        assert_eq!(config.encoder_ticks, ENCODER_TICKS);
        assert_eq!(config.modules[0].mechanical_zero_deg, 263.935547);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DrivetrainConfig::load(Path::new("/nonexistent/swerve.json")).unwrap_err();
        assert!(matches!(err, DriveError::Configuration(_)));
    }

    #[test]
    fn test_drive_ticks_per_meter() {
        let config = DrivetrainConfig::default();
        // One wheel circumference is 6.75 motor turns
        let circumference = PI * config.wheel_diameter;
        let ticks = config.drive_ticks_per_meter() * circumference;
        assert!((ticks - 4096.0 * 6.75).abs() < 1e-6);
    }
}
