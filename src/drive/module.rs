// Closed-loop control of a single swerve module
//
// The rotation motor runs position control on its relative encoder, which is
// aligned once to the absolute encoder by `calibrate`. The drive motor runs
// either calibrated velocity control or scaled open-loop output.

use std::f64::consts::{FRAC_PI_2, PI};

use tracing::{debug, info};

use super::geometry::{ModuleState, wrap_angle};
use super::hardware::{HardwareError, ModuleHardware};
use crate::config::DrivetrainConfig;
use crate::error::{DriveError, Result};

/// How the drive motor should be commanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutputMode {
    /// Closed-loop velocity with feedforward, requires calibration
    Velocity,
    /// Speed scaled to percent output, always available
    OpenLoop,
}

/// Shortest way to reach `target_angle` from `current_angle`.
///
/// If the wheel would have to turn more than 90°, it is cheaper to point the
/// opposite way and reverse the drive. The returned angle is continuous with
/// `current_angle` (not wrapped), so `|angle - current_angle| <= π/2`.
pub fn optimize(current_angle: f64, target_angle: f64, target_speed: f64) -> (f64, f64) {
    let delta = wrap_angle(target_angle - current_angle);

    if delta > FRAC_PI_2 {
        (current_angle + delta - PI, -target_speed)
    } else if delta < -FRAC_PI_2 {
        (current_angle + delta + PI, -target_speed)
    } else {
        (current_angle + delta, target_speed)
    }
}

/// Unit conversions and limits shared by all modules
#[derive(Debug, Clone, Copy)]
struct ModuleParams {
    rotation_ticks_per_rev: f64,
    drive_ticks_per_meter: f64,
    min_output: f64,
    max_drive_velocity: f64,
    voltage_comp: f64,
    drive_ks: f64,
    drive_kv: f64,
}

/// One swerve module: steering and drive motors plus absolute encoder
pub struct SwerveModule {
    id: usize,
    hardware: ModuleHardware,
    params: ModuleParams,
    mechanical_zero_deg: f64,
    drive_inverted: bool,
    calibrated: bool,
    last_target: ModuleState,
}

impl SwerveModule {
    pub fn new(id: usize, hardware: ModuleHardware, config: &DrivetrainConfig) -> Self {
        let module = &config.modules[id];
        Self {
            id,
            hardware,
            params: ModuleParams {
                rotation_ticks_per_rev: config.rotation_ticks_per_rev(),
                drive_ticks_per_meter: config.drive_ticks_per_meter(),
                min_output: config.min_output,
                max_drive_velocity: config.max_drive_velocity,
                voltage_comp: config.voltage_comp,
                drive_ks: config.drive_ks,
                drive_kv: config.drive_kv,
            },
            mechanical_zero_deg: module.mechanical_zero_deg,
            drive_inverted: module.drive_inverted,
            calibrated: false,
            last_target: ModuleState::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Last optimized target sent to the motors (continuous angle)
    pub fn last_target(&self) -> ModuleState {
        self.last_target
    }

    /// Steering angle from the relative encoder, not wrapped
    fn continuous_angle(&self) -> f64 {
        self.hardware.rotation.read_position() as f64 / self.params.rotation_ticks_per_rev
            * 2.0
            * PI
    }

    fn angle_to_ticks(&self, angle: f64) -> f64 {
        angle / (2.0 * PI) * self.params.rotation_ticks_per_rev
    }

    fn drive_sign(&self) -> f64 {
        if self.drive_inverted { -1.0 } else { 1.0 }
    }

    /// Measured angle in (-π, π] and wheel speed in m/s
    pub fn measured_state(&self) -> ModuleState {
        let speed = self.hardware.drive.read_velocity() / self.params.drive_ticks_per_meter
            * self.drive_sign();
        ModuleState::new(wrap_angle(self.continuous_angle()), speed)
    }

    /// Command a new angle and speed.
    ///
    /// Velocity mode is refused on an uncalibrated module and nothing is sent
    /// to the motors. Open-loop mode is always accepted.
    pub fn set_target(&mut self, target: ModuleState, mode: DriveOutputMode) -> Result<()> {
        if mode == DriveOutputMode::Velocity && !self.calibrated {
            return Err(DriveError::Uncalibrated { module: self.id });
        }

        let (angle, speed) = optimize(self.continuous_angle(), target.angle, target.speed);
        let position = self.angle_to_ticks(angle);
        self.hardware.rotation.set_position_target(position);

        let p = self.params;
        let fraction = speed / p.max_drive_velocity;
        if fraction.abs() < p.min_output {
            self.hardware.drive.set_percent_output(0.0);
            self.last_target = ModuleState::new(angle, 0.0);
            return Ok(());
        }

        let sign = self.drive_sign();
        match mode {
            DriveOutputMode::Velocity => {
                let ticks_per_sec = speed * p.drive_ticks_per_meter;
                let feedforward =
                    (p.drive_ks * speed.signum() + p.drive_kv * speed) / p.voltage_comp;
                self.hardware
                    .drive
                    .set_velocity_target(ticks_per_sec * sign, feedforward * sign);
            }
            DriveOutputMode::OpenLoop => {
                self.hardware
                    .drive
                    .set_percent_output(fraction.clamp(-1.0, 1.0) * sign);
            }
        }

        debug!(
            "Module {} target: angle={:.1}°, speed={:.2} m/s ({:?})",
            self.id,
            angle.to_degrees(),
            speed,
            mode
        );
        self.last_target = ModuleState::new(angle, speed);
        Ok(())
    }

    /// Zero the drive output, leaving the steering where it is
    pub fn stop(&mut self) {
        self.hardware.drive.set_percent_output(0.0);
        self.last_target.speed = 0.0;
    }

    /// Align the relative steering encoder to the absolute encoder.
    ///
    /// Returns the reference written to the relative encoder, in ticks. On a
    /// sensor fault, including a NaN or infinite reading, the module is left
    /// exactly as it was.
    pub fn calibrate(&mut self) -> Result<i64> {
        let absolute = self
            .hardware
            .absolute
            .read_absolute_degrees()
            .and_then(|degrees| {
                if degrees.is_finite() {
                    Ok(degrees)
                } else {
                    Err(HardwareError::InvalidReading {
                        device: format!("absolute encoder {}", self.id),
                        value: degrees,
                    })
                }
            })
            .map_err(|source| DriveError::SensorFault {
                module: self.id,
                source,
            })?;

        let ticks = calibration_ticks(
            absolute,
            self.mechanical_zero_deg,
            self.params.rotation_ticks_per_rev,
        );
        self.hardware.rotation.set_position(ticks);
        self.calibrated = true;

        info!(
            "Module {} calibrated: absolute={:.3}°, zero={:.3}°, reference={} ticks",
            self.id, absolute, self.mechanical_zero_deg, ticks
        );
        Ok(ticks)
    }
}

/// Relative encoder reference for an absolute reading `absolute_deg`.
///
/// `(absolute - zero) * ticks_per_rev / 360 * gear_ratio`, with the encoder
/// resolution and gear ratio folded into `rotation_ticks_per_rev`.
pub fn calibration_ticks(absolute_deg: f64, zero_deg: f64, rotation_ticks_per_rev: f64) -> i64 {
    ((absolute_deg - zero_deg) / 360.0 * rotation_ticks_per_rev).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::hardware::MotorController;
    use crate::drive::sim::{MotorCommand, SimRig};

    const EPS: f64 = 1e-9;

    fn module(id: usize) -> (SwerveModule, SimRig) {
        let config = DrivetrainConfig::default();
        let rig = SimRig::new(&config);
        let (hardware, _gyro) = rig.hardware();
        let hardware = hardware.into_iter().nth(id).unwrap();
        (SwerveModule::new(id, hardware, &config), rig)
    }

    #[test]
    fn test_optimize_bounded_by_quarter_turn() {
        for current_deg in (-720..=720).step_by(7) {
            for target_deg in (-180..=180).step_by(5) {
                let current = (current_deg as f64).to_radians();
                let target = (target_deg as f64).to_radians();
                let (angle, speed) = optimize(current, target, 1.0);

                assert!(
                    (angle - current).abs() <= FRAC_PI_2 + EPS,
                    "current={}°, target={}° moved {}°",
                    current_deg,
                    target_deg,
                    (angle - current).to_degrees()
                );
                assert!((speed.abs() - 1.0).abs() < EPS);

                // The wheel velocity vector is unchanged by the flip
                let (sx, sy) = (speed * angle.cos(), speed * angle.sin());
                assert!((sx - target.cos()).abs() < 1e-9);
                assert!((sy - target.sin()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_optimize_flips_reverse() {
        let (angle, speed) = optimize(0.0, PI, 2.0);
        assert!(angle.abs() < EPS, "Should stay at 0 and reverse");
        assert_eq!(speed, -2.0);
    }

    #[test]
    fn test_optimize_keeps_small_turn() {
        let (angle, speed) = optimize(0.0, 80f64.to_radians(), 1.0);
        assert!((angle - 80f64.to_radians()).abs() < EPS);
        assert_eq!(speed, 1.0);
    }

    #[test]
    fn test_optimize_wraps_across_turns() {
        // Wheel has spun two full turns plus 10°; target 20° is a 10° move
        let current = (720.0f64 + 10.0).to_radians();
        let (angle, speed) = optimize(current, 20f64.to_radians(), 1.0);
        assert!((angle - (730.0f64 + 10.0).to_radians()).abs() < 1e-9);
        assert_eq!(speed, 1.0);
    }

    #[test]
    fn test_calibration_ticks_formula() {
        let per_rev = 4096.0 * 12.8;
        assert_eq!(calibration_ticks(263.935547, 263.935547, per_rev), 0);
        // A quarter turn of the wheel
        assert_eq!(calibration_ticks(100.0, 10.0, per_rev), 13107);
        // (A - Z) * T / 360 * G for A=10, Z=109.951172
        let expected = ((10.0 - 109.951172) * 4096.0 / 360.0 * 12.8f64).round() as i64;
        assert_eq!(calibration_ticks(10.0, 109.951172, per_rev), expected);
    }

    #[test]
    fn test_calibrate_sets_reference() {
        let (mut module, rig) = module(0);
        rig.absolute[0].set_degrees(263.935547 + 90.0);
        rig.rotation[0].set_measured(999_999, 0.0);

        let ticks = module.calibrate().unwrap();
        assert_eq!(ticks, 13107);
        assert_eq!(rig.rotation[0].read_position(), 13107);
        assert!(module.is_calibrated());
        assert!((module.measured_state().angle - FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn test_calibrate_sensor_fault_leaves_module_untouched() {
        let (mut module, rig) = module(1);
        rig.absolute[1].set_fault(true);
        rig.rotation[1].set_measured(500, 0.0);

        let err = module.calibrate().unwrap_err();
        assert!(matches!(err, DriveError::SensorFault { module: 1, .. }));
        assert!(!module.is_calibrated());
        assert_eq!(rig.rotation[1].read_position(), 500);
    }

    #[test]
    fn test_calibrate_rejects_non_finite_reading() {
        let (mut module, rig) = module(0);
        rig.rotation[0].set_measured(250, 0.0);

        for reading in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            rig.absolute[0].set_degrees(reading);
            let err = module.calibrate().unwrap_err();
            assert!(
                matches!(
                    err,
                    DriveError::SensorFault {
                        module: 0,
                        source: HardwareError::InvalidReading { .. }
                    }
                ),
                "reading {} gave {:?}",
                reading,
                err
            );
        }
        assert!(!module.is_calibrated());
        assert_eq!(rig.rotation[0].read_position(), 250);
    }

    #[test]
    fn test_uncalibrated_refuses_velocity_mode() {
        let (mut module, rig) = module(2);
        let result = module.set_target(ModuleState::new(0.3, 1.0), DriveOutputMode::Velocity);
        assert!(matches!(result, Err(DriveError::Uncalibrated { module: 2 })));
        assert_eq!(rig.drive[2].command(), MotorCommand::None);
        assert_eq!(rig.rotation[2].command(), MotorCommand::None);
    }

    #[test]
    fn test_uncalibrated_allows_open_loop() {
        let (mut module, rig) = module(2);
        module
            .set_target(ModuleState::new(0.0, 1.5), DriveOutputMode::OpenLoop)
            .unwrap();
        assert_eq!(rig.drive[2].command(), MotorCommand::Percent(0.5));
    }

    #[test]
    fn test_velocity_mode_units() {
        let (mut module, rig) = module(0);
        module.calibrate().unwrap();
        module
            .set_target(ModuleState::new(0.0, 1.0), DriveOutputMode::Velocity)
            .unwrap();

        let config = DrivetrainConfig::default();
        match rig.drive[0].command() {
            MotorCommand::Velocity {
                ticks_per_sec,
                feedforward,
            } => {
                assert!((ticks_per_sec - config.drive_ticks_per_meter()).abs() < 1e-6);
                let expected = (config.drive_ks + config.drive_kv) / config.voltage_comp;
                assert!((feedforward - expected).abs() < EPS);
            }
            other => panic!("Expected velocity command, got {:?}", other),
        }

        let measured = module.measured_state();
        assert!((measured.speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_deadband_zeroes_output() {
        let (mut module, rig) = module(3);
        module.calibrate().unwrap();

        // 0.01 m/s is well under 1% of the 3 m/s maximum
        module
            .set_target(ModuleState::new(0.5, 0.01), DriveOutputMode::Velocity)
            .unwrap();
        assert_eq!(rig.drive[3].command(), MotorCommand::Percent(0.0));

        module
            .set_target(ModuleState::new(0.5, -0.02), DriveOutputMode::OpenLoop)
            .unwrap();
        assert_eq!(rig.drive[3].command(), MotorCommand::Percent(0.0));
        assert_eq!(module.last_target().speed, 0.0);
    }

    #[test]
    fn test_reverse_target_flips_instead_of_turning() {
        let (mut module, rig) = module(0);
        module.calibrate().unwrap();
        module
            .set_target(ModuleState::new(PI, 1.5), DriveOutputMode::OpenLoop)
            .unwrap();

        // Steering stays at 0 ticks, drive runs backwards
        assert_eq!(rig.rotation[0].command(), MotorCommand::Position(0.0));
        assert_eq!(rig.drive[0].command(), MotorCommand::Percent(-0.5));
    }

    #[test]
    fn test_inverted_drive() {
        let mut config = DrivetrainConfig::default();
        config.modules[1].drive_inverted = true;
        let rig = SimRig::new(&config);
        let (hardware, _gyro) = rig.hardware();
        let hardware = hardware.into_iter().nth(1).unwrap();
        let mut module = SwerveModule::new(1, hardware, &config);

        module
            .set_target(ModuleState::new(0.0, 1.5), DriveOutputMode::OpenLoop)
            .unwrap();
        assert_eq!(rig.drive[1].command(), MotorCommand::Percent(-0.5));
        // Measurement is flipped back into the module frame
        assert!((module.measured_state().speed - 1.5).abs() < 1e-9);
    }
}
