// Drivetrain coordinator: four swerve modules, kinematics, odometry and gyro
//
// This is the only mutation entry point for the drive. The runtime owns it and
// calls it once per period; nothing here blocks.

use tracing::{info, warn};

use super::geometry::{ChassisVelocity, ModuleState, Pose2D, wrap_angle};
use super::hardware::{HeadingSensor, ModuleHardware, TelemetrySink};
use super::kinematics::{NUM_MODULES, SwerveKinematics, desaturate};
use super::module::{DriveOutputMode, SwerveModule};
use super::odometry::SwerveOdometry;
use crate::config::DrivetrainConfig;
use crate::error::{DriveError, Result};

/// Module positions, in the order modules are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
}

/// Outcome of calibrating every module
#[derive(Debug)]
pub struct CalibrationReport {
    /// Reference ticks written per module, or why it was skipped
    pub results: [std::result::Result<i64, DriveError>; NUM_MODULES],
}

impl CalibrationReport {
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }

    /// Ids of the modules whose calibration failed
    pub fn failed(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct Drivetrain {
    config: DrivetrainConfig,
    modules: [SwerveModule; NUM_MODULES],
    kinematics: SwerveKinematics,
    odometry: SwerveOdometry,
    gyro: Box<dyn HeadingSensor>,
    field_centric: bool,
    desired: [ModuleState; NUM_MODULES],
}

/// Gyro heading in radians, if the sensor answered
fn read_gyro(gyro: &mut dyn HeadingSensor) -> Option<f64> {
    match gyro.read_heading_degrees() {
        Ok(degrees) => Some(degrees.to_radians()),
        Err(e) => {
            warn!("Heading sensor read failed, holding last heading: {}", e);
            None
        }
    }
}

impl Drivetrain {
    /// Build the drivetrain and start odometry at the origin.
    ///
    /// Modules start uncalibrated; call [`Drivetrain::calibrate_all`] before
    /// commanding velocity mode.
    pub fn new(
        config: DrivetrainConfig,
        hardware: [ModuleHardware; NUM_MODULES],
        mut gyro: Box<dyn HeadingSensor>,
    ) -> Result<Self> {
        config.validate()?;
        let kinematics = SwerveKinematics::rectangle(config.length, config.width)?;

        gyro.zero();
        let initial = read_gyro(gyro.as_mut()).unwrap_or(0.0);
        let odometry = SwerveOdometry::new(kinematics.clone(), initial, Pose2D::default());

        let mut next_id = 0;
        let modules = hardware.map(|hw| {
            let module = SwerveModule::new(next_id, hw, &config);
            next_id += 1;
            module
        });

        info!(
            "Drivetrain ready: {:.4} m x {:.4} m, field-centric={}",
            config.length, config.width, config.field_centric
        );

        Ok(Self {
            field_centric: config.field_centric,
            config,
            modules,
            kinematics,
            odometry,
            gyro,
            desired: [ModuleState::default(); NUM_MODULES],
        })
    }

    /// Command a chassis velocity.
    ///
    /// Linear and angular speed are clamped to the configured maxima. When
    /// `field_centric` is set, `desired` is taken in the field frame and
    /// rotated into the robot frame by the current heading. In velocity mode
    /// the whole command is refused if any module is uncalibrated.
    ///
    /// Wheels with zero speed keep their previous steering angle.
    ///
    /// Returns the module states that were dispatched (before per-module
    /// angle optimization).
    pub fn drive(
        &mut self,
        desired: ChassisVelocity,
        field_centric: bool,
        mode: DriveOutputMode,
    ) -> Result<[ModuleState; NUM_MODULES]> {
        if mode == DriveOutputMode::Velocity {
            if let Some(m) = self.modules.iter().find(|m| !m.is_calibrated()) {
                return Err(DriveError::Uncalibrated { module: m.id() });
            }
        }

        let mut states = self.module_states_for(desired, field_centric);
        // A stopped wheel has no direction; hold its steering where it was
        for (state, module) in states.iter_mut().zip(&self.modules) {
            if state.speed == 0.0 {
                state.angle = wrap_angle(module.last_target().angle);
            }
        }
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_target(state, mode)?;
        }

        self.desired = states;
        Ok(states)
    }

    /// Kinematics for a command without touching the motors
    pub fn module_states_for(
        &self,
        desired: ChassisVelocity,
        field_centric: bool,
    ) -> [ModuleState; NUM_MODULES] {
        let max_v = self.config.max_drive_velocity;
        let max_w = self.config.max_angular_velocity;

        let mut velocity = desired;
        let linear = velocity.vx.hypot(velocity.vy);
        if linear > max_v {
            velocity.vx *= max_v / linear;
            velocity.vy *= max_v / linear;
        }
        velocity.omega = velocity.omega.clamp(-max_w, max_w);

        if field_centric {
            velocity = velocity.rotated(-self.heading());
        }

        let mut states = self.kinematics.to_module_states(velocity);
        desaturate(&mut states, max_v);
        states
    }

    /// Zero drive output on every module
    pub fn stop(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
        self.desired = [ModuleState::default(); NUM_MODULES];
    }

    pub fn toggle_field_centric(&mut self) {
        self.field_centric = !self.field_centric;
        info!("Field-centric drive {}", if self.field_centric { "on" } else { "off" });
    }

    pub fn is_field_centric(&self) -> bool {
        self.field_centric
    }

    pub fn pose(&self) -> Pose2D {
        self.odometry.pose()
    }

    /// Field heading in radians (counter-clockwise positive)
    pub fn heading(&self) -> f64 {
        self.odometry.heading()
    }

    /// Align every module's steering reference to its absolute encoder.
    ///
    /// A module whose encoder cannot be read is skipped and keeps its
    /// previous alignment; the others are still calibrated.
    pub fn calibrate_all(&mut self) -> CalibrationReport {
        let results = std::array::from_fn(|i| {
            let result = self.modules[i].calibrate();
            if let Err(e) = &result {
                warn!("Calibration skipped: {}", e);
            }
            result
        });

        let report = CalibrationReport { results };
        if report.all_ok() {
            info!("All modules calibrated");
        } else {
            warn!("Calibration incomplete, failed modules: {:?}", report.failed());
        }
        report
    }

    pub fn is_calibrated(&self) -> bool {
        self.modules.iter().all(|m| m.is_calibrated())
    }

    /// Measured state of every module
    pub fn measured_states(&self) -> [ModuleState; NUM_MODULES] {
        std::array::from_fn(|i| self.modules[i].measured_state())
    }

    /// Advance the pose estimate by one period of `dt` seconds
    pub fn update_odometry(&mut self, dt: f64) -> Pose2D {
        let gyro = read_gyro(self.gyro.as_mut());
        let states = self.measured_states();
        self.odometry.update(gyro, &states, dt)
    }

    /// Overwrite the pose estimate. Module calibration is unaffected.
    pub fn reset_pose(&mut self, pose: Pose2D) {
        let gyro = read_gyro(self.gyro.as_mut()).unwrap_or(self.odometry.last_gyro());
        self.odometry.reset(pose, gyro);
        info!(
            "Pose reset to x={:.3}, y={:.3}, heading={:.1}°",
            pose.x,
            pose.y,
            pose.heading.to_degrees()
        );
    }

    /// Make the current direction the new zero heading, keeping position
    pub fn zero_heading(&mut self) {
        let Pose2D { x, y, .. } = self.pose();
        self.reset_pose(Pose2D::new(x, y, 0.0));
    }

    pub fn module(&self, corner: Corner) -> &SwerveModule {
        &self.modules[corner as usize]
    }

    pub fn config(&self) -> &DrivetrainConfig {
        &self.config
    }

    /// Chassis velocity implied by the measured wheel states
    pub fn measured_velocity(&self) -> ChassisVelocity {
        self.kinematics.to_chassis_velocity(&self.measured_states())
    }

    /// Push the current drive state to a telemetry sink
    pub fn publish_telemetry(&self, sink: &mut dyn TelemetrySink) {
        let pose = self.pose();
        sink.publish("Pose x", pose.x);
        sink.publish("Pose y", pose.y);
        sink.publish("Heading", pose.heading.to_degrees());
        sink.publish("Field centric", if self.field_centric { 1.0 } else { 0.0 });

        for (i, (desired, module)) in self.desired.iter().zip(&self.modules).enumerate() {
            let measured = module.measured_state();
            sink.publish(&format!("Desired angle module {}", i), desired.angle.to_degrees());
            sink.publish(&format!("Desired speed module {}", i), desired.speed);
            sink.publish(&format!("Angle module {}", i), measured.angle.to_degrees());
            sink.publish(&format!("Speed module {}", i), measured.speed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::hardware::{MotorController, TelemetryBuffer};
    use crate::drive::sim::{MotorCommand, SimRig};
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-9;

    fn drivetrain() -> (Drivetrain, SimRig) {
        let config = DrivetrainConfig::default();
        let rig = SimRig::new(&config);
        let (hardware, gyro) = rig.hardware();
        (Drivetrain::new(config, hardware, gyro).unwrap(), rig)
    }

    fn assert_states_eq(a: &[ModuleState; 4], b: &[ModuleState; 4]) {
        for (x, y) in a.iter().zip(b) {
            assert!((x.speed - y.speed).abs() < 1e-9, "{:?} != {:?}", a, b);
            assert!((x.angle - y.angle).abs() < 1e-9, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DrivetrainConfig {
            encoder_ticks: 0,
            ..Default::default()
        };
        let rig = SimRig::new(&DrivetrainConfig::default());
        let (hardware, gyro) = rig.hardware();
        assert!(matches!(
            Drivetrain::new(config, hardware, gyro),
            Err(DriveError::Configuration(_))
        ));
    }

    #[test]
    fn test_field_centric_invariance() {
        let (mut dt, rig) = drivetrain();
        rig.gyro.set_degrees(90.0);
        dt.update_odometry(0.02);
        assert!((dt.heading() - FRAC_PI_2).abs() < EPS);

        let field = dt.module_states_for(ChassisVelocity::new(1.0, 0.0, 0.0), true);
        let robot = dt.module_states_for(ChassisVelocity::new(0.0, -1.0, 0.0), false);
        assert_states_eq(&field, &robot);

        for s in field {
            assert!((s.angle + FRAC_PI_2).abs() < EPS, "Wheels should point right");
        }
    }

    #[test]
    fn test_uncalibrated_drive_refused_without_output() {
        let (mut dt, rig) = drivetrain();
        let result = dt.drive(
            ChassisVelocity::new(1.0, 0.0, 0.0),
            false,
            DriveOutputMode::Velocity,
        );
        assert!(matches!(result, Err(DriveError::Uncalibrated { module: 0 })));
        for motor in &rig.drive {
            assert_eq!(motor.command(), MotorCommand::None);
        }

        // Open loop still works for manual recovery
        dt.drive(
            ChassisVelocity::new(1.5, 0.0, 0.0),
            false,
            DriveOutputMode::OpenLoop,
        )
        .unwrap();
        for motor in &rig.drive {
            assert_eq!(motor.command(), MotorCommand::Percent(0.5));
        }
    }

    #[test]
    fn test_calibrate_all_reports_faults() {
        let (mut dt, rig) = drivetrain();
        rig.absolute[2].set_fault(true);
        rig.absolute[0].set_degrees(263.935547);

        let report = dt.calibrate_all();
        assert!(!report.all_ok());
        assert_eq!(report.failed(), vec![2]);
        assert_eq!(*report.results[0].as_ref().unwrap(), 0);
        assert!(!dt.is_calibrated());
        assert!(dt.module(Corner::FrontLeft).is_calibrated());
        assert!(!dt.module(Corner::BackLeft).is_calibrated());

        rig.absolute[2].set_fault(false);
        assert!(dt.calibrate_all().all_ok());
        assert!(dt.is_calibrated());
    }

    #[test]
    fn test_calibrated_drive_and_odometry() {
        let (mut dt, rig) = drivetrain();
        dt.calibrate_all();

        dt.drive(
            ChassisVelocity::new(1.0, 0.0, 0.0),
            false,
            DriveOutputMode::Velocity,
        )
        .unwrap();
        let pose = dt.update_odometry(0.02);
        assert!((pose.x - 0.02).abs() < 1e-9, "x was {}", pose.x);
        assert!(pose.y.abs() < 1e-9);
        assert!(pose.heading.abs() < EPS);

        // Relative encoders stay at zero, the wheels already point forward
        for motor in &rig.rotation {
            assert_eq!(motor.read_position(), 0);
        }
    }

    #[test]
    fn test_speed_clamped_to_maximum() {
        let (dt, _rig) = drivetrain();
        let states = dt.module_states_for(ChassisVelocity::new(10.0, 0.0, 100.0), false);
        for s in states {
            assert!(s.speed <= dt.config().max_drive_velocity + EPS);
        }
    }

    #[test]
    fn test_module_steering_bounded() {
        let (mut dt, rig) = drivetrain();
        dt.calibrate_all();

        // Reversing direction flips the drive, not the steering
        dt.drive(ChassisVelocity::new(0.0, 1.0, 0.0), false, DriveOutputMode::Velocity)
            .unwrap();
        let before = rig.rotation[0].read_position();
        dt.drive(ChassisVelocity::new(0.0, -1.0, 0.0), false, DriveOutputMode::Velocity)
            .unwrap();
        assert_eq!(rig.rotation[0].read_position(), before);

        assert!(dt.module(Corner::FrontLeft).last_target().speed < 0.0);
        assert!((dt.measured_states()[0].angle - FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn test_zero_command_holds_steering() {
        let (mut dt, rig) = drivetrain();
        dt.calibrate_all();

        dt.drive(ChassisVelocity::new(0.0, 1.0, 0.0), false, DriveOutputMode::Velocity)
            .unwrap();
        let steered = rig.rotation[0].read_position();
        assert_ne!(steered, 0);

        // Stopping must not swing the wheels back to straight ahead
        let states = dt
            .drive(ChassisVelocity::default(), false, DriveOutputMode::Velocity)
            .unwrap();
        for (motor, state) in rig.rotation.iter().zip(states) {
            assert_eq!(motor.read_position(), steered);
            assert!((state.angle - FRAC_PI_2).abs() < EPS, "angle was {}", state.angle);
            assert_eq!(state.speed, 0.0);
        }
        assert_eq!(rig.drive[0].command(), MotorCommand::Percent(0.0));
    }

    #[test]
    fn test_gyro_dropout_keeps_cycle_running() {
        let (mut dt, rig) = drivetrain();
        dt.calibrate_all();
        rig.gyro.set_degrees(30.0);
        dt.update_odometry(0.02);

        rig.gyro.set_fault(true);
        dt.drive(ChassisVelocity::new(1.0, 0.0, 0.0), false, DriveOutputMode::Velocity)
            .unwrap();
        let pose = dt.update_odometry(0.02);
        assert!((pose.heading - 30f64.to_radians()).abs() < EPS);
    }

    #[test]
    fn test_reset_pose_and_zero_heading() {
        let (mut dt, rig) = drivetrain();
        rig.gyro.set_degrees(45.0);
        dt.update_odometry(0.02);

        dt.reset_pose(Pose2D::new(2.0, 3.0, PI / 2.0));
        dt.update_odometry(0.02);
        let pose = dt.pose();
        assert!((pose.x - 2.0).abs() < EPS);
        assert!((pose.heading - PI / 2.0).abs() < EPS);

        dt.zero_heading();
        let pose = dt.update_odometry(0.02);
        assert!(pose.heading.abs() < EPS);
        assert!((pose.y - 3.0).abs() < EPS);
    }

    #[test]
    fn test_toggle_field_centric() {
        let (mut dt, _rig) = drivetrain();
        assert!(dt.is_field_centric(), "Field-centric is the default");
        dt.toggle_field_centric();
        assert!(!dt.is_field_centric());
        dt.toggle_field_centric();
        assert!(dt.is_field_centric());
    }

    #[test]
    fn test_telemetry_published() {
        let (mut dt, _rig) = drivetrain();
        dt.drive(ChassisVelocity::new(0.0, 1.0, 0.0), false, DriveOutputMode::OpenLoop)
            .unwrap();

        let mut sink = TelemetryBuffer::new();
        dt.publish_telemetry(&mut sink);
        assert!((sink.get("Desired angle module 3").unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(sink.get("Field centric"), Some(1.0));
        assert!(sink.get("Pose x").is_some());
    }

    #[test]
    fn test_stop_zeroes_drive() {
        let (mut dt, rig) = drivetrain();
        dt.drive(ChassisVelocity::new(1.5, 0.0, 0.0), false, DriveOutputMode::OpenLoop)
            .unwrap();
        dt.stop();
        for motor in &rig.drive {
            assert_eq!(motor.command(), MotorCommand::Percent(0.0));
        }
    }
}
