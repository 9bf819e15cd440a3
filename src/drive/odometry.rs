// Dead-reckoning pose estimate from wheel states and the gyro
//
// The gyro is authoritative for heading; wheels only provide translation,
// since wheel-derived rotation drifts with slip.

use tracing::debug;

use super::geometry::{ModuleState, Pose2D, Twist2D, wrap_angle};
use super::kinematics::{NUM_MODULES, SwerveKinematics};

/// Running pose estimate, created already tracking
#[derive(Debug, Clone)]
pub struct SwerveOdometry {
    kinematics: SwerveKinematics,
    pose: Pose2D,
    /// Added to raw gyro readings to get field heading
    gyro_offset: f64,
    /// Last raw gyro reading, reused when a sample is dropped
    last_gyro: f64,
}

impl SwerveOdometry {
    /// Start tracking from `initial_pose`, given the gyro reading (radians) at
    /// that moment.
    pub fn new(kinematics: SwerveKinematics, gyro_reading: f64, initial_pose: Pose2D) -> Self {
        Self {
            kinematics,
            pose: initial_pose,
            gyro_offset: initial_pose.heading - gyro_reading,
            last_gyro: gyro_reading,
        }
    }

    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    pub fn heading(&self) -> f64 {
        self.pose.heading
    }

    /// Raw gyro reading (radians) from the last update or reset
    pub fn last_gyro(&self) -> f64 {
        self.last_gyro
    }

    /// Re-seed the estimate, e.g. from an external localization fix
    pub fn reset(&mut self, pose: Pose2D, gyro_reading: f64) {
        self.pose = pose;
        self.gyro_offset = pose.heading - gyro_reading;
        self.last_gyro = gyro_reading;
    }

    /// Integrate one period of `dt` seconds.
    ///
    /// `gyro_reading` is the raw gyro heading in radians, or `None` if the
    /// sample was lost, in which case the last reading is used.
    pub fn update(
        &mut self,
        gyro_reading: Option<f64>,
        states: &[ModuleState; NUM_MODULES],
        dt: f64,
    ) -> Pose2D {
        let gyro = gyro_reading.unwrap_or(self.last_gyro);
        self.last_gyro = gyro;

        let heading = wrap_angle(gyro + self.gyro_offset);
        let chassis = self.kinematics.to_chassis_velocity(states);

        let twist = Twist2D {
            dx: chassis.vx * dt,
            dy: chassis.vy * dt,
            dtheta: wrap_angle(heading - self.pose.heading),
        };

        let mut next = self.pose.exp(twist);
        next.heading = heading;
        self.pose = next;

        debug!(
            "Odometry: x={:.3}, y={:.3}, heading={:.1}°",
            next.x,
            next.y,
            next.heading.to_degrees()
        );
        next
    }
}
