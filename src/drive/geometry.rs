// Planar value types shared by kinematics, module control and odometry
//
// Conventions: x forward, y left, angles counter-clockwise positive, radians.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// Desired or measured chassis velocity in the robot frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisVelocity {
    pub vx: f64,    // m/s
    pub vy: f64,    // m/s
    pub omega: f64, // rad/s
}

impl ChassisVelocity {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    /// Rotate the linear part by `angle`, leaving omega untouched.
    ///
    /// Field-centric commands are brought into the robot frame with
    /// `rotated(-heading)`.
    pub fn rotated(&self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            vx: self.vx * cos - self.vy * sin,
            vy: self.vx * sin + self.vy * cos,
            omega: self.omega,
        }
    }
}

/// Wheel contact point relative to the rotation center (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleGeometry {
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ModuleGeometry {
    pub fn new(offset_x: f64, offset_y: f64) -> Self {
        Self { offset_x, offset_y }
    }

    /// Rectangular chassis, ordered front-left, front-right, back-left, back-right
    pub fn rectangle(length: f64, width: f64) -> [Self; 4] {
        let (hx, hy) = (length / 2.0, width / 2.0);
        [
            Self::new(hx, hy),
            Self::new(hx, -hy),
            Self::new(-hx, hy),
            Self::new(-hx, -hy),
        ]
    }
}

/// Steering angle (rad) and wheel linear speed (m/s) of one module
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub angle: f64,
    pub speed: f64,
}

impl ModuleState {
    pub fn new(angle: f64, speed: f64) -> Self {
        Self { angle, speed }
    }

    /// Velocity vector of the wheel contact point
    pub fn components(&self) -> (f64, f64) {
        let (sin, cos) = self.angle.sin_cos();
        (self.speed * cos, self.speed * sin)
    }
}

/// Robot pose in the field frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// Body-frame displacement over one period
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist2D {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    /// Apply a body-frame twist using the SE(2) exponential map.
    ///
    /// The robot is assumed to follow a constant-curvature arc over the
    /// period, which is exact for constant wheel velocities.
    pub fn exp(&self, twist: Twist2D) -> Self {
        let Twist2D { dx, dy, dtheta } = twist;
        let (sin_t, cos_t) = dtheta.sin_cos();

        let (s, c) = if dtheta.abs() < 1e-9 {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (sin_t / dtheta, (1.0 - cos_t) / dtheta)
        };

        let local_x = dx * s - dy * c;
        let local_y = dx * c + dy * s;

        let (sin_h, cos_h) = self.heading.sin_cos();
        Self {
            x: self.x + local_x * cos_h - local_y * sin_h,
            y: self.y + local_x * sin_h + local_y * cos_h,
            heading: wrap_angle(self.heading + dtheta),
        }
    }
}

/// Normalize an angle into (-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}
