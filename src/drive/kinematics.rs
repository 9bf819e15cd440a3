// Swerve kinematics for a four-module chassis
// Converts chassis velocities (vx, vy, omega) into per-module angle/speed and back.

use nalgebra::{SMatrix, SVector, Vector3};

use super::geometry::{ChassisVelocity, ModuleGeometry, ModuleState};
use crate::error::{DriveError, Result};

/// Number of swerve modules on the chassis
pub const NUM_MODULES: usize = 4;

const NUM_ROWS: usize = 2 * NUM_MODULES;

/// Maps chassis velocity to wheel velocity components, two rows per module
type InverseMatrix = SMatrix<f64, NUM_ROWS, 3>;
/// Least-squares pseudo-inverse of `InverseMatrix`
type ForwardMatrix = SMatrix<f64, 3, NUM_ROWS>;

/// Fixed-geometry swerve kinematics
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    modules: [ModuleGeometry; NUM_MODULES],
    forward: ForwardMatrix,
}

impl SwerveKinematics {
    /// Build the kinematics for the given module positions.
    ///
    /// Fails when the geometry cannot resolve rotation (all offsets zero or
    /// otherwise singular), since the least-squares inverse would not exist.
    pub fn new(modules: [ModuleGeometry; NUM_MODULES]) -> Result<Self> {
        // Each module contributes two rows:
        //   v_x = vx - omega * offset_y
        //   v_y = vy + omega * offset_x
        let mut inverse = InverseMatrix::zeros();
        for (i, m) in modules.iter().enumerate() {
            inverse[(2 * i, 0)] = 1.0;
            inverse[(2 * i, 2)] = -m.offset_y;
            inverse[(2 * i + 1, 1)] = 1.0;
            inverse[(2 * i + 1, 2)] = m.offset_x;
        }

        let normal = inverse.transpose() * inverse;
        let normal_inv = normal
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or_else(|| {
                DriveError::Configuration(format!("degenerate module geometry: {:?}", modules))
            })?;

        Ok(Self {
            modules,
            forward: normal_inv * inverse.transpose(),
        })
    }

    /// Rectangular chassis with wheels at (±length/2, ±width/2)
    pub fn rectangle(length: f64, width: f64) -> Result<Self> {
        Self::new(ModuleGeometry::rectangle(length, width))
    }

    /// Chassis velocity to module states.
    ///
    /// Angles are in (-π, π]. A wheel with zero velocity reports angle 0.
    /// No desaturation is applied here, see [`desaturate`].
    pub fn to_module_states(&self, velocity: ChassisVelocity) -> [ModuleState; NUM_MODULES] {
        self.modules.map(|m| {
            let wx = velocity.vx - velocity.omega * m.offset_y;
            let wy = velocity.vy + velocity.omega * m.offset_x;
            let speed = wx.hypot(wy);
            if speed == 0.0 {
                ModuleState::new(0.0, 0.0)
            } else {
                ModuleState::new(wy.atan2(wx), speed)
            }
        })
    }

    /// Module states to chassis velocity.
    ///
    /// The system is over-determined (8 equations, 3 unknowns); disagreeing
    /// wheels are reconciled by least squares.
    pub fn to_chassis_velocity(&self, states: &[ModuleState; NUM_MODULES]) -> ChassisVelocity {
        let mut wheels = SVector::<f64, NUM_ROWS>::zeros();
        for (i, state) in states.iter().enumerate() {
            let (wx, wy) = state.components();
            wheels[2 * i] = wx;
            wheels[2 * i + 1] = wy;
        }

        let chassis: Vector3<f64> = self.forward * wheels;
        ChassisVelocity::new(chassis[0], chassis[1], chassis[2])
    }
}

/// Scale all wheel speeds down together if any exceeds `max_speed`
pub fn desaturate(states: &mut [ModuleState; NUM_MODULES], max_speed: f64) {
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if fastest > max_speed {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}
