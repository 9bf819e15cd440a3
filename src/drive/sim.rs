// Simulated hardware for tests and for running the runtime without a robot
//
// Each device is a cheap handle around shared state, so a test (or the
// runtime's simulation step) can keep a clone and inspect or perturb what the
// drivetrain owns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::hardware::{
    AbsoluteEncoder, HardwareError, HeadingSensor, ModuleHardware, MotorController,
};
use super::kinematics::NUM_MODULES;
use crate::config::DrivetrainConfig;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last output requested from a simulated motor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MotorCommand {
    #[default]
    None,
    Position(f64),
    Velocity { ticks_per_sec: f64, feedforward: f64 },
    Percent(f64),
}

#[derive(Debug, Default)]
struct SimMotorState {
    position: i64,
    velocity: f64,
    command: MotorCommand,
}

/// Ideal motor: reaches every position or velocity target within one period
#[derive(Debug, Clone)]
pub struct SimMotor {
    state: Arc<Mutex<SimMotorState>>,
    free_speed: f64, // ticks/s at full percent output
}

impl SimMotor {
    pub fn new(free_speed: f64) -> Self {
        Self {
            state: Arc::default(),
            free_speed,
        }
    }

    pub fn command(&self) -> MotorCommand {
        lock(&self.state).command
    }

    /// Force the encoder readings, as if the mechanism moved on its own
    pub fn set_measured(&self, position: i64, velocity: f64) {
        let mut state = lock(&self.state);
        state.position = position;
        state.velocity = velocity;
    }
}

impl MotorController for SimMotor {
    fn read_position(&self) -> i64 {
        lock(&self.state).position
    }

    fn read_velocity(&self) -> f64 {
        lock(&self.state).velocity
    }

    fn set_position(&mut self, ticks: i64) {
        lock(&self.state).position = ticks;
    }

    fn set_position_target(&mut self, ticks: f64) {
        let mut state = lock(&self.state);
        state.command = MotorCommand::Position(ticks);
        state.position = ticks.round() as i64;
    }

    fn set_velocity_target(&mut self, ticks_per_sec: f64, feedforward: f64) {
        let mut state = lock(&self.state);
        state.command = MotorCommand::Velocity {
            ticks_per_sec,
            feedforward,
        };
        state.velocity = ticks_per_sec;
    }

    fn set_percent_output(&mut self, output: f64) {
        let mut state = lock(&self.state);
        state.command = MotorCommand::Percent(output);
        state.velocity = output * self.free_speed;
    }
}

#[derive(Debug)]
struct SimAbsoluteState {
    degrees: f64,
    fault: bool,
}

/// Absolute encoder returning a fixed angle, with fault injection
#[derive(Debug, Clone)]
pub struct SimAbsoluteEncoder {
    state: Arc<Mutex<SimAbsoluteState>>,
}

impl SimAbsoluteEncoder {
    pub fn new(degrees: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimAbsoluteState {
                degrees,
                fault: false,
            })),
        }
    }

    pub fn set_degrees(&self, degrees: f64) {
        lock(&self.state).degrees = degrees;
    }

    pub fn set_fault(&self, fault: bool) {
        lock(&self.state).fault = fault;
    }
}

impl AbsoluteEncoder for SimAbsoluteEncoder {
    fn read_absolute_degrees(&mut self) -> Result<f64, HardwareError> {
        let state = lock(&self.state);
        if state.fault {
            return Err(HardwareError::Unreachable("simulated absolute encoder".to_string()));
        }
        Ok(state.degrees)
    }
}

#[derive(Debug, Default)]
struct SimGyroState {
    degrees: f64,
    zero: f64,
    fault: bool,
}

/// Gyro whose heading is driven by the simulation
#[derive(Debug, Clone, Default)]
pub struct SimGyro {
    state: Arc<Mutex<SimGyroState>>,
}

impl SimGyro {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_degrees(&self, degrees: f64) {
        lock(&self.state).degrees = degrees;
    }

    /// Rotate by `delta` degrees, counter-clockwise positive
    pub fn advance(&self, delta: f64) {
        lock(&self.state).degrees += delta;
    }

    pub fn set_fault(&self, fault: bool) {
        lock(&self.state).fault = fault;
    }
}

impl HeadingSensor for SimGyro {
    fn read_heading_degrees(&mut self) -> Result<f64, HardwareError> {
        let state = lock(&self.state);
        if state.fault {
            return Err(HardwareError::Timeout("simulated gyro".to_string()));
        }
        Ok(state.degrees - state.zero)
    }

    fn zero(&mut self) {
        let mut state = lock(&self.state);
        state.zero = state.degrees;
    }
}

/// A full simulated robot: four modules plus a gyro
#[derive(Debug, Clone)]
pub struct SimRig {
    pub rotation: [SimMotor; NUM_MODULES],
    pub drive: [SimMotor; NUM_MODULES],
    pub absolute: [SimAbsoluteEncoder; NUM_MODULES],
    pub gyro: SimGyro,
}

impl SimRig {
    /// Wheels start pointing straight ahead, so the absolute encoders read
    /// their mechanical zeros.
    pub fn new(config: &DrivetrainConfig) -> Self {
        let drive_free_speed = config.max_drive_velocity * config.drive_ticks_per_meter();
        Self {
            rotation: std::array::from_fn(|_| SimMotor::new(0.0)),
            drive: std::array::from_fn(|_| SimMotor::new(drive_free_speed)),
            absolute: std::array::from_fn(|i| {
                SimAbsoluteEncoder::new(config.modules[i].mechanical_zero_deg)
            }),
            gyro: SimGyro::new(),
        }
    }

    /// Boxed handles for the drivetrain; the rig keeps its own clones
    pub fn hardware(&self) -> ([ModuleHardware; NUM_MODULES], Box<dyn HeadingSensor>) {
        let modules = std::array::from_fn(|i| ModuleHardware {
            rotation: Box::new(self.rotation[i].clone()) as Box<dyn MotorController>,
            drive: Box::new(self.drive[i].clone()) as Box<dyn MotorController>,
            absolute: Box::new(self.absolute[i].clone()) as Box<dyn AbsoluteEncoder>,
        });
        (modules, Box::new(self.gyro.clone()))
    }

    /// Advance the gyro by the chassis rotation over one period
    pub fn step(&self, omega: f64, dt: f64) {
        self.gyro.advance((omega * dt).to_degrees());
    }
}
