// Capability traits for the driver layer
//
// The drivetrain never talks to a bus directly. Anything that can report a
// position and take an output (a CAN motor controller, a serial servo, a
// simulation) plugs in behind these traits.

/// Errors reported by a sensor or actuator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("Device {0} unreachable")]
    Unreachable(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Invalid reading from {device}: {value}")]
    InvalidReading { device: String, value: f64 },
}

/// Motor controller with an integrated relative (incremental) encoder.
///
/// Positions are continuous ticks: they keep counting past a full turn and
/// reset on power cycle.
pub trait MotorController: Send {
    /// Current relative position in ticks
    fn read_position(&self) -> i64;

    /// Current velocity in ticks per second
    fn read_velocity(&self) -> f64;

    /// Overwrite the relative position reference
    fn set_position(&mut self, ticks: i64);

    /// Closed-loop position control toward `ticks`
    fn set_position_target(&mut self, ticks: f64);

    /// Closed-loop velocity control with an additive feedforward in percent output
    fn set_velocity_target(&mut self, ticks_per_sec: f64, feedforward: f64);

    /// Open-loop output in [-1, 1]
    fn set_percent_output(&mut self, output: f64);
}

/// Absolute angle sensor, stable across power cycles
pub trait AbsoluteEncoder: Send {
    fn read_absolute_degrees(&mut self) -> Result<f64, HardwareError>;
}

/// Robot heading sensor (gyro), counter-clockwise positive
pub trait HeadingSensor: Send {
    fn read_heading_degrees(&mut self) -> Result<f64, HardwareError>;

    /// Make the current heading read as zero
    fn zero(&mut self);
}

/// One-way key/value telemetry output
pub trait TelemetrySink {
    fn publish(&mut self, key: &str, value: f64);
}

/// Telemetry sink that keeps the latest value per key until drained
#[derive(Debug, Default)]
pub struct TelemetryBuffer {
    entries: std::collections::BTreeMap<String, f64>,
}

impl TelemetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take everything published since the last drain
    pub fn drain(&mut self) -> std::collections::BTreeMap<String, f64> {
        std::mem::take(&mut self.entries)
    }
}

impl TelemetrySink for TelemetryBuffer {
    fn publish(&mut self, key: &str, value: f64) {
        self.entries.insert(key.to_string(), value);
    }
}

/// The hardware behind one swerve module
pub struct ModuleHardware {
    pub rotation: Box<dyn MotorController>,
    pub drive: Box<dyn MotorController>,
    pub absolute: Box<dyn AbsoluteEncoder>,
}
