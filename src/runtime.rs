// 50 Hz control loop
// Each tick: take the newest commands, drive, integrate odometry, publish.
// There is no watchdog: the last drive command is reapplied every period
// until a newer one replaces it.

use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::config::{TOPIC_CMD_CONTROL, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_TELEMETRY};
use crate::drive::{ChassisVelocity, DriveOutputMode, Drivetrain, TelemetryBuffer};
use crate::error::DriveError;
use crate::messages::{ControlRequest, DriveCommand, RuntimeHealth, Telemetry};

pub struct Runtime {
    drivetrain: Drivetrain,
    latest_cmd: Option<DriveCommand>,
    health: RuntimeHealth,
    calibration_degraded: bool,
    telemetry: TelemetryBuffer,
    period: Duration,
}

/// Control period for `loop_hz`, kept to the nanosecond so the tick and the
/// odometry step agree
pub fn loop_period(loop_hz: u64) -> Duration {
    Duration::from_secs_f64(1.0 / loop_hz as f64)
}

impl Runtime {
    pub fn new(drivetrain: Drivetrain, period: Duration) -> Self {
        Self {
            drivetrain,
            latest_cmd: None,
            health: RuntimeHealth::Ok,
            calibration_degraded: false,
            telemetry: TelemetryBuffer::new(),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Calibrate every module; faulty modules leave the runtime degraded
    pub fn calibrate(&mut self) {
        let report = self.drivetrain.calibrate_all();
        self.calibration_degraded = !report.all_ok();
    }

    /// Process incoming drive command
    pub fn on_command(&mut self, cmd: DriveCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
    }

    /// Process incoming control request
    pub fn on_request(&mut self, request: ControlRequest) {
        info!("Received request: {:?}", &request);
        match request {
            ControlRequest::ToggleFieldCentric => self.drivetrain.toggle_field_centric(),
            ControlRequest::Calibrate => self.calibrate(),
            ControlRequest::ZeroHeading => self.drivetrain.zero_heading(),
            ControlRequest::ResetPose { .. } => {
                if let Some(pose) = request.pose() {
                    self.drivetrain.reset_pose(pose);
                }
            }
        }
    }

    /// One control period: drive, then integrate odometry.
    ///
    /// Never fails; an uncalibrated drivetrain falls back to open-loop.
    pub fn step(&mut self) {
        let cmd = self.latest_cmd.unwrap_or_default();
        let velocity = ChassisVelocity::from(&cmd);
        let field_centric = self.drivetrain.is_field_centric();
        let mode = if cmd.open_loop {
            DriveOutputMode::OpenLoop
        } else {
            DriveOutputMode::Velocity
        };

        let mut fell_back = false;
        match self.drivetrain.drive(velocity, field_centric, mode) {
            Ok(_) => {}
            Err(DriveError::Uncalibrated { module }) => {
                if self.health != RuntimeHealth::OpenLoopFallback {
                    warn!("Module {} uncalibrated, driving open-loop", module);
                }
                fell_back = true;
                if let Err(e) = self
                    .drivetrain
                    .drive(velocity, field_centric, DriveOutputMode::OpenLoop)
                {
                    warn!("Open-loop drive failed, stopping: {}", e);
                    self.drivetrain.stop();
                }
            }
            Err(e) => {
                warn!("Drive failed, stopping: {}", e);
                self.drivetrain.stop();
            }
        }

        self.drivetrain.update_odometry(self.period.as_secs_f64());

        self.health = if fell_back {
            RuntimeHealth::OpenLoopFallback
        } else if self.calibration_degraded {
            RuntimeHealth::Degraded
        } else {
            RuntimeHealth::Ok
        };
    }

    /// Snapshot of the drivetrain after the last completed period
    pub fn telemetry(&mut self) -> Telemetry {
        self.drivetrain.publish_telemetry(&mut self.telemetry);
        self.telemetry.drain()
    }
}

/// Run the control loop until a publish fails.
///
/// `after_step` is called once per period, after driving and odometry, with
/// the drivetrain and the period length. Hardware that needs to be advanced by
/// the caller (such as a simulated rig) hooks in here.
pub async fn run<F>(
    drivetrain: Drivetrain,
    loop_hz: u64,
    mut after_step: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: FnMut(&Drivetrain, Duration),
{
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_drive = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_control = session.declare_subscriber(TOPIC_CMD_CONTROL).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let period = loop_period(loop_hz);
    let mut runtime = Runtime::new(drivetrain, period);
    runtime.calibrate();

    let mut tick = interval(period);

    info!("Runtime started: {}Hz loop", loop_hz);
    info!("Subscribed to: {}, {}", TOPIC_CMD_DRIVE, TOPIC_CMD_CONTROL);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending requests and commands (non-blocking), keep latest command
        while let Ok(Some(sample)) = sub_control.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ControlRequest>(&payload) {
                Ok(request) => runtime.on_request(request),
                Err(e) => warn!("Failed to parse request: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_drive.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Drive and integrate odometry
        runtime.step();

        // 3. Let the caller advance its hardware
        after_step(runtime.drivetrain(), period);

        // 4. Publish telemetry
        let telemetry_json = serde_json::to_string(&runtime.telemetry())?;
        pub_telemetry.put(telemetry_json).await?;

        // 5. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}
