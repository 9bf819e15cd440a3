use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swerve_drive_runtime::config::{DrivetrainConfig, LOOP_HZ};
use swerve_drive_runtime::drive::Drivetrain;
use swerve_drive_runtime::drive::sim::SimRig;

/// Swerve drivetrain control loop
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON drivetrain configuration (defaults to the built-in robot)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control loop frequency in Hz
    #[arg(long, default_value_t = LOOP_HZ)]
    loop_hz: u64,

    /// Start in robot-centric mode instead of field-centric
    #[arg(long)]
    robot_centric: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DrivetrainConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => DrivetrainConfig::default(),
    };
    if args.robot_centric {
        config.field_centric = false;
    }

    if args.loop_hz == 0 || args.loop_hz > 1000 {
        error!("Loop rate must be between 1 and 1000 Hz, got {}", args.loop_hz);
        std::process::exit(1);
    }

    // No motor driver layer is linked in; the loop runs against the simulated rig
    info!("Using simulated drivetrain hardware");
    let rig = SimRig::new(&config);
    let (hardware, gyro) = rig.hardware();
    let drivetrain = match Drivetrain::new(config, hardware, gyro) {
        Ok(drivetrain) => drivetrain,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Advance the simulated gyro by the rotation the wheels measured
    let step_rig = move |drivetrain: &Drivetrain, period: Duration| {
        rig.step(drivetrain.measured_velocity().omega, period.as_secs_f64());
    };

    if let Err(e) = swerve_drive_runtime::runtime::run(drivetrain, args.loop_hz, step_rig).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
