// Keyboard teleop: WASD move, Z/X rotate, R/F speed, T toggle field-centric,
// C calibrate, H zero heading, O open-loop, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_drive_runtime::config::{TOPIC_CMD_CONTROL, TOPIC_CMD_DRIVE};
use swerve_drive_runtime::messages::{ControlRequest, DriveCommand};

const SPEEDS: [f64; 3] = [0.5, 1.5, 3.0]; // m/s
const OMEGA_SPEEDS: [f64; 3] = [1.0, 3.0, 6.0]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_drive = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    let pub_control = session.declare_publisher(TOPIC_CMD_CONTROL).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, T=field-centric, C=calibrate, H=zero heading, O=open-loop, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_drive, &pub_control).await;
    disable_raw_mode()?;

    result
}

async fn send_request(
    publisher: &zenoh::pubsub::Publisher<'_>,
    request: ControlRequest,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Request: {:?}", request);
    publisher.put(serde_json::to_string(&request)?).await?;
    Ok(())
}

async fn run_teleop(
    pub_drive: &zenoh::pubsub::Publisher<'_>,
    pub_control: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut cmd = DriveCommand::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement: x forward, y left
                    KeyCode::Char('w') if pressed => {
                        cmd.vx = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        cmd.vx = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        cmd.vy = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        cmd.vy = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation, counter-clockwise positive
                    KeyCode::Char('z') if pressed => {
                        cmd.omega = OMEGA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        cmd.omega = -OMEGA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Drivetrain requests
                    KeyCode::Char('t') if pressed => {
                        send_request(pub_control, ControlRequest::ToggleFieldCentric).await?
                    }
                    KeyCode::Char('c') if pressed => {
                        send_request(pub_control, ControlRequest::Calibrate).await?
                    }
                    KeyCode::Char('h') if pressed => {
                        send_request(pub_control, ControlRequest::ZeroHeading).await?
                    }
                    KeyCode::Char('o') if pressed => {
                        cmd.open_loop = !cmd.open_loop;
                        info!("Open-loop: {}", cmd.open_loop);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd.vx = 0.0;
            cmd.vy = 0.0;
            cmd.omega = 0.0;
        }

        // Always publish at ~50Hz
        pub_drive.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
