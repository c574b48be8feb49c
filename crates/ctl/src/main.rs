#![forbid(unsafe_code)]

//! robotctl: command-line client for the robot service API.

use std::time::Duration;

use clap::{Parser, Subcommand};
use robot_core::api::{DispenseRequest, SnapshotRequest, DEFAULT_CAMERA};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;

use crate::client::RobotClient;

#[derive(Parser, Debug)]
#[command(name = "robotctl")]
struct Args {
    /// Service base URL.
    #[arg(long, env = "ROBOT_SERVICE_URL", default_value = "http://127.0.0.1:8000")]
    service: String,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Issue a dispense command.
    Dispense {
        #[arg(long)]
        mix_id: i64,
        #[arg(long)]
        run_id: i64,
        #[arg(long)]
        colour: String,
        #[arg(long)]
        volume_ml: f64,
        /// Poll the task until it leaves `running`.
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 1_000)]
        poll_ms: u64,
    },
    /// Show a task's status.
    Status {
        cmd_id: String,
    },
    /// Capture a snapshot for a task.
    Snapshot {
        cmd_id: String,
        #[arg(long, default_value = DEFAULT_CAMERA)]
        cam: String,
        /// Wait for the target pose before capturing.
        #[arg(long)]
        pose: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = RobotClient::new(&args.service);

    match args.cmd {
        Cmd::Dispense {
            mix_id,
            run_id,
            colour,
            volume_ml,
            wait,
            poll_ms,
        } => {
            let resp = client
                .dispense(&DispenseRequest {
                    mix_id,
                    run_id,
                    colour,
                    volume_ml,
                })
                .await?;
            print_json(&resp)?;

            if wait {
                loop {
                    let status = client.status(&resp.cmd_id).await?;
                    tracing::debug!(cmd_id = %resp.cmd_id, status = %status.status, "polled");
                    if status.status.is_terminal() {
                        print_json(&status)?;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(poll_ms)).await;
                }
            }
        }
        Cmd::Status { cmd_id } => {
            print_json(&client.status(&cmd_id).await?)?;
        }
        Cmd::Snapshot { cmd_id, cam, pose } => {
            let resp = if pose {
                client.pose_snapshot(&cmd_id, &cam).await?
            } else {
                client
                    .snapshot(&SnapshotRequest {
                        cmd_id,
                        cam_id: cam,
                    })
                    .await?
            };
            print_json(&resp)?;
        }
    }
    Ok(())
}
