//! rsds - record a depth camera to a PNG dataset from the command line

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rsds_lib::settings::store::SettingsStore;
use rsds_lib::{CaptureController, FrameDrive, LifecycleState};

/// Depth camera capture controller
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON); missing file means defaults
    #[arg(long, default_value = "rsds.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture until the time limit or Ctrl-C
    Run {
        /// Dataset folder; omit for preview only, pass "" for the default
        #[arg(long)]
        target: Option<String>,

        /// Seconds to capture, 0 runs until Ctrl-C
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Drive acquisition ticks from this thread instead of the worker
        #[arg(long)]
        manual: bool,
    },
    /// Write the current (or default) settings to the config file
    InitConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let store = SettingsStore::new(cli.config.clone());

    match cli.command {
        Commands::InitConfig => {
            store
                .save()
                .with_context(|| format!("writing {}", cli.config.display()))?;
            println!("wrote {}", store.path().display());
            Ok(())
        }
        Commands::Run {
            target,
            seconds,
            manual,
        } => {
            if manual {
                store.update(|s| s.drive = FrameDrive::Manual);
            }
            run(store, target, seconds)
        }
    }
}

fn run(store: SettingsStore, target: Option<String>, seconds: u64) -> Result<()> {
    let settings = store.settings();
    let drive = settings.drive;
    let controller = CaptureController::new(rsds_lib::create_camera(), settings);

    controller.initialize(|status, description| {
        println!("[{status}] {description}");
    })?;
    if controller.state() != LifecycleState::Initialized {
        anyhow::bail!("camera did not initialize");
    }

    match target.as_deref() {
        Some(target) => controller.start_with_target(target)?,
        None => controller.start()?,
    }

    let limit = (seconds > 0).then(|| Duration::from_secs(seconds));
    match drive {
        FrameDrive::Background => wait_for_exit(limit)?,
        FrameDrive::Manual => drive_manually(&controller, limit),
    }

    if controller.state() == LifecycleState::Started {
        controller.stop()?;
    }

    let diagnostics = controller.diagnostics();
    info!("{}", serde_json::to_string_pretty(&diagnostics)?);
    Ok(())
}

/// Block until the time limit passes or Ctrl-C arrives.
fn wait_for_exit(limit: Option<Duration>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    runtime.block_on(async {
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("interrupted"),
                    _ = tokio::time::sleep(limit) => {}
                }
            }
            None => {
                tokio::signal::ctrl_c().await.ok();
                info!("interrupted");
            }
        }
    });
    Ok(())
}

/// Tick the controller from this thread until the limit or device loss.
fn drive_manually(controller: &CaptureController, limit: Option<Duration>) {
    let begin = Instant::now();
    let idle = controller.settings().idle_interval();
    while controller.state() == LifecycleState::Started {
        if limit.is_some_and(|limit| begin.elapsed() >= limit) {
            break;
        }
        if controller.process_frame() {
            controller.process_bitmap_image();
        } else {
            std::thread::sleep(idle);
        }
    }
}
