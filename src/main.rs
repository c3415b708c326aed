use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use herdwatch::api::{self, AppState};
use herdwatch::config::{Config, DEFAULT_CONFIG_PATH};
use herdwatch::service::DetectionService;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HERDWATCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run detection until the source ends or Ctrl-C is pressed.
    Run {
        /// Write a session report here when the run ends.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Classes to include in the report (default: every tracked class).
        #[arg(long, value_delimiter = ',')]
        classes: Vec<String>,
    },
    /// Serve the control API; detection is started over HTTP.
    Serve {
        /// Overrides `http.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herdwatch=debug".parse()?))
        .init();

    let args = Args::parse();

    let config = match Config::load_from(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration {}: {}", args.config.display(), e);
            return Err(e.into());
        }
    };
    tracing::info!(
        path = %args.config.display(),
        classes = ?config.detection.tracked_classes,
        "configuration loaded"
    );

    match args.command {
        Command::CheckConfig => {
            println!("{}: ok", args.config.display());
            Ok(())
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(config.http.port);
            let service = DetectionService::new(config);
            let server = api::start_server(AppState::new(service.clone()), port);

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        tracing::error!("http server failed: {}", e);
                        return Err(e.into());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
            }

            service.stop();
            if let Some(Err(e)) = service.wait().await {
                tracing::error!("detection ended with error: {}", e);
            }
            tracing::info!("shutdown complete");
            Ok(())
        }
        Command::Run { report, classes } => run(config, report, classes).await,
    }
}

async fn run(
    config: Config,
    report: Option<PathBuf>,
    classes: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = DetectionService::new(config);
    if let Err(e) = service.start() {
        eprintln!("could not start detection: {}", e);
        return Err(e.into());
    }

    let waiter = service.clone();
    let wait = waiter.wait();
    tokio::pin!(wait);

    let finished = tokio::select! {
        outcome = &mut wait => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            tracing::info!("shutdown signal received");
            service.stop();
            wait.await
        }
    };

    match outcome {
        Some(Ok(summary)) => {
            tracing::info!(
                reason = ?summary.reason,
                frames = summary.frames,
                sessions = summary.sessions,
                average_fps = format!("{:.2}", summary.average_fps),
                "run finished"
            );
            println!(
                "{} frames, {} sessions, {:.2} fps average",
                summary.frames, summary.sessions, summary.average_fps
            );
        }
        Some(Err(e)) => eprintln!("detection ended with error: {}", e),
        None => {}
    }

    if let Some(path) = report {
        let classes = (!classes.is_empty()).then_some(classes.as_slice());
        match service.export(&path, classes) {
            Ok(count) => println!("report written to {} ({} sessions)", path.display(), count),
            Err(e) => eprintln!("report not written: {}", e),
        }
    }

    Ok(())
}
