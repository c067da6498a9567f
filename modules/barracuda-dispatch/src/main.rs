mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use barracuda_common::{load_config, AppConfig};
use barracuda_engine::{Application, MemoryContextStore, RequestOutcome};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "barracuda-dispatch", about = "Dispatch request targets through the demo event stack", version)]
struct Cli {
    /// TOML config file. Falls back to BARRACUDA_* environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit structured JSON logs
    #[arg(long)]
    json: bool,

    /// Request targets, e.g. `/demo/Login.event?user=ann`
    #[arg(required = true)]
    targets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("barracuda=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Barracuda dispatch starting...");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::from_env()?,
    };
    config.log_summary();

    let classes = Arc::new(demo::classes()?);
    let store = Arc::new(MemoryContextStore::new());
    let app = Application::new(
        config,
        Arc::clone(&classes),
        demo::gateway(classes),
        Arc::clone(&store),
    )?;

    let mut failures = 0usize;
    for target in &cli.targets {
        match app.handle(target).await {
            Ok(RequestOutcome::Completed { report, processed }) => {
                info!(
                    target = target.as_str(),
                    dispatched = report.dispatched,
                    interrupts = report.interrupts,
                    "Request completed"
                );
                println!("{}", serde_json::to_string_pretty(&processed)?);
            }
            Ok(RequestOutcome::Redirect { url, .. }) => {
                info!(target = target.as_str(), url = url.as_str(), "Request redirected");
            }
            Ok(RequestOutcome::NotFound { target }) => {
                warn!(target = target.as_str(), "No event class for target");
            }
            Err(e) => {
                failures += 1;
                warn!(target = target.as_str(), error = %e, "Request failed");
            }
        }
    }

    if store.pending() > 0 {
        info!(pending = store.pending(), "Redirect contexts never collected");
    }
    app.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{failures} of {} requests failed", cli.targets.len());
    }
    Ok(())
}
