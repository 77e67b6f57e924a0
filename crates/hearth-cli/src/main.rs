use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use hearth_runner::{init_logging, ConfigLoadError, HearthConfig, TickDriver};

mod scripts;
mod traffic;

#[derive(Parser)]
#[command(
    version,
    about = "Run a simulated hearth world with the built-in scripts",
    long_about = None
)]
pub struct Cli {
    /// Enables debug mode (-dd for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// Seed for the simulated network traffic
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Milliseconds between simulated network events
    #[arg(long, default_value_t = 250)]
    event_interval_ms: u64,
}

/// Load config, falling back to defaults when there is no file
///
/// Also returns the path that was looked for when the defaults were used.
fn load_config(path: Option<&Path>) -> Result<(HearthConfig, Option<PathBuf>), ConfigLoadError> {
    let result = match path {
        Some(path) => HearthConfig::load_from(path),
        None => HearthConfig::load(),
    };

    match result {
        Ok(config) => Ok((config, None)),
        Err(ConfigLoadError::NotFound(missing)) => Ok((HearthConfig::default(), Some(missing))),
        Err(ConfigLoadError::NoConfigDir) => Ok((HearthConfig::default(), None)),
        Err(err) => Err(err),
    }
}

async fn shutdown_signal(seconds: Option<u64>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match seconds {
        Some(seconds) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            }
        }
        None => ctrl_c.await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let (config, missing) = load_config(cli.config.as_deref())
        .map_err(|err| format!("Failed to load config: {}", err))?;

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _log_guard = init_logging("sim", config.logging.file, level)?;

    if let Some(missing) = missing {
        info!("No config found at {}, using defaults", missing.display());
    }
    info!("Starting hearth simulation...");

    let mut driver = TickDriver::new(&config.runner);

    let (mail, mail_server) = traffic::spawn_mail_server(Duration::from_millis(120))?;
    let loaded = scripts::load_scripts(driver.registry(), &config.scripts, mail)?;
    info!("Loaded {} script(s)", loaded.count);

    let network = traffic::spawn_network(
        driver.queue(),
        cli.seed,
        Duration::from_millis(cli.event_interval_ms.max(1)),
    )?;

    let ticks = driver
        .run(&config.runner, shutdown_signal(cli.seconds))
        .await;

    loaded.log_summary();

    // The queue is shut down now, so the network thread stops on its next push.
    // Dropping the scripts and the driver drops the last mail sender.
    network.join().map_err(|_| "network thread panicked")?;
    drop(loaded);
    drop(driver);
    mail_server.join().map_err(|_| "mail server thread panicked")?;

    info!("Simulation stopped after {} tick(s)", ticks);
    Ok(())
}
