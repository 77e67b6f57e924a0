use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::project_dirs;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging for a component.
///
/// - `component_name`: Name of the component (e.g., "sim")
/// - `to_file`: If true, also log to `<data_dir>/logs/<component_name>.log`.
/// - `default_level`: Filter used when `RUST_LOG` is not set (e.g., "info").
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(
    component_name: &str,
    to_file: bool,
    default_level: &str,
) -> io::Result<Option<WorkerGuard>> {
    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_level))
            .init();
        return Ok(None);
    }

    let log_dir = get_log_directory()?;
    fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(format!("{}.log", component_name));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!(target: "runner", "Logging to file: {}", log_path.display());

    Ok(Some(guard))
}

fn get_log_directory() -> io::Result<PathBuf> {
    let dirs = project_dirs()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))?;

    Ok(dirs.data_dir().join("logs"))
}

/// Truncate log file if it exceeds MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() && fs::metadata(log_path)?.len() > MAX_LOG_SIZE {
        File::create(log_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_large_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.log");
        fs::write(&path, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_small_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.log");
        fs::write(&path, b"keep me").unwrap();

        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"keep me");

        // Missing files are fine too
        truncate_if_needed(&dir.path().join("absent.log")).unwrap();
    }
}
