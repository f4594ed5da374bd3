use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_FILE: &str = "logs/latest.log";
pub const DEFAULT_MAX_LOG_SIZE_MB: u64 = 5;

/// Sends `log` output to a file; the terminal belongs to the TUI.
pub fn init(debug: bool, log_file: &Path, max_size_mb: u64) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let rotated = rotate_if_oversized(log_file, max_size_mb.saturating_mul(1024 * 1024))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let default_filter = if debug { "pocut=debug" } else { "pocut=info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();

    log::debug!("Logging configured. Debug mode: {}, Log file: {}", debug, log_file.display());
    if let Some(old) = rotated {
        log::info!("Previous log rotated to {}", old.display());
    }
    Ok(())
}

/// Moves `path` to `path.1` once it exceeds `max_bytes`. Returns the rotated path.
pub fn rotate_if_oversized(path: &Path, max_bytes: u64) -> Result<Option<PathBuf>> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(None),
    };
    if size <= max_bytes {
        return Ok(None);
    }
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    let rotated = PathBuf::from(rotated);
    fs::rename(path, &rotated)
        .with_context(|| format!("Failed to rotate {}", path.display()))?;
    Ok(Some(rotated))
}
