use anyhow::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Logs go to `tiblo.log` in the data directory; stdout belongs to the TUI.
/// The filter comes from `TIBLO_LOG`, defaulting to `tiblo=info`.
pub fn init(base_dir: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(base_dir.join("tiblo.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TIBLO_LOG").unwrap_or_else(|_| "tiblo=info".into()),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
