use crate::board::BoardSettings;
use crate::models::{MAX_BLOCK_SECS, MAX_HOURS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub hours: u32,
    pub block_length_secs: u64,
    pub break_award_mins: u32,
    pub tick_millis: u64,
    pub persist_interval_secs: u64,
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hours: 8,
            block_length_secs: 600,
            break_award_mins: 10,
            tick_millis: 100,
            persist_interval_secs: 10,
            server_port: 3000,
        }
    }
}

impl Config {
    pub fn board_settings(&self) -> BoardSettings {
        BoardSettings {
            hours: self.hours.min(MAX_HOURS),
            block_secs: self.block_length_secs.clamp(1, MAX_BLOCK_SECS),
            break_award_mins: self.break_award_mins,
        }
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_millis.max(10))
    }

    pub fn persist_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.persist_interval_secs.max(1) as i64)
    }
}

/// Reads `config.json` from `base_dir`, writing the defaults on first run.
pub fn load_config(base_dir: &Path) -> Result<Config> {
    let path = base_dir.join("config.json");

    if !path.exists() {
        let config = Config::default();
        let data = serde_json::to_string_pretty(&config)?;
        fs::write(&path, data)?;
        return Ok(config);
    }

    let data = fs::read_to_string(&path)?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_run_writes_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = load_config(dir.path())?;
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.json").exists());
        Ok(())
    }

    #[test]
    fn test_partial_config_fills_defaults() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("config.json"), r#"{ "hours": 4 }"#)?;

        let config = load_config(dir.path())?;
        assert_eq!(config.hours, 4);
        assert_eq!(config.block_length_secs, 600);
        assert_eq!(config.board_settings().break_award_mins, 10);
        Ok(())
    }

    #[test]
    fn test_board_settings_clamp_block_length() {
        let config = Config {
            hours: 1000,
            block_length_secs: u64::MAX,
            ..Config::default()
        };
        let settings = config.board_settings();
        assert_eq!(settings.hours, MAX_HOURS);
        assert_eq!(settings.block_secs, MAX_BLOCK_SECS);
    }

    #[test]
    fn test_invalid_config_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("config.json"), "hours = 4")?;
        assert!(load_config(dir.path()).is_err());
        Ok(())
    }
}
