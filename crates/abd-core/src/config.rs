use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::detector::DetectorConfig;

/// Global configuration loaded from `~/.config/abd/config.toml`.
///
/// The shipped defaults are the tuned values; the file exists so a deployment
/// can reshape the concurrency schedule without rebuilding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbdConfig {
    /// Pool parallelism before any weak verdict.
    pub conc_before: usize,
    /// Pool parallelism while draining toward a link switch.
    pub conc_weak: usize,
    /// Pool parallelism after the switch completes.
    pub conc_after: usize,
    /// Issue a light probe every N-th task.
    pub probe_every_n: usize,
    /// Weak-link detector tuning.
    pub detector: DetectorConfig,
}

impl Default for AbdConfig {
    fn default() -> Self {
        Self {
            conc_before: 3,
            conc_weak: 2,
            conc_after: 8,
            probe_every_n: 10,
            detector: DetectorConfig::default(),
        }
    }
}

impl AbdConfig {
    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.conc_before < 1 || self.conc_weak < 1 || self.conc_after < 1 {
            anyhow::bail!("pool limits must all be >= 1");
        }
        if self.probe_every_n < 2 {
            anyhow::bail!("probe_every_n must be >= 2");
        }
        if self.detector.win_size < 1 {
            anyhow::bail!("detector.win_size must be >= 1");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("abd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AbdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AbdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: AbdConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
