//! Engine configuration stored as TOML (default `stepwise.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::stage::LogFilter;

/// Engine configuration (TOML).
///
/// Edited by hand; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds one quantum covers when the runner ticks without an explicit delta.
    pub tick_seconds: f64,

    /// Quanta allowed for fully deactivating a previous process before a new one starts.
    pub max_drain_quanta: u32,

    /// Quanta a fast-forward skip may consume before giving up.
    pub max_fast_forward_quanta: u32,

    /// Tick bound for `stepwise run`.
    pub max_ticks: u64,

    /// Which stage changes get logged.
    pub logging: LogFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 0.02,
            max_drain_quanta: 256,
            max_fast_forward_quanta: 1024,
            max_ticks: 100_000,
            logging: LogFilter::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.tick_seconds.is_finite() || self.tick_seconds <= 0.0 {
            return Err(anyhow!("tick_seconds must be a positive number"));
        }
        if self.max_drain_quanta == 0 {
            return Err(anyhow!("max_drain_quanta must be > 0"));
        }
        if self.max_fast_forward_quanta == 0 {
            return Err(anyhow!("max_fast_forward_quanta must be > 0"));
        }
        if self.max_ticks == 0 {
            return Err(anyhow!("max_ticks must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
