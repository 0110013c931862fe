use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerSettings;
use crate::streaming::FallbackRule;
use crate::validate_enum;
use crate::visibility::IntersectionOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub visibility: VisibilityConfig,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Playback scheduler tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_band_start")]
    pub band_start: f64,

    #[serde(default = "default_band_end")]
    pub band_end: f64,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            band_start: default_band_start(),
            band_end: default_band_end(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn to_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            band_start: self.band_start,
            band_end: self.band_end,
            throttle: Duration::from_millis(self.throttle_ms),
        }
    }
}

fn default_band_start() -> f64 {
    0.4
}
fn default_band_end() -> f64 {
    0.6
}
fn default_throttle_ms() -> u64 {
    200
}

/// Per-element loader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    #[serde(default = "default_preload")]
    pub preload: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            preload: default_preload(),
        }
    }
}

impl LoaderConfig {
    pub fn preload(&self) -> common::Preload {
        common::Preload::from_str(&self.preload).unwrap_or_default()
    }
}

fn default_preload() -> String {
    "auto".to_string()
}

/// Adaptive-streaming settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Fallback rules; built-in rules apply when empty
    #[serde(default)]
    pub fallback: Vec<FallbackRule>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            fallback: Vec::new(),
        }
    }
}

impl StreamingConfig {
    pub fn rules(&self) -> Vec<FallbackRule> {
        if self.fallback.is_empty() {
            crate::streaming::default_rules()
        } else {
            self.fallback.clone()
        }
    }
}

fn default_true() -> bool {
    true
}

/// Defaults for visibility observers
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VisibilityConfig {
    #[serde(default)]
    pub threshold: f64,

    #[serde(default)]
    pub root_margin: f64,
}

impl VisibilityConfig {
    pub fn to_options(&self) -> IntersectionOptions {
        IntersectionOptions {
            threshold: self.threshold,
            root_margin: self.root_margin,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("clipdeck");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;
        self.validate_preload(&self.loader.preload)?;

        let scheduler = &self.scheduler;
        if !(0.0..=1.0).contains(&scheduler.band_start)
            || !(0.0..=1.0).contains(&scheduler.band_end)
            || scheduler.band_start >= scheduler.band_end
        {
            anyhow::bail!(
                "Invalid scheduler band: {}..{} (expected 0 <= start < end <= 1)",
                scheduler.band_start,
                scheduler.band_end
            );
        }
        if scheduler.throttle_ms == 0 {
            anyhow::bail!("Invalid scheduler throttle_ms: must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.visibility.threshold) {
            anyhow::bail!(
                "Invalid visibility threshold: {} (expected 0-1)",
                self.visibility.threshold
            );
        }

        for rule in &self.streaming.fallback {
            if rule.host.is_empty() || rule.manifest_suffix.is_empty() {
                anyhow::bail!("Fallback rules need a host and a manifest_suffix");
            }
            if rule.alternatives.is_empty() {
                anyhow::bail!("Fallback rule for {} has no alternatives", rule.host);
            }
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_preload(&self, preload: &str) -> Result<()> {
        validate_enum!(preload, "none", "metadata", "auto")
    }
}
