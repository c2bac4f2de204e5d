//! Recorder configuration and parameter-set files.
//!
//! Both are plain JSON. Every configuration field has a default so an empty
//! object (or no file at all) yields the standard timings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::replay::ReplayTiming;
use crate::variables::ParamSet;

/// Timings and file names used by a recording session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capture period while the VM runs
    pub update_delay_ms: u64,
    /// Delay before the first capture after entering Run mode
    pub initial_capture_delay_ms: u64,
    /// Wait after each phase of a replayed mouse move
    pub mouse_settle_ms: u64,
    /// Wait between button press and release on a replayed click
    pub click_release_ms: u64,
    /// Out-of-frame pointer position used before every replayed move
    pub sentinel_x: i32,
    pub sentinel_y: i32,
    /// File name of the capture artifact inside the temp directory
    pub screendump_name: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            update_delay_ms: 1000,
            initial_capture_delay_ms: 100,
            mouse_settle_ms: 500,
            click_release_ms: 100,
            sentinel_x: -8000,
            sentinel_y: -8000,
            screendump_name: "scrdump.ppm".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Lower bound for the capture period
    pub const MIN_UPDATE_DELAY_MS: u64 = 10;

    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.update_delay_ms < Self::MIN_UPDATE_DELAY_MS {
            anyhow::bail!(
                "update_delay_ms must be at least {} (got {})",
                Self::MIN_UPDATE_DELAY_MS,
                self.update_delay_ms
            );
        }
        if self.initial_capture_delay_ms == 0 {
            anyhow::bail!("initial_capture_delay_ms must be positive");
        }
        if self.mouse_settle_ms == 0 || self.click_release_ms == 0 {
            anyhow::bail!("mouse_settle_ms and click_release_ms must be positive");
        }

        let name = self.screendump_name.trim();
        if name.is_empty() {
            anyhow::bail!("screendump_name must be specified");
        }
        if name.contains('/') || name == "." || name == ".." {
            anyhow::bail!("screendump_name must be a bare file name, got {:?}", name);
        }

        Ok(())
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }

    pub fn initial_capture_delay(&self) -> Duration {
        Duration::from_millis(self.initial_capture_delay_ms)
    }

    pub fn replay_timing(&self) -> ReplayTiming {
        ReplayTiming {
            mouse_settle: Duration::from_millis(self.mouse_settle_ms),
            click_release: Duration::from_millis(self.click_release_ms),
            sentinel: (self.sentinel_x, self.sentinel_y),
        }
    }
}

/// Load a parameter set: a JSON object mapping names to string values
pub fn load_params<P: AsRef<Path>>(path: P) -> Result<ParamSet> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read parameters from {:?}", path.as_ref()))?;

    let params: ParamSet =
        serde_json::from_str(&content).context("Failed to parse parameters JSON")?;
    for (name, value) in &params {
        validate_param(name, value)
            .with_context(|| format!("Invalid parameter in {:?}", path.as_ref()))?;
    }

    Ok(params)
}

/// A parameter ends up as one `name=value` line in the vars file.
pub fn validate_param(name: &str, value: &str) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("parameter name is empty");
    }
    if name.contains(['=', '\n', '\r']) {
        anyhow::bail!("parameter name {:?} contains '=' or a line break", name);
    }
    if value.contains(['\n', '\r']) {
        anyhow::bail!("value of parameter {:?} contains a line break", name);
    }
    Ok(())
}

/// Parse a `NAME=VALUE` override. The value may itself contain `=`.
pub fn parse_param_override(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Parameter override {:?} is not NAME=VALUE", raw))?;
    let name = name.trim();
    validate_param(name, value)
        .with_context(|| format!("Invalid parameter override {:?}", raw))?;
    Ok((name.to_string(), value.to_string()))
}

/// Merge overrides into `params`; overrides win.
pub fn merge_params(mut params: ParamSet, overrides: &[(String, String)]) -> ParamSet {
    for (name, value) in overrides {
        params.insert(name.clone(), value.clone());
    }
    params
}
