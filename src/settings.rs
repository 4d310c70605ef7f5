use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::wink::WinkTimings;

pub const API_KEY_ENV: &str = "WINKCHARGE_GOVEE_API_KEY";
pub const DEVICE_ID_ENV: &str = "WINKCHARGE_GOVEE_DEVICE_ID";

const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";
const DEVICE_ID_PLACEHOLDER: &str = "YOUR_DEVICE_ID_HERE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WinkSettings {
    pub hold_time_secs: f64,
    pub idle_reset_secs: f64,
}

impl Default for WinkSettings {
    fn default() -> Self {
        Self {
            hold_time_secs: 3.0,
            idle_reset_secs: 0.8,
        }
    }
}

impl WinkSettings {
    pub fn timings(&self) -> WinkTimings {
        WinkTimings {
            hold_time: self.hold_time_secs,
            idle_reset: self.idle_reset_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoveeSettings {
    pub api_key: String,
    pub device_id: String,
    pub sku: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GoveeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            device_id: String::new(),
            sku: "H6006".into(),
            endpoint: "https://openapi.api.govee.com/router/api/v1/device/control".into(),
            timeout_secs: 3,
        }
    }
}

impl GoveeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub queue_capacity: usize,
    /// How long shutdown waits for queued commands before abandoning them.
    pub shutdown_grace_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            shutdown_grace_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensingSettings {
    pub tick_ms: u64,
    pub frames_per_second: f64,
}

impl Default for SensingSettings {
    fn default() -> Self {
        Self {
            tick_ms: 33,
            frames_per_second: 30.0,
        }
    }
}

/// IR marker detection tuning. Region fractions are relative to frame size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    /// Gaussian blur applied to the region before thresholding. 0 disables it.
    pub blur_sigma: f32,
    pub bright_threshold: u8,
    pub min_area: u32,
    pub max_area: u32,
    pub roi_top: f32,
    pub roi_bottom: f32,
    pub roi_left: f32,
    pub roi_right: f32,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            bright_threshold: 40,
            min_area: 2,
            max_area: 30,
            roi_top: 0.15,
            roi_bottom: 0.55,
            roi_left: 0.30,
            roi_right: 0.80,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub wink: WinkSettings,
    pub govee: GoveeSettings,
    pub dispatcher: DispatcherSettings,
    pub sensing: SensingSettings,
    pub marker: MarkerSettings,
}

impl Settings {
    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "No settings file at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.govee.api_key = key;
        }
        if let Some(device) = lookup(DEVICE_ID_ENV).filter(|v| !v.is_empty()) {
            self.govee.device_id = device;
        }
    }

    /// Rejects settings the loop cannot run with. Credentials are only
    /// required when commands will actually reach the vendor.
    pub fn validate(&self, dry_run: bool) -> Result<()> {
        let wink = &self.wink;
        if !wink.hold_time_secs.is_finite() || wink.hold_time_secs <= 0.0 {
            bail!("wink.hold_time_secs must be a positive number of seconds");
        }
        if !wink.idle_reset_secs.is_finite() || wink.idle_reset_secs <= 0.0 {
            bail!("wink.idle_reset_secs must be a positive number of seconds");
        }
        if self.dispatcher.queue_capacity == 0 {
            bail!("dispatcher.queue_capacity must be at least 1");
        }
        if self.sensing.tick_ms == 0 {
            bail!("sensing.tick_ms must be at least 1");
        }
        if !self.sensing.frames_per_second.is_finite() || self.sensing.frames_per_second <= 0.0 {
            bail!("sensing.frames_per_second must be positive");
        }

        let marker = &self.marker;
        if !marker.blur_sigma.is_finite() || marker.blur_sigma < 0.0 {
            bail!("marker.blur_sigma must be zero or positive");
        }
        if marker.min_area > marker.max_area {
            bail!("marker.min_area must not exceed marker.max_area");
        }
        let fractions = [marker.roi_top, marker.roi_bottom, marker.roi_left, marker.roi_right];
        if fractions.iter().any(|f| !(0.0..=1.0).contains(f))
            || marker.roi_top >= marker.roi_bottom
            || marker.roi_left >= marker.roi_right
        {
            bail!("marker region must be an ordered set of fractions within 0..1");
        }

        if dry_run {
            return Ok(());
        }

        let govee = &self.govee;
        if govee.api_key.trim().is_empty() || govee.api_key == API_KEY_PLACEHOLDER {
            bail!("govee.api_key is not set (or export {API_KEY_ENV})");
        }
        if govee.device_id.trim().is_empty() || govee.device_id == DEVICE_ID_PLACEHOLDER {
            bail!("govee.device_id is not set (or export {DEVICE_ID_ENV})");
        }
        if govee.sku.trim().is_empty() {
            bail!("govee.sku must not be empty");
        }
        if !govee.endpoint.starts_with("http://") && !govee.endpoint.starts_with("https://") {
            bail!("govee.endpoint must be an http(s) URL");
        }
        if govee.timeout_secs == 0 {
            bail!("govee.timeout_secs must be at least 1");
        }
        Ok(())
    }
}
