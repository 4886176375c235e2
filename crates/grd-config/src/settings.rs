//! Engine settings (everything that is NOT part of the signed risk record).
//!
//! Loaded from layered YAML via [`crate::load_layered_yaml`]. Every section is
//! optional; missing keys fall back to the defaults below.
//!
//! ```yaml
//! kill_switch:
//!   kill_threshold_pct: 0.10
//!   scan_interval_secs: 5
//! behavior:
//!   window_secs: 60
//!   max_attempts: 10
//!   cooling_off_hours: 4
//! emergency:
//!   passcode_env: "GRD_EMERGENCY_PASSCODE"
//!   require_passcode: false
//! vault:
//!   path: "var/forensics/incidents.jsonl"
//!   hash_chain: true
//! bus:
//!   capacity: 1024
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::RiskConfiguration;
use crate::{load_layered_yaml, ConfigError, LoadedConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct GuardrailSettings {
    #[serde(default)]
    pub kill_switch: KillSwitchSettings,
    #[serde(default)]
    pub behavior: BehaviorSettings,
    #[serde(default)]
    pub emergency: EmergencySettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub bus: BusSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchSettings {
    /// Single-position loss that forces liquidation (fraction of entry).
    #[serde(default = "default_kill_threshold_pct")]
    pub kill_threshold_pct: f64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Blocked interactions inside the window that count as tilt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_cooling_off_hours")]
    pub cooling_off_hours: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencySettings {
    /// NAME of the env var holding the deactivation passcode (never the value).
    #[serde(default = "default_passcode_env")]
    pub passcode_env: String,
    /// If true, startup fails when the passcode env var is unset.
    #[serde(default)]
    pub require_passcode: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// JSONL incident log. `None` keeps incidents in memory only.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub hash_chain: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_kill_threshold_pct() -> f64 {
    0.10
}

fn default_scan_interval_secs() -> u64 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_attempts() -> usize {
    10
}

fn default_cooling_off_hours() -> f64 {
    4.0
}

fn default_passcode_env() -> String {
    "GRD_EMERGENCY_PASSCODE".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bus_capacity() -> usize {
    1024
}

impl Default for KillSwitchSettings {
    fn default() -> Self {
        Self {
            kill_threshold_pct: default_kill_threshold_pct(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_attempts: default_max_attempts(),
            cooling_off_hours: default_cooling_off_hours(),
        }
    }
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            passcode_env: default_passcode_env(),
            require_passcode: false,
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            path: None,
            hash_chain: true,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl GuardrailSettings {
    /// Deserialize from merged config JSON and validate.
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let s: GuardrailSettings = serde_json::from_value(config_json.clone())
            .context("guardrail settings: invalid shape")?;
        s.validate()?;
        Ok(s)
    }

    /// Load layered YAML files (base first) and parse settings.
    pub fn load(paths: &[&str]) -> Result<(Self, LoadedConfig)> {
        let loaded = load_layered_yaml(paths)?;
        let settings = Self::from_json(&loaded.config_json)?;
        Ok((settings, loaded))
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.kill_switch.kill_threshold_pct;
        if !k.is_finite() || k <= 0.0 || k > 1.0 {
            bail!("SETTINGS_INVALID kill_switch.kill_threshold_pct must be in (0, 1], got {k}");
        }
        if self.kill_switch.scan_interval_secs == 0 {
            bail!("SETTINGS_INVALID kill_switch.scan_interval_secs must be > 0");
        }
        if self.behavior.window_secs == 0 {
            bail!("SETTINGS_INVALID behavior.window_secs must be > 0");
        }
        if self.behavior.max_attempts == 0 {
            bail!("SETTINGS_INVALID behavior.max_attempts must be > 0");
        }
        let h = self.behavior.cooling_off_hours;
        if !h.is_finite() || h <= 0.0 {
            bail!("SETTINGS_INVALID behavior.cooling_off_hours must be > 0, got {h}");
        }
        if self.emergency.passcode_env.trim().is_empty() {
            bail!("SETTINGS_INVALID emergency.passcode_env must name an env var");
        }
        if self.bus.capacity == 0 {
            bail!("SETTINGS_INVALID bus.capacity must be > 0");
        }
        Ok(())
    }

    /// The per-asset kill threshold is expected to sit at or above the
    /// portfolio daily limit. Callers decide whether a violation is fatal;
    /// the kill switch itself keeps running either way.
    pub fn check_threshold_ordering(&self, record: &RiskConfiguration) -> Result<(), ConfigError> {
        if self.kill_switch.kill_threshold_pct < record.daily_drawdown_limit_pct {
            return Err(ConfigError::ThresholdOrdering {
                lower: "daily_drawdown_limit_pct",
                lower_value: record.daily_drawdown_limit_pct,
                upper: "kill_threshold_pct",
                upper_value: self.kill_switch.kill_threshold_pct,
            });
        }
        Ok(())
    }
}
