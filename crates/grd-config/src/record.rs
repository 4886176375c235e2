//! Versioned risk configuration record.
//!
//! The record is produced and signed by an external store. This crate only
//! recomputes `sha256_hex(canonical(record))` and compares it with the
//! `signed_hash` that travelled alongside.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, sha256_hex};
use crate::ConfigError;

/// Risk thresholds consumed by the gating layers.
///
/// Percentages are fractions: `0.01` means 1%.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskConfiguration {
    pub id: String,
    pub version: u32,
    /// Per-trade risk cap as a fraction of account balance.
    pub max_position_size_pct: f64,
    /// Portfolio daily drawdown that trips the freeze.
    pub daily_drawdown_limit_pct: f64,
    pub max_leverage_ratio: f64,
    pub min_stop_loss_pips: f64,
}

/// Wire envelope: the record plus the hash the external store signed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedRiskConfiguration {
    pub record: RiskConfiguration,
    pub signed_hash: String,
}

impl RiskConfiguration {
    /// The fixed parameter set installed whenever integrity cannot be proven.
    ///
    /// 0% per-trade risk, 0% drawdown allowance, no leverage.
    pub fn safe_mode_defaults() -> Self {
        Self {
            id: "SAFE_MODE".to_string(),
            version: 0,
            max_position_size_pct: 0.0,
            daily_drawdown_limit_pct: 0.0,
            max_leverage_ratio: 1.0,
            min_stop_loss_pips: 0.0,
        }
    }

    /// Canonical JSON of the record (the exact bytes that are hashed).
    pub fn canonical(&self) -> Result<String> {
        canonical_json(self)
    }

    /// `sha256_hex(canonical(record))`.
    pub fn compute_hash(&self) -> Result<String> {
        Ok(sha256_hex(self.canonical()?.as_bytes()))
    }

    /// Look up a threshold by its field name.
    pub fn value_of(&self, key: &str) -> Option<f64> {
        match key {
            "max_position_size_pct" => Some(self.max_position_size_pct),
            "daily_drawdown_limit_pct" => Some(self.daily_drawdown_limit_pct),
            "max_leverage_ratio" => Some(self.max_leverage_ratio),
            "min_stop_loss_pips" => Some(self.min_stop_loss_pips),
            "version" => Some(f64::from(self.version)),
            _ => None,
        }
    }

    /// Range and ordering checks run after the hash has matched.
    ///
    /// The per-trade cap may not exceed the daily drawdown limit: a single
    /// approved trade must never be able to blow through the portfolio freeze.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "id",
                detail: "must not be blank".to_string(),
            });
        }
        check_fraction("max_position_size_pct", self.max_position_size_pct)?;
        check_fraction("daily_drawdown_limit_pct", self.daily_drawdown_limit_pct)?;

        if !self.max_leverage_ratio.is_finite() || self.max_leverage_ratio < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_leverage_ratio",
                detail: format!("must be finite and >= 1.0, got {}", self.max_leverage_ratio),
            });
        }
        if !self.min_stop_loss_pips.is_finite() || self.min_stop_loss_pips < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "min_stop_loss_pips",
                detail: format!("must be finite and >= 0, got {}", self.min_stop_loss_pips),
            });
        }
        if self.max_position_size_pct > self.daily_drawdown_limit_pct {
            return Err(ConfigError::ThresholdOrdering {
                lower: "max_position_size_pct",
                lower_value: self.max_position_size_pct,
                upper: "daily_drawdown_limit_pct",
                upper_value: self.daily_drawdown_limit_pct,
            });
        }
        Ok(())
    }
}

fn check_fraction(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if !v.is_finite() || v <= 0.0 || v > 1.0 {
        return Err(ConfigError::InvalidValue {
            field,
            detail: format!("must be a fraction in (0, 1], got {v}"),
        });
    }
    Ok(())
}
