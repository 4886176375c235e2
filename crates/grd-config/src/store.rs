//! RiskParameterStore: tamper-evident active configuration.
//!
//! # Invariants
//!
//! - **Boot is fail-closed**: a fresh store is in Safe Mode
//!   (`NOT_HYDRATED`). No threshold is trusted until a record with a matching
//!   hash has been hydrated.
//! - **Mismatch replaces wholesale**: on hash mismatch the active record is
//!   swapped for [`RiskConfiguration::safe_mode_defaults`]; nothing from the
//!   rejected record survives.
//! - **Safe Mode never self-clears**: only a later verified `hydrate` leaves it.
//! - **Atomic swap**: readers clone an `Arc<ActiveConfig>`; a hydrate replaces
//!   the pointer under a short write lock, so no reader ever observes a
//!   half-updated record.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info};

use crate::canonical::digests_match;
use crate::record::{RiskConfiguration, SignedRiskConfiguration};
use crate::ConfigError;

/// Why the store is in Safe Mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafeModeCause {
    /// No verified record has been hydrated since boot.
    NotHydrated,
    /// `signed_hash` did not match the recomputed hash.
    IntegrityFail,
    /// Hash matched but the record failed validation.
    MalformedRecord,
}

impl SafeModeCause {
    /// Stable reason code carried by rejections while in Safe Mode.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SafeModeCause::NotHydrated => "SAFE_MODE:NOT_HYDRATED",
            SafeModeCause::IntegrityFail => "SAFE_MODE:INTEGRITY_FAIL",
            SafeModeCause::MalformedRecord => "SAFE_MODE:MALFORMED_RECORD",
        }
    }
}

impl fmt::Display for SafeModeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason_code())
    }
}

/// The configuration currently in force.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActiveConfig {
    pub record: RiskConfiguration,
    pub safe_mode: Option<SafeModeCause>,
    pub activated_at: DateTime<Utc>,
}

impl ActiveConfig {
    fn safe(cause: SafeModeCause) -> Self {
        Self {
            record: RiskConfiguration::safe_mode_defaults(),
            safe_mode: Some(cause),
            activated_at: Utc::now(),
        }
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.is_some()
    }
}

/// Result of a hydrate that did not hit an unexpected error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HydrateOutcome {
    Verified { id: String, version: u32 },
    SafeMode { cause: SafeModeCause },
}

pub struct RiskParameterStore {
    active: RwLock<Arc<ActiveConfig>>,
}

impl Default for RiskParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskParameterStore {
    /// Fresh store, in Safe Mode until the first verified hydrate.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(ActiveConfig::safe(SafeModeCause::NotHydrated))),
        }
    }

    /// Verify `signed_hash` against the record and install it.
    ///
    /// A hash mismatch is the intended detection path, not an error: it
    /// returns `Ok(SafeMode { IntegrityFail })`. A record whose hash matches
    /// but whose values are out of range returns `Err`, and the store is in
    /// Safe Mode (`MALFORMED_RECORD`) by the time the caller sees it.
    pub fn hydrate(
        &self,
        record: RiskConfiguration,
        signed_hash: &str,
    ) -> Result<HydrateOutcome, ConfigError> {
        let computed = match record.compute_hash() {
            Ok(h) => h,
            Err(e) => {
                self.enter_safe_mode(SafeModeCause::MalformedRecord, &record.id, record.version);
                return Err(ConfigError::Canonicalize(e.to_string()));
            }
        };

        if !digests_match(&computed, signed_hash) {
            error!(
                target: "security",
                record_id = %record.id,
                record_version = record.version,
                expected = %signed_hash,
                computed = %computed,
                "risk configuration hash mismatch; entering safe mode"
            );
            self.enter_safe_mode(SafeModeCause::IntegrityFail, &record.id, record.version);
            return Ok(HydrateOutcome::SafeMode {
                cause: SafeModeCause::IntegrityFail,
            });
        }

        if let Err(e) = record.validate() {
            error!(
                target: "security",
                record_id = %record.id,
                record_version = record.version,
                error = %e,
                "verified risk configuration failed validation; entering safe mode"
            );
            self.enter_safe_mode(SafeModeCause::MalformedRecord, &record.id, record.version);
            return Err(e);
        }

        let id = record.id.clone();
        let version = record.version;
        *self.active.write() = Arc::new(ActiveConfig {
            record,
            safe_mode: None,
            activated_at: Utc::now(),
        });
        info!(record_id = %id, record_version = version, "risk configuration verified and active");

        Ok(HydrateOutcome::Verified { id, version })
    }

    /// Convenience wrapper for the wire envelope.
    pub fn hydrate_signed(
        &self,
        signed: SignedRiskConfiguration,
    ) -> Result<HydrateOutcome, ConfigError> {
        let SignedRiskConfiguration {
            record,
            signed_hash,
        } = signed;
        self.hydrate(record, &signed_hash)
    }

    /// Read a threshold from the active configuration only.
    pub fn get(&self, key: &str, default: f64) -> f64 {
        self.snapshot().record.value_of(key).unwrap_or(default)
    }

    /// Consistent view of the active configuration.
    pub fn snapshot(&self) -> Arc<ActiveConfig> {
        Arc::clone(&self.active.read())
    }

    pub fn is_safe_mode(&self) -> bool {
        self.snapshot().is_safe_mode()
    }

    pub fn safe_mode_cause(&self) -> Option<SafeModeCause> {
        self.snapshot().safe_mode
    }

    fn enter_safe_mode(&self, cause: SafeModeCause, rejected_id: &str, rejected_version: u32) {
        *self.active.write() = Arc::new(ActiveConfig::safe(cause));
        error!(
            target: "security",
            cause = %cause,
            rejected_id = %rejected_id,
            rejected_version,
            "SAFE MODE ACTIVE; all risk allowances forced to zero"
        );
    }
}
