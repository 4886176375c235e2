//! Human-triggered global halt. Highest-priority override in the order guard.
//!
//! `activate` sets the flag first and broadcasts second. A failed broadcast is
//! reported in the [`ActivationReport`] and logged; the flag stays set.
//! `deactivate` needs the passcode. Only its SHA-256 digest is kept in memory,
//! and with no passcode configured deactivation is impossible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use grd_audit::{ForensicVault, Severity, SCOPE_GLOBAL};
use grd_config::canonical::{digests_match, sha256_hex};
use grd_config::ResolvedSecrets;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::{publish_or_warn, EventPublisher};
use crate::clock::Clock;
use crate::types::{FreezeState, GuardEvent, GuardEventType};

pub const HALT_ALL_TRADING: &str = "HALT ALL TRADING";

#[derive(Clone, Debug, PartialEq)]
pub struct ActivationReport {
    /// `false` when the switch was already active.
    pub newly_activated: bool,
    pub broadcast_error: Option<String>,
    pub incident_id: Option<Uuid>,
}

pub struct EmergencyKillSwitch {
    frozen: AtomicBool,
    state: Mutex<FreezeState>,
    passcode_digest: Option<String>,
    publisher: Arc<dyn EventPublisher>,
    vault: ForensicVault,
    clock: Arc<dyn Clock>,
}

impl EmergencyKillSwitch {
    pub fn new(
        passcode: Option<&str>,
        publisher: Arc<dyn EventPublisher>,
        vault: ForensicVault,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let passcode_digest = passcode.map(|p| sha256_hex(p.as_bytes()));
        if passcode_digest.is_none() {
            warn!("emergency kill switch has no passcode; deactivation disabled");
        }
        Self {
            frozen: AtomicBool::new(false),
            state: Mutex::new(FreezeState::default()),
            passcode_digest,
            publisher,
            vault,
            clock,
        }
    }

    pub fn from_secrets(
        secrets: &ResolvedSecrets,
        publisher: Arc<dyn EventPublisher>,
        vault: ForensicVault,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            secrets.emergency_passcode.as_deref(),
            publisher,
            vault,
            clock,
        )
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn state(&self) -> FreezeState {
        self.state.lock().clone()
    }

    pub fn activate(&self, actor: &str) -> ActivationReport {
        let now = self.clock.now();
        let newly_activated = {
            let mut st = self.state.lock();
            let first = !self.frozen.swap(true, Ordering::AcqRel);
            if first {
                *st = FreezeState::activated(actor, now);
            }
            first
        };

        if newly_activated {
            error!(target: "security", actor = %actor, "EMERGENCY KILL ACTIVATED; all trading halted");
        } else {
            warn!(target: "security", actor = %actor, "emergency kill re-asserted while already active");
        }

        let event = GuardEvent::new(
            GuardEventType::EmergencyKill,
            now,
            SCOPE_GLOBAL,
            Severity::Critical,
            HALT_ALL_TRADING,
        )
        .with_detail(json!({"actor": actor, "newly_activated": newly_activated}));
        let broadcast_error = publish_or_warn(self.publisher.as_ref(), &event);

        let incident_id = if newly_activated {
            self.vault
                .capture_incident(
                    SCOPE_GLOBAL,
                    now,
                    0.0,
                    json!({"trigger": "EMERGENCY_KILL", "actor": actor}),
                )
                .ok()
                .map(|i| i.incident_id)
        } else {
            None
        };

        ActivationReport {
            newly_activated,
            broadcast_error,
            incident_id,
        }
    }

    /// Clears the halt on an exact passcode match. Anything else is a silent
    /// no-op (logged). Returns whether the switch was cleared.
    pub fn deactivate(&self, passcode: &str) -> bool {
        let Some(expected) = self.passcode_digest.as_deref() else {
            warn!(target: "security", "emergency deactivate attempted but no passcode is configured");
            return false;
        };
        if !digests_match(expected, &sha256_hex(passcode.as_bytes())) {
            warn!(target: "security", "emergency deactivate rejected: wrong passcode");
            return false;
        }

        let was_frozen = {
            let mut st = self.state.lock();
            let was = self.frozen.swap(false, Ordering::AcqRel);
            *st = FreezeState::default();
            was
        };
        if !was_frozen {
            return false;
        }

        warn!(target: "security", "emergency kill deactivated");
        let event = GuardEvent::new(
            GuardEventType::EmergencyCleared,
            self.clock.now(),
            SCOPE_GLOBAL,
            Severity::Info,
            "TRADING MAY RESUME",
        );
        publish_or_warn(self.publisher.as_ref(), &event);
        true
    }
}
