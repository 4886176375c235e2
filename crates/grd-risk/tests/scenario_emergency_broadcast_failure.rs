//! Scenario: emergency kill switch under a dead bus.
//!
//! GREEN when:
//! - `activate` with a failing publisher still leaves `frozen == true` and
//!   reports the broadcast error;
//! - every order is rejected with EMERGENCY_KILL;
//! - a wrong passcode changes nothing; the right one clears;
//! - the first activation captures a GLOBAL CRITICAL incident.

mod common;

use std::sync::Arc;

use common::{order, verified_store, FailingPublisher, RecordingExecutor, PASSCODE};
use grd_audit::{ForensicVault, Severity, SCOPE_GLOBAL};
use grd_config::{GuardrailSettings, ResolvedSecrets};
use grd_risk::{BroadcastPublisher, Decision, GuardEventType, GuardrailSystem, ReasonCode};

#[test]
fn broadcast_failure_never_rolls_back_freeze() {
    let (vault, incidents) = ForensicVault::in_memory();
    let sys = GuardrailSystem::builder(GuardrailSettings::default())
        .store(verified_store())
        .publisher(Arc::new(FailingPublisher))
        .vault(vault)
        .executor(Arc::new(RecordingExecutor::default()))
        .secrets(&ResolvedSecrets {
            emergency_passcode: Some(PASSCODE.to_string()),
        })
        .start_of_day_equity(250_000.0)
        .build()
        .unwrap();

    let report = sys.emergency.activate("cro");
    assert!(report.newly_activated);
    assert!(report.broadcast_error.is_some());
    assert!(sys.emergency.is_frozen());
    assert_eq!(sys.emergency.state().activated_by.as_deref(), Some("cro"));

    assert_eq!(
        sys.evaluate(&order("u1", "EURUSD", 1.0)),
        Decision::Reject(ReasonCode::EmergencyKill)
    );

    let all = incidents.incidents();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].scope, SCOPE_GLOBAL);
    assert_eq!(all[0].severity, Severity::Critical);
    assert_eq!(report.incident_id, Some(all[0].incident_id));

    assert!(!sys.emergency.deactivate("guess"));
    assert!(sys.emergency.is_frozen());
    assert!(sys.emergency.deactivate(PASSCODE));
    assert!(!sys.emergency.is_frozen());
    assert_eq!(sys.evaluate(&order("u1", "EURUSD", 1.0)), Decision::Approve);
}

#[test]
fn activation_reaches_broadcast_subscribers() {
    let bus = Arc::new(BroadcastPublisher::new(16));
    let mut rx = bus.subscribe();
    let sys = GuardrailSystem::builder(GuardrailSettings::default())
        .store(verified_store())
        .publisher(bus.clone())
        .vault(ForensicVault::in_memory().0)
        .executor(Arc::new(RecordingExecutor::default()))
        .start_of_day_equity(250_000.0)
        .build()
        .unwrap();

    let report = sys.emergency.activate("cro");
    assert!(report.broadcast_error.is_none());
    let ev = rx.try_recv().unwrap();
    assert_eq!(ev.event_type, GuardEventType::EmergencyKill);
    assert_eq!(ev.scope, SCOPE_GLOBAL);

    // No passcode configured: nothing can clear it.
    assert!(!sys.emergency.deactivate(""));
    assert!(sys.emergency.is_frozen());
}

#[test]
fn emergency_and_portfolio_freeze_are_independent() {
    let h = common::harness();
    h.sys.monitor.admin_lock("ops");
    h.sys.emergency.activate("cro");
    assert!(h.sys.emergency.deactivate(PASSCODE));

    // Clearing the emergency does not clear Zen Mode.
    assert_eq!(
        h.sys.evaluate(&order("u1", "EURUSD", 1.0)),
        Decision::Reject(ReasonCode::ZenMode)
    );
}
