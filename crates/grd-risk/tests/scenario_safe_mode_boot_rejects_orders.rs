//! Scenario: fail-closed boot and tamper-evident configuration.
//!
//! GREEN when:
//! - before any hydrate every order is rejected with SAFE_MODE:NOT_HYDRATED;
//! - a tampered record yields SAFE_MODE:INTEGRITY_FAIL and a 0.0 per-trade cap;
//! - a later verified hydrate lets a 1% order through and rejects 1% + 1.

mod common;

use std::sync::Arc;

use common::{harness_with, order, record};
use grd_config::{RiskParameterStore, SafeModeCause};
use grd_risk::{Decision, ReasonCode};

#[test]
fn unhydrated_store_rejects_every_order() {
    let h = harness_with(Arc::new(RiskParameterStore::new()), 100_000.0);

    for risk in [0.0, 1.0, 100.0] {
        assert_eq!(
            h.sys.evaluate(&order("u1", "EURUSD", risk)),
            Decision::Reject(ReasonCode::SafeMode(SafeModeCause::NotHydrated))
        );
    }
    let (ok, reason) = h.sys.monitor.is_trading_allowed();
    assert!(!ok);
    assert_eq!(reason, "SAFE_MODE:NOT_HYDRATED");
}

#[test]
fn tampered_record_forces_safe_mode() {
    let store = Arc::new(RiskParameterStore::new());
    let h = harness_with(store.clone(), 100_000.0);

    let signed = record().compute_hash().unwrap();
    let mut tampered = record();
    tampered.max_position_size_pct = 0.02;
    store.hydrate(tampered, &signed).unwrap();

    assert!(store.is_safe_mode());
    assert_eq!(store.get("max_position_size_pct", 0.5), 0.0);
    assert_eq!(
        h.sys.evaluate(&order("u1", "EURUSD", 50.0)),
        Decision::Reject(ReasonCode::SafeMode(SafeModeCause::IntegrityFail))
    );
    assert!(!h.sys.warden.check_trade_risk(10_000.0, 1.0));
}

#[test]
fn verified_hydrate_after_failure_restores_trading() {
    let store = Arc::new(RiskParameterStore::new());
    let h = harness_with(store.clone(), 100_000.0);

    store.hydrate(record(), "deadbeef").unwrap();
    assert!(store.is_safe_mode());

    let good = record();
    let hash = good.compute_hash().unwrap();
    store.hydrate(good, &hash).unwrap();

    assert_eq!(h.sys.evaluate(&order("u1", "EURUSD", 100.0)), Decision::Approve);
    assert_eq!(
        h.sys.evaluate(&order("u1", "EURUSD", 101.0)),
        Decision::Reject(ReasonCode::RiskExceeds1Percent)
    );
}

#[test]
fn safe_mode_never_latches_breaker_or_freeze() {
    let store = Arc::new(RiskParameterStore::new());
    let h = harness_with(store.clone(), 100_000.0);

    // Zeroed Safe Mode limits must not leave latches behind.
    h.sys.monitor.update_pnl(-10.0, 0.0);
    let _ = h.sys.evaluate(&order("u1", "EURUSD", 1.0));
    assert!(!h.sys.monitor.is_frozen());
    assert!(!h.sys.warden.breaker().is_tripped());

    let good = record();
    let hash = good.compute_hash().unwrap();
    store.hydrate(good, &hash).unwrap();
    assert_eq!(h.sys.evaluate(&order("u2", "EURUSD", 1.0)), Decision::Approve);
}
