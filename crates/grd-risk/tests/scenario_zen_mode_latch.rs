//! Scenario: portfolio daily drawdown freeze.
//!
//! GREEN when:
//! - 100k start, -2000 realized, -1500 unrealized → 3.5% → ZEN_MODE at a 3% limit;
//! - exactly one PORTFOLIO_FREEZE broadcast with "CANCEL ALL OPEN ORDERS";
//! - P&L recovery leaves the latch in place;
//! - roll_day and admin_clear release it;
//! - a NaN update latches a freeze instead of being ignored.

mod common;

use common::harness;
use grd_audit::Severity;
use grd_risk::{
    Decision, FreezeCause, GuardEventType, ReasonCode, CANCEL_ALL_OPEN_ORDERS, SYSTEM_READY,
};

fn freeze_events(h: &common::Harness) -> Vec<grd_risk::GuardEvent> {
    h.events
        .events()
        .into_iter()
        .filter(|e| e.event_type == GuardEventType::PortfolioFreeze)
        .collect()
}

#[test]
fn breach_freezes_and_broadcasts_once() {
    let h = harness();
    let m = &h.sys.monitor;

    m.update_pnl(-1_000.0, -500.0);
    assert_eq!(m.is_trading_allowed(), (true, SYSTEM_READY.to_string()));

    m.update_pnl(-2_000.0, -1_500.0);
    assert!((m.drawdown_pct() - 0.035).abs() < 1e-12);
    assert!(m.is_breached());

    let (ok, reason) = m.is_trading_allowed();
    assert!(!ok);
    assert!(reason.starts_with("ZEN_MODE"), "reason: {reason}");

    // Repeated observations do not re-broadcast.
    m.update_pnl(-2_500.0, -1_500.0);
    let _ = m.is_trading_allowed();

    let events = freeze_events(&h);
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev.recommended_action, CANCEL_ALL_OPEN_ORDERS);
    assert_eq!(ev.severity, Severity::Critical);
    assert!((ev.loss_pct.unwrap() - 0.035).abs() < 1e-12);
    assert_eq!(ev.detail["resulting_equity"].as_f64(), Some(96_500.0));

    assert_eq!(h.incidents.len(), 1);
}

#[test]
fn exact_limit_counts_as_breach() {
    let h = harness();
    h.sys.monitor.update_pnl(-3_500.0, 0.0);
    assert!(h.sys.monitor.is_frozen());
}

#[test]
fn recovery_does_not_unfreeze() {
    let h = harness();
    let m = &h.sys.monitor;
    m.update_pnl(-2_000.0, -1_500.0);
    m.update_pnl(5_000.0, 0.0);

    assert!(!m.is_breached());
    assert!(m.is_frozen());
    assert_eq!(
        h.sys.evaluate(&common::order("u1", "EURUSD", 1.0)),
        Decision::Reject(ReasonCode::ZenMode)
    );
}

#[test]
fn roll_day_releases_latch() {
    let h = harness();
    let m = &h.sys.monitor;
    m.update_pnl(-4_000.0, 0.0);
    assert!(m.is_frozen());

    m.roll_day(96_000.0).unwrap();
    assert!(!m.is_frozen());
    assert_eq!(m.drawdown_pct(), 0.0);
    assert!(m.is_trading_allowed().0);
    assert!(m.roll_day(0.0).is_err());
}

#[test]
fn admin_clear_releases_latch_and_admin_lock_sets_it() {
    let h = harness();
    let m = &h.sys.monitor;

    m.admin_lock("risk-desk");
    let (ok, reason) = m.is_trading_allowed();
    assert!(!ok);
    assert!(reason.contains("risk-desk"));
    assert_eq!(m.freeze().cause, Some(FreezeCause::AdminLock));

    m.admin_clear("risk-desk");
    assert_eq!(m.is_trading_allowed(), (true, SYSTEM_READY.to_string()));
}

#[test]
fn nan_pnl_latches_bad_input_freeze() {
    let h = harness();
    let m = &h.sys.monitor;
    m.update_pnl(f64::NAN, 0.0);

    assert!(m.is_frozen());
    assert_eq!(m.freeze().cause, Some(FreezeCause::BadInput));
    // Snapshot untouched by the bad update.
    assert_eq!(m.pnl().realized_pnl, 0.0);
    assert_eq!(freeze_events(&h).len(), 1);
}

#[test]
fn incident_and_event_share_the_injected_clock() {
    let h = harness();
    h.clock.advance(chrono::Duration::minutes(17));
    let at = {
        use grd_risk::Clock;
        h.clock.now()
    };

    h.sys.monitor.update_pnl(-3_500.0, 0.0);

    let ev = freeze_events(&h);
    assert_eq!(ev.len(), 1);
    assert_eq!(ev[0].timestamp, at);
    let incidents = h.incidents.incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].timestamp, at);
    assert_eq!(incidents[0].severity, Severity::Critical);
}
