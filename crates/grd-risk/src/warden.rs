//! Per-trade risk gate ("Warden") and its latching circuit breaker.
//!
//! Evaluation order inside [`PerTradeRiskGate::validate_order`]:
//!
//! 1. Safe Mode (no trusted thresholds) rejects everything.
//! 2. Sanity clamps: non-finite or out-of-range numbers reject with `BAD_INPUT`.
//! 3. Breaker: already tripped, or the daily loss reaches the limit (which trips it).
//! 4. Per-trade cap: `proposed_risk <= balance * max_position_size_pct`.
//! 5. Optional leverage and stop-distance checks.
//!
//! All thresholds in one evaluation come from a single store snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use grd_audit::{ForensicVault, Severity, SCOPE_PORTFOLIO};
use grd_config::{RiskConfiguration, RiskParameterStore};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::bus::{publish_or_warn, EventPublisher};
use crate::clock::Clock;
use crate::types::{Decision, GuardEvent, GuardEventType, OrderIntent, ReasonCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Armed,
    Halt,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub trip_reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
}

/// ARMED → TRIPPED latch. Only [`CircuitBreaker::reset`] re-arms it.
///
/// `tripped` is the lock-free hot-path flag; the reason and timestamp sit
/// behind a mutex and are only written on transitions.
#[derive(Default)]
pub struct CircuitBreaker {
    tripped: AtomicBool,
    detail: Mutex<(Option<String>, Option<DateTime<Utc>>)>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn check_circuit(&self) -> CircuitState {
        if self.is_tripped() {
            CircuitState::Halt
        } else {
            CircuitState::Armed
        }
    }

    /// Latch the breaker. Returns `true` only for the call that moved it from
    /// ARMED to TRIPPED; later trips keep the first reason.
    pub fn trip(&self, reason: &str, at: DateTime<Utc>) -> bool {
        let mut detail = self.detail.lock();
        let first = !self.tripped.swap(true, Ordering::AcqRel);
        if first {
            *detail = (Some(reason.to_string()), Some(at));
        }
        first
    }

    pub fn reset(&self) {
        let mut detail = self.detail.lock();
        self.tripped.store(false, Ordering::Release);
        *detail = (None, None);
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let detail = self.detail.lock();
        CircuitBreakerStatus {
            state: self.check_circuit(),
            trip_reason: detail.0.clone(),
            tripped_at: detail.1,
        }
    }
}

/// `proposed_risk <= balance * max_fraction`.
pub fn within_trade_risk(balance: f64, proposed_risk: f64, max_fraction: f64) -> bool {
    proposed_risk <= balance * max_fraction
}

/// `daily_loss / balance` for events and incidents. Finite inputs can still
/// overflow (a tiny balance against a large loss); that saturates to
/// `f64::MAX` instead of producing infinity.
fn loss_fraction(balance: f64, daily_loss: f64) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }
    let pct = daily_loss.max(0.0) / balance;
    if pct.is_finite() {
        pct
    } else {
        f64::MAX
    }
}

/// `daily_loss >= balance * limit_fraction`. A negative loss (a profit) counts as zero.
pub fn reaches_daily_limit(balance: f64, daily_loss: f64, limit_fraction: f64) -> bool {
    daily_loss.max(0.0) >= balance * limit_fraction
}

pub struct PerTradeRiskGate {
    store: Arc<RiskParameterStore>,
    breaker: CircuitBreaker,
    publisher: Arc<dyn EventPublisher>,
    vault: ForensicVault,
    clock: Arc<dyn Clock>,
}

impl PerTradeRiskGate {
    pub fn new(
        store: Arc<RiskParameterStore>,
        publisher: Arc<dyn EventPublisher>,
        vault: ForensicVault,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(),
            publisher,
            vault,
            clock,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn check_circuit(&self) -> CircuitState {
        self.breaker.check_circuit()
    }

    /// Per-trade cap against the active configuration.
    pub fn check_trade_risk(&self, balance: f64, proposed_risk: f64) -> bool {
        let cfg = self.store.snapshot();
        within_trade_risk(balance, proposed_risk, cfg.record.max_position_size_pct)
    }

    /// Daily-loss freeze check. A `true` result trips the breaker.
    ///
    /// In Safe Mode the answer is `true` but the breaker is left alone: the
    /// zeroed limit is not a real observation, and a latch taken here would
    /// outlive the Safe Mode that caused it.
    pub fn check_portfolio_freeze(&self, balance: f64, daily_loss: f64) -> bool {
        let cfg = self.store.snapshot();
        if cfg.is_safe_mode() {
            return true;
        }
        self.freeze_against(&cfg.record, balance, daily_loss)
    }

    fn freeze_against(&self, record: &RiskConfiguration, balance: f64, daily_loss: f64) -> bool {
        if !balance.is_finite() || !daily_loss.is_finite() {
            self.trip_with(
                "BAD_INPUT: non-finite balance or daily loss",
                json!({"balance": balance.to_string(), "daily_loss": daily_loss.to_string()}),
                0.0,
            );
            return true;
        }
        let limit = record.daily_drawdown_limit_pct;
        if reaches_daily_limit(balance, daily_loss, limit) {
            let loss_pct = loss_fraction(balance, daily_loss);
            self.trip_with(
                "DAILY_LOSS_LIMIT",
                json!({
                    "balance": balance,
                    "daily_loss": daily_loss,
                    "daily_drawdown_limit_pct": limit,
                }),
                loss_pct,
            );
            return true;
        }
        false
    }

    /// Explicit trip (operator or upstream layer).
    pub fn trip(&self, reason: &str) {
        self.trip_with(reason, json!({"source": "explicit"}), 0.0);
    }

    /// Privileged: re-arm the breaker. Caller authorization is external.
    pub fn reset(&self, actor: &str) {
        let was = self.breaker.status();
        self.breaker.reset();
        warn!(
            target: "security",
            actor = %actor,
            previous_reason = ?was.trip_reason,
            "circuit breaker reset; trading re-enabled"
        );
    }

    fn trip_with(&self, reason: &str, detail: serde_json::Value, loss_pct: f64) {
        let now = self.clock.now();
        if !self.breaker.trip(reason, now) {
            return;
        }
        error!(target: "security", reason = %reason, "CIRCUIT BREAKER TRIPPED; trading halted");

        let event = GuardEvent::new(
            GuardEventType::CircuitBreakerTripped,
            now,
            SCOPE_PORTFOLIO,
            Severity::Critical,
            "REJECT NEW ORDERS UNTIL RESET",
        )
        .with_loss_pct(loss_pct)
        .with_detail(json!({"reason": reason, "context": detail}));
        publish_or_warn(self.publisher.as_ref(), &event);

        // Capture failures are logged by the vault; the trip stands.
        let _ = self.vault.capture_incident(
            SCOPE_PORTFOLIO,
            now,
            loss_pct,
            json!({"trigger": "CIRCUIT_BREAKER_TRIPPED", "reason": reason, "context": detail}),
        );
    }

    /// Full per-trade evaluation.
    pub fn validate_order(&self, order: &OrderIntent) -> Decision {
        let cfg = self.store.snapshot();
        if let Some(cause) = cfg.safe_mode {
            return Decision::Reject(ReasonCode::SafeMode(cause));
        }

        if let Some(field) = bad_input_field(order) {
            warn!(
                subject = %order.subject_id,
                symbol = %order.symbol,
                field,
                "order rejected: bad input"
            );
            return Decision::Reject(ReasonCode::BadInput);
        }

        if self.breaker.is_tripped() {
            return Decision::Reject(ReasonCode::CircuitBreakerTripped);
        }
        if self.freeze_against(&cfg.record, order.account_balance, order.daily_loss_to_date) {
            return Decision::Reject(ReasonCode::CircuitBreakerTripped);
        }

        let r = &cfg.record;
        if !within_trade_risk(
            order.account_balance,
            order.proposed_risk_amount,
            r.max_position_size_pct,
        ) {
            return Decision::Reject(ReasonCode::RiskExceeds1Percent);
        }

        if let Some(notional) = order.notional {
            if notional / order.account_balance > r.max_leverage_ratio {
                return Decision::Reject(ReasonCode::LeverageExceeded);
            }
        }

        if let Some(pips) = order.stop_loss_pips {
            if pips < r.min_stop_loss_pips {
                return Decision::Reject(ReasonCode::StopLossTooTight);
            }
        }

        Decision::Approve
    }
}

/// Sanity clamps on the intent. Returns the first offending field.
fn bad_input_field(o: &OrderIntent) -> Option<&'static str> {
    if !o.account_balance.is_finite() || o.account_balance <= 0.0 {
        return Some("account_balance");
    }
    if !o.proposed_risk_amount.is_finite() || o.proposed_risk_amount < 0.0 {
        return Some("proposed_risk_amount");
    }
    if !o.daily_loss_to_date.is_finite() {
        return Some("daily_loss_to_date");
    }
    if !o.quantity.is_finite() || o.quantity <= 0.0 {
        return Some("quantity");
    }
    if let Some(n) = o.notional {
        if !n.is_finite() || n < 0.0 {
            return Some("notional");
        }
    }
    if let Some(p) = o.stop_loss_pips {
        if !p.is_finite() || p < 0.0 {
            return Some("stop_loss_pips");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingPublisher;
    use crate::clock::SystemClock;
    use crate::types::Side;

    fn verified_store() -> Arc<RiskParameterStore> {
        let store = Arc::new(RiskParameterStore::new());
        let rec = RiskConfiguration {
            id: "core".into(),
            version: 1,
            max_position_size_pct: 0.01,
            daily_drawdown_limit_pct: 0.03,
            max_leverage_ratio: 10.0,
            min_stop_loss_pips: 5.0,
        };
        let h = rec.compute_hash().unwrap();
        store.hydrate(rec, &h).unwrap();
        store
    }

    fn gate(store: Arc<RiskParameterStore>) -> (PerTradeRiskGate, Arc<RecordingPublisher>) {
        let rec = Arc::new(RecordingPublisher::new());
        let (vault, _) = ForensicVault::in_memory();
        let g = PerTradeRiskGate::new(store, rec.clone(), vault, Arc::new(SystemClock));
        (g, rec)
    }

    fn intent(risk: f64) -> OrderIntent {
        OrderIntent {
            subject_id: "u1".into(),
            symbol: "EURUSD".into(),
            side: Side::Buy,
            quantity: 10_000.0,
            proposed_risk_amount: risk,
            account_balance: 10_000.0,
            daily_loss_to_date: 0.0,
            notional: None,
            stop_loss_pips: None,
        }
    }

    #[test]
    fn one_percent_boundary() {
        let (g, _) = gate(verified_store());
        assert!(g.check_trade_risk(10_000.0, 100.0));
        assert!(!g.check_trade_risk(10_000.0, 101.0));
        assert_eq!(g.validate_order(&intent(100.0)), Decision::Approve);
        assert_eq!(
            g.validate_order(&intent(101.0)),
            Decision::Reject(ReasonCode::RiskExceeds1Percent)
        );
    }

    #[test]
    fn trip_latches_until_reset() {
        let (g, events) = gate(verified_store());
        g.trip("manual");
        for _ in 0..5 {
            assert_eq!(g.check_circuit(), CircuitState::Halt);
            assert_eq!(
                g.validate_order(&intent(1.0)),
                Decision::Reject(ReasonCode::CircuitBreakerTripped)
            );
        }
        g.trip("again");
        assert_eq!(events.events().len(), 1, "one event per latch");
        assert_eq!(g.breaker().status().trip_reason.as_deref(), Some("manual"));

        g.reset("ops");
        assert_eq!(g.check_circuit(), CircuitState::Armed);
        assert_eq!(g.validate_order(&intent(1.0)), Decision::Approve);
    }

    #[test]
    fn daily_loss_at_limit_trips_breaker() {
        let (g, _) = gate(verified_store());
        assert!(!g.check_portfolio_freeze(10_000.0, 299.0));
        assert_eq!(g.check_circuit(), CircuitState::Armed);
        assert!(g.check_portfolio_freeze(10_000.0, 300.0));
        assert_eq!(g.check_circuit(), CircuitState::Halt);
    }

    #[test]
    fn overflowing_loss_ratio_stays_finite() {
        assert_eq!(loss_fraction(1e-300, 1e10), f64::MAX);
        assert_eq!(loss_fraction(10_000.0, 300.0), 0.03);
        assert_eq!(loss_fraction(0.0, 300.0), 0.0);
    }

    #[test]
    fn profit_never_trips() {
        let (g, _) = gate(verified_store());
        assert!(!g.check_portfolio_freeze(10_000.0, -5_000.0));
    }

    #[test]
    fn safe_mode_rejects_without_tripping() {
        let store = Arc::new(RiskParameterStore::new());
        let (g, _) = gate(store);
        assert_eq!(
            g.validate_order(&intent(0.0)),
            Decision::Reject(ReasonCode::SafeMode(grd_config::SafeModeCause::NotHydrated))
        );
        assert!(g.check_portfolio_freeze(10_000.0, 0.0));
        assert_eq!(g.check_circuit(), CircuitState::Armed);
    }

    #[test]
    fn nan_balance_is_bad_input() {
        let (g, _) = gate(verified_store());
        let mut i = intent(10.0);
        i.account_balance = f64::NAN;
        assert_eq!(g.validate_order(&i), Decision::Reject(ReasonCode::BadInput));
        let mut i = intent(-1.0);
        i.proposed_risk_amount = -1.0;
        assert_eq!(g.validate_order(&i), Decision::Reject(ReasonCode::BadInput));
    }

    #[test]
    fn leverage_and_stop_checks() {
        let (g, _) = gate(verified_store());
        let mut i = intent(50.0);
        i.notional = Some(100_001.0);
        assert_eq!(
            g.validate_order(&i),
            Decision::Reject(ReasonCode::LeverageExceeded)
        );
        i.notional = Some(100_000.0);
        i.stop_loss_pips = Some(4.0);
        assert_eq!(
            g.validate_order(&i),
            Decision::Reject(ReasonCode::StopLossTooTight)
        );
        i.stop_loss_pips = Some(5.0);
        assert_eq!(g.validate_order(&i), Decision::Approve);
    }
}
