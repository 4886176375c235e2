//! Portfolio-wide daily drawdown monitor ("Zen Mode").
//!
//! # Invariants
//!
//! - `drawdown_pct` is never negative.
//! - The freeze latches on the first observed breach and stays latched when
//!   P&L later recovers. Only [`PortfolioDrawdownMonitor::roll_day`] and
//!   [`PortfolioDrawdownMonitor::admin_clear`] release it.
//! - One freeze broadcast per latch.
//! - Non-finite P&L is bad input: it latches a freeze rather than being ignored.
//! - In Safe Mode no breach is evaluated (the limit is not trusted) and trading
//!   is reported as not allowed with the Safe Mode reason.

use std::sync::Arc;

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use grd_audit::{ForensicVault, Severity, SCOPE_PORTFOLIO};
use grd_config::{ActiveConfig, RiskParameterStore};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::bus::{publish_or_warn, EventPublisher};
use crate::clock::Clock;
use crate::types::{FreezeState, GuardEvent, GuardEventType, ReasonCode};

pub const SYSTEM_READY: &str = "SYSTEM_READY";
pub const CANCEL_ALL_OPEN_ORDERS: &str = "CANCEL ALL OPEN ORDERS";

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DailyPnLState {
    pub start_of_day_equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

impl DailyPnLState {
    pub fn new(start_of_day_equity: f64) -> Self {
        Self {
            start_of_day_equity,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    pub fn current_equity(&self) -> f64 {
        self.start_of_day_equity + self.realized_pnl + self.unrealized_pnl
    }

    /// `max(0, (start - current) / start)`.
    pub fn drawdown_pct(&self) -> f64 {
        if self.start_of_day_equity <= 0.0 {
            return 0.0;
        }
        let dd = (self.start_of_day_equity - self.current_equity()) / self.start_of_day_equity;
        dd.max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreezeCause {
    DrawdownBreach,
    AdminLock,
    BadInput,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioFreeze {
    pub state: FreezeState,
    pub cause: Option<FreezeCause>,
    /// Drawdown observed when the latch was taken.
    pub drawdown_at_latch: Option<f64>,
}

impl PortfolioFreeze {
    fn clear() -> Self {
        Self {
            state: FreezeState::default(),
            cause: None,
            drawdown_at_latch: None,
        }
    }
}

struct Inner {
    pnl: DailyPnLState,
    freeze: PortfolioFreeze,
}

/// A latch taken under the lock, broadcast once the lock is released.
struct Latched {
    cause: FreezeCause,
    by: String,
    pnl: DailyPnLState,
    drawdown: Option<f64>,
    at: DateTime<Utc>,
}

impl Inner {
    fn latch(
        &mut self,
        cause: FreezeCause,
        by: &str,
        drawdown: Option<f64>,
        at: DateTime<Utc>,
    ) -> Option<Latched> {
        if self.freeze.state.frozen {
            return None;
        }
        self.freeze = PortfolioFreeze {
            state: FreezeState::activated(by, at),
            cause: Some(cause),
            drawdown_at_latch: drawdown,
        };
        Some(Latched {
            cause,
            by: by.to_string(),
            pnl: self.pnl,
            drawdown,
            at,
        })
    }

    /// Breach check against the snapshot held by this same lock.
    fn observe(&mut self, cfg: &ActiveConfig, at: DateTime<Utc>) -> Option<Latched> {
        if cfg.is_safe_mode() {
            return None;
        }
        let dd = self.pnl.drawdown_pct();
        if dd >= cfg.record.daily_drawdown_limit_pct {
            self.latch(FreezeCause::DrawdownBreach, "DRAWDOWN_MONITOR", Some(dd), at)
        } else {
            None
        }
    }
}

pub struct PortfolioDrawdownMonitor {
    store: Arc<RiskParameterStore>,
    publisher: Arc<dyn EventPublisher>,
    vault: ForensicVault,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

fn check_start_equity(start: f64) -> Result<()> {
    ensure!(
        start.is_finite() && start > 0.0,
        "start_of_day_equity must be finite and > 0, got {start}"
    );
    Ok(())
}

impl PortfolioDrawdownMonitor {
    pub fn new(
        store: Arc<RiskParameterStore>,
        start_of_day_equity: f64,
        publisher: Arc<dyn EventPublisher>,
        vault: ForensicVault,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        check_start_equity(start_of_day_equity)?;
        Ok(Self {
            store,
            publisher,
            vault,
            clock,
            inner: Mutex::new(Inner {
                pnl: DailyPnLState::new(start_of_day_equity),
                freeze: PortfolioFreeze::clear(),
            }),
        })
    }

    /// Replace the P&L snapshot and evaluate the breach.
    ///
    /// The write and the breach check share one critical section, so a
    /// breaching snapshot always latches even if another caller overwrites
    /// it immediately afterwards.
    pub fn update_pnl(&self, realized: f64, unrealized: f64) {
        let now = self.clock.now();
        if !realized.is_finite() || !unrealized.is_finite() {
            error!(
                target: "security",
                realized = %realized,
                unrealized = %unrealized,
                "non-finite P&L update; latching freeze"
            );
            let latched = self.inner.lock().latch(FreezeCause::BadInput, "BAD_INPUT", None, now);
            self.announce(latched);
            return;
        }
        let cfg = self.store.snapshot();
        let latched = {
            let mut inner = self.inner.lock();
            inner.pnl.realized_pnl = realized;
            inner.pnl.unrealized_pnl = unrealized;
            inner.observe(&cfg, now)
        };
        self.announce(latched);
    }

    pub fn pnl(&self) -> DailyPnLState {
        self.inner.lock().pnl
    }

    pub fn drawdown_pct(&self) -> f64 {
        self.inner.lock().pnl.drawdown_pct()
    }

    /// Current drawdown against the configured limit (`>=`). Always `false`
    /// in Safe Mode.
    pub fn is_breached(&self) -> bool {
        let cfg = self.store.snapshot();
        if cfg.is_safe_mode() {
            return false;
        }
        self.drawdown_pct() >= cfg.record.daily_drawdown_limit_pct
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().freeze.state.frozen
    }

    pub fn freeze(&self) -> PortfolioFreeze {
        self.inner.lock().freeze.clone()
    }

    /// Typed form of [`Self::is_trading_allowed`]: the rejection code that
    /// applies right now, if any.
    pub fn blocking_reason(&self) -> Option<ReasonCode> {
        let cfg = self.store.snapshot();
        if let Some(cause) = cfg.safe_mode {
            return Some(ReasonCode::SafeMode(cause));
        }
        let now = self.clock.now();
        let (latched, frozen) = {
            let mut inner = self.inner.lock();
            let latched = inner.observe(&cfg, now);
            (latched, inner.freeze.state.frozen)
        };
        self.announce(latched);
        frozen.then_some(ReasonCode::ZenMode)
    }

    /// `(allowed, reason)`. Reasons: `SYSTEM_READY`, `ZEN_MODE: ...`,
    /// `SAFE_MODE:<cause>`.
    pub fn is_trading_allowed(&self) -> (bool, String) {
        match self.blocking_reason() {
            None => (true, SYSTEM_READY.to_string()),
            Some(ReasonCode::SafeMode(cause)) => (false, cause.reason_code().to_string()),
            Some(_) => (false, self.zen_reason()),
        }
    }

    fn zen_reason(&self) -> String {
        let inner = self.inner.lock();
        match inner.freeze.cause {
            Some(FreezeCause::AdminLock) => {
                let by = inner.freeze.state.activated_by.as_deref().unwrap_or("unknown");
                format!("ZEN_MODE: administrative lock by {by}")
            }
            Some(FreezeCause::BadInput) => "ZEN_MODE: invalid P&L input".to_string(),
            _ => format!(
                "ZEN_MODE: daily drawdown {:.2}% reached limit",
                inner.freeze.drawdown_at_latch.unwrap_or(0.0) * 100.0
            ),
        }
    }

    /// Privileged: latch an administrative freeze.
    pub fn admin_lock(&self, actor: &str) {
        warn!(target: "security", actor = %actor, "portfolio administratively locked");
        let now = self.clock.now();
        let latched = self.inner.lock().latch(FreezeCause::AdminLock, actor, None, now);
        self.announce(latched);
    }

    /// Privileged: release any latch. The P&L snapshot is kept.
    pub fn admin_clear(&self, actor: &str) {
        let mut inner = self.inner.lock();
        let was = inner.freeze.cause;
        inner.freeze = PortfolioFreeze::clear();
        warn!(target: "security", actor = %actor, previous = ?was, "portfolio freeze cleared");
    }

    /// Start a new trading day: fresh snapshot, latch released.
    pub fn roll_day(&self, start_of_day_equity: f64) -> Result<()> {
        check_start_equity(start_of_day_equity)?;
        let mut inner = self.inner.lock();
        inner.pnl = DailyPnLState::new(start_of_day_equity);
        inner.freeze = PortfolioFreeze::clear();
        info!(start_of_day_equity, "trading day rolled; drawdown monitor reset");
        Ok(())
    }

    fn announce(&self, latched: Option<Latched>) {
        let Some(Latched {
            cause,
            by,
            pnl,
            drawdown,
            at,
        }) = latched
        else {
            return;
        };
        let loss_pct = drawdown.unwrap_or_else(|| pnl.drawdown_pct());
        error!(
            target: "security",
            cause = ?cause,
            activated_by = %by,
            loss_pct,
            resulting_equity = pnl.current_equity(),
            "ZEN MODE: portfolio frozen"
        );

        let detail = json!({
            "cause": cause,
            "activated_by": by,
            "start_of_day_equity": pnl.start_of_day_equity,
            "realized_pnl": pnl.realized_pnl,
            "unrealized_pnl": pnl.unrealized_pnl,
            "resulting_equity": pnl.current_equity(),
        });
        let event = GuardEvent::new(
            GuardEventType::PortfolioFreeze,
            at,
            SCOPE_PORTFOLIO,
            Severity::Critical,
            CANCEL_ALL_OPEN_ORDERS,
        )
        .with_loss_pct(loss_pct)
        .with_detail(detail.clone());
        publish_or_warn(self.publisher.as_ref(), &event);

        let _ = self.vault.capture_incident(
            SCOPE_PORTFOLIO,
            at,
            loss_pct,
            json!({"trigger": "PORTFOLIO_FREEZE", "context": detail}),
        );
    }
}
