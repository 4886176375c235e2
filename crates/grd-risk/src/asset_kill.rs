//! Per-position kill switch.
//!
//! Scans open positions against spot prices and issues an unconditional
//! market close for any position whose loss reaches `kill_threshold`. The
//! command goes straight to the [`LiquidationExecutor`]; the order-gate
//! pipeline is not consulted.
//!
//! Duplicate suppression is by symbol through [`LiquidationKeys`], which the
//! normal close-position path shares. Whoever claims a symbol first owns it
//! until [`LiquidationKeys::release`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use grd_audit::{ForensicVault, Severity};
use grd_config::KillSwitchSettings;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{publish_or_warn, EventPublisher};
use crate::clock::Clock;
use crate::types::{GuardEvent, GuardEventType, Position, PositionSide, Side};

pub const MARKET_CLOSE_POSITION: &str = "MARKET CLOSE POSITION";

/// Loss of one position as a fraction of entry, clamped at zero.
///
/// LONG: `(entry - current) / entry`. SHORT: `(current - entry) / entry`.
/// Returns `None` when either price is non-finite or not positive.
pub fn drawdown_pct(entry: f64, current: f64, side: PositionSide) -> Option<f64> {
    if !entry.is_finite() || !current.is_finite() || entry <= 0.0 || current <= 0.0 {
        return None;
    }
    let raw = match side {
        PositionSide::Long => (entry - current) / entry,
        PositionSide::Short => (current - entry) / entry,
    };
    Some(raw.max(0.0))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimOwner {
    Liquidation,
    ClosePath,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub owner: ClaimOwner,
    pub idempotency_key: String,
}

/// Symbol-level close registry shared by liquidation and the normal close path.
#[derive(Default)]
pub struct LiquidationKeys {
    held: Mutex<HashMap<String, Claim>>,
}

impl LiquidationKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `symbol` for `owner`. On success returns the new idempotency key;
    /// otherwise returns the existing claim untouched.
    pub fn try_claim(&self, symbol: &str, owner: ClaimOwner) -> Result<String, Claim> {
        let mut held = self.held.lock();
        if let Some(existing) = held.get(symbol) {
            return Err(existing.clone());
        }
        let prefix = match owner {
            ClaimOwner::Liquidation => "LIQ",
            ClaimOwner::ClosePath => "CLOSE",
        };
        let key = format!("{prefix}-{symbol}-{}", Uuid::new_v4().as_simple());
        held.insert(
            symbol.to_string(),
            Claim {
                owner,
                idempotency_key: key.clone(),
            },
        );
        Ok(key)
    }

    /// Called once the position is fully closed (or the close was abandoned).
    pub fn release(&self, symbol: &str) -> Option<Claim> {
        self.held.lock().remove(symbol)
    }

    pub fn holder(&self, symbol: &str) -> Option<ClaimOwner> {
        self.held.lock().get(symbol).map(|c| c.owner)
    }

    pub fn is_liquidating(&self, symbol: &str) -> bool {
        self.holder(symbol) == Some(ClaimOwner::Liquidation)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiquidationCommand {
    pub symbol: String,
    /// Closing side (SELL for a long, BUY for a short).
    pub side: Side,
    pub quantity: f64,
    pub idempotency_key: String,
    pub drawdown_pct: f64,
    pub issued_at: DateTime<Utc>,
}

/// Execution collaborator. Submission is fire-and-forget: `Ok` means the
/// command was accepted for sending, not that it filled.
pub trait LiquidationExecutor: Send + Sync {
    fn submit(&self, cmd: &LiquidationCommand) -> Result<()>;
}

/// Position flagged by [`AssetKillSwitch::inspect_portfolio`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KillCandidate {
    pub position: Position,
    pub current_price: f64,
    pub drawdown_pct: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LiquidationOutcome {
    Issued(LiquidationCommand),
    /// Symbol already claimed (liquidation in flight, or the close path has it).
    AlreadyClaimed(ClaimOwner),
    /// Executor refused the command; the key was released for the next scan.
    SubmitFailed(String),
}

pub struct AssetKillSwitch {
    kill_threshold: f64,
    keys: Arc<LiquidationKeys>,
    executor: Arc<dyn LiquidationExecutor>,
    publisher: Arc<dyn EventPublisher>,
    vault: ForensicVault,
    clock: Arc<dyn Clock>,
}

impl AssetKillSwitch {
    pub fn new(
        settings: &KillSwitchSettings,
        keys: Arc<LiquidationKeys>,
        executor: Arc<dyn LiquidationExecutor>,
        publisher: Arc<dyn EventPublisher>,
        vault: ForensicVault,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kill_threshold: settings.kill_threshold_pct,
            keys,
            executor,
            publisher,
            vault,
            clock,
        }
    }

    pub fn kill_threshold(&self) -> f64 {
        self.kill_threshold
    }

    pub fn keys(&self) -> &Arc<LiquidationKeys> {
        &self.keys
    }

    /// Every position whose drawdown is at or beyond the kill threshold.
    /// Positions without a usable price are skipped and logged.
    pub fn inspect_portfolio(
        &self,
        positions: &[Position],
        spot_prices: &HashMap<String, f64>,
    ) -> Vec<KillCandidate> {
        let mut out = Vec::new();
        for p in positions {
            if !p.quantity.is_finite() || p.quantity <= 0.0 {
                warn!(symbol = %p.symbol, quantity = %p.quantity, "kill scan: skipping position with unusable quantity");
                continue;
            }
            let Some(&price) = spot_prices.get(&p.symbol) else {
                warn!(symbol = %p.symbol, "kill scan: no spot price; skipped");
                continue;
            };
            let Some(dd) = drawdown_pct(p.entry_price, price, p.side) else {
                warn!(
                    symbol = %p.symbol,
                    entry = %p.entry_price,
                    current = %price,
                    "kill scan: unusable price data; skipped"
                );
                continue;
            };
            if dd >= self.kill_threshold {
                out.push(KillCandidate {
                    position: p.clone(),
                    current_price: price,
                    drawdown_pct: dd,
                });
            }
        }
        out
    }

    /// Issue the unconditional close for one flagged position.
    pub fn execute_liquidation(&self, candidate: &KillCandidate) -> LiquidationOutcome {
        let symbol = candidate.position.symbol.as_str();
        let key = match self.keys.try_claim(symbol, ClaimOwner::Liquidation) {
            Ok(k) => k,
            Err(existing) => {
                info!(symbol = %symbol, owner = ?existing.owner, "liquidation suppressed; symbol already claimed");
                return LiquidationOutcome::AlreadyClaimed(existing.owner);
            }
        };

        let cmd = LiquidationCommand {
            symbol: symbol.to_string(),
            side: candidate.position.side.closing_side(),
            quantity: candidate.position.quantity,
            idempotency_key: key,
            drawdown_pct: candidate.drawdown_pct,
            issued_at: self.clock.now(),
        };

        if let Err(e) = self.executor.submit(&cmd) {
            self.keys.release(symbol);
            error!(
                target: "security",
                symbol = %symbol,
                error = %e,
                "liquidation submit failed; key released for retry"
            );
            return LiquidationOutcome::SubmitFailed(e.to_string());
        }

        error!(
            target: "security",
            symbol = %symbol,
            drawdown_pct = cmd.drawdown_pct,
            idempotency_key = %cmd.idempotency_key,
            "ASSET KILL: liquidation issued"
        );

        let context = json!({
            "entry_price": candidate.position.entry_price,
            "current_price": candidate.current_price,
            "position_side": candidate.position.side,
            "quantity": cmd.quantity,
            "kill_threshold": self.kill_threshold,
            "idempotency_key": cmd.idempotency_key,
        });
        let _ = self
            .vault
            .capture_incident(symbol, cmd.issued_at, cmd.drawdown_pct, context.clone());

        let event = GuardEvent::new(
            GuardEventType::AssetLiquidation,
            cmd.issued_at,
            symbol,
            Severity::Critical,
            MARKET_CLOSE_POSITION,
        )
        .with_loss_pct(cmd.drawdown_pct)
        .with_detail(context);
        publish_or_warn(self.publisher.as_ref(), &event);

        LiquidationOutcome::Issued(cmd)
    }

    /// Inspect and liquidate. Returns the commands issued by this pass.
    pub fn scan(
        &self,
        positions: &[Position],
        spot_prices: &HashMap<String, f64>,
    ) -> Vec<LiquidationCommand> {
        self.inspect_portfolio(positions, spot_prices)
            .iter()
            .filter_map(|c| match self.execute_liquidation(c) {
                LiquidationOutcome::Issued(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }
}
