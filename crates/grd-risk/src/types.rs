use std::fmt;

use chrono::{DateTime, Utc};
use grd_audit::Severity;
use grd_config::SafeModeCause;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Order direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Direction of an open position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The order side that closes a position of this direction.
    pub fn closing_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

/// Open position as reported by the portfolio collaborator. Read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub side: PositionSide,
    pub quantity: f64,
}

/// A proposed order, as submitted to [`crate::OrderGuard::evaluate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// User or strategy the order is attributed to (behavioral lock key).
    pub subject_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    /// Amount at risk if the stop is hit, in account currency.
    pub proposed_risk_amount: f64,
    pub account_balance: f64,
    /// Realized loss so far today, positive = loss.
    pub daily_loss_to_date: f64,
    #[serde(default)]
    pub notional: Option<f64>,
    #[serde(default)]
    pub stop_loss_pips: Option<f64>,
}

/// Stable rejection codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    RiskExceeds1Percent,
    CircuitBreakerTripped,
    ZenMode,
    CoolingOff,
    SafeMode(SafeModeCause),
    EmergencyKill,
    AssetKillActive,
    LeverageExceeded,
    StopLossTooTight,
    BadInput,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RiskExceeds1Percent => "RISK_EXCEEDS_1_PERCENT",
            ReasonCode::CircuitBreakerTripped => "CIRCUIT_BREAKER_TRIPPED",
            ReasonCode::ZenMode => "ZEN_MODE",
            ReasonCode::CoolingOff => "COOLING_OFF",
            ReasonCode::SafeMode(cause) => cause.reason_code(),
            ReasonCode::EmergencyKill => "EMERGENCY_KILL",
            ReasonCode::AssetKillActive => "ASSET_KILL_ACTIVE",
            ReasonCode::LeverageExceeded => "LEVERAGE_EXCEEDED",
            ReasonCode::StopLossTooTight => "STOP_LOSS_TOO_TIGHT",
            ReasonCode::BadInput => "BAD_INPUT",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of an order evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject(ReasonCode),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approve)
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Decision::Approve => None,
            Decision::Reject(code) => Some(*code),
        }
    }
}

#[derive(Serialize)]
struct DecisionWire {
    action: &'static str,
    reason_code: Option<&'static str>,
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Decision::Approve => DecisionWire {
                action: "APPROVE",
                reason_code: None,
            },
            Decision::Reject(code) => DecisionWire {
                action: "REJECT",
                reason_code: Some(code.as_str()),
            },
        };
        wire.serialize(serializer)
    }
}

/// Who froze the system, and when.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FreezeState {
    pub frozen: bool,
    pub activated_by: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl FreezeState {
    pub(crate) fn activated(by: &str, at: DateTime<Utc>) -> Self {
        Self {
            frozen: true,
            activated_by: Some(by.to_string()),
            activated_at: Some(at),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardEventType {
    EmergencyKill,
    EmergencyCleared,
    PortfolioFreeze,
    AssetLiquidation,
    CoolingOffLock,
    CircuitBreakerTripped,
}

/// Event broadcast to downstream consumers (UI, order manager, notifier).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardEvent {
    pub event_type: GuardEventType,
    pub timestamp: DateTime<Utc>,
    pub scope: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_pct: Option<f64>,
    pub recommended_action: String,
    pub detail: Value,
}

impl GuardEvent {
    pub fn new(
        event_type: GuardEventType,
        timestamp: DateTime<Utc>,
        scope: impl Into<String>,
        severity: Severity,
        recommended_action: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            timestamp,
            scope: scope.into(),
            severity,
            loss_pct: None,
            recommended_action: recommended_action.into(),
            detail: Value::Null,
        }
    }

    pub fn with_loss_pct(mut self, loss_pct: f64) -> Self {
        self.loss_pct = Some(loss_pct);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}
