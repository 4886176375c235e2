//! grd-risk
//!
//! Layered order guardrails and circuit breakers:
//!
//! - emergency kill switch (human override)
//! - behavioral lock (tilt detection, cooling-off)
//! - portfolio drawdown monitor ("Zen Mode")
//! - per-asset kill switch (forced liquidation)
//! - per-trade risk gate with a latching breaker
//!
//! Policy outcomes are values ([`Decision`]), never errors. Only unexpected
//! states (bad construction parameters, IO in collaborators) return `Err`.
//! Thresholds come from [`grd_config::RiskParameterStore`]; while it is in
//! Safe Mode every order is rejected.

mod asset_kill;
mod behavior;
mod bus;
mod clock;
mod drawdown;
mod emergency;
mod guard;
mod scan;
mod types;
mod warden;

pub use asset_kill::{
    drawdown_pct, AssetKillSwitch, Claim, ClaimOwner, KillCandidate, LiquidationCommand,
    LiquidationExecutor, LiquidationKeys, LiquidationOutcome, MARKET_CLOSE_POSITION,
};
pub use behavior::{
    BehavioralLock, LockManager, LockRecord, LockStatus, TiltDetector, TILT_DETECTED,
};
pub use bus::{BroadcastPublisher, EventPublisher, PublishError, RecordingPublisher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use drawdown::{
    DailyPnLState, FreezeCause, PortfolioDrawdownMonitor, PortfolioFreeze,
    CANCEL_ALL_OPEN_ORDERS, SYSTEM_READY,
};
pub use emergency::{ActivationReport, EmergencyKillSwitch, HALT_ALL_TRADING};
pub use guard::{GuardrailSystem, GuardrailSystemBuilder, OrderGuard};
pub use scan::{spawn_kill_scan, PortfolioSnapshot};
pub use types::*;
pub use warden::{
    reaches_daily_limit, within_trade_risk, CircuitBreaker, CircuitBreakerStatus, CircuitState,
    PerTradeRiskGate,
};
