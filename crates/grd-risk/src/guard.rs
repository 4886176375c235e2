//! Order guard: the single entry point for order decisions, plus the builder
//! that wires every layer together.
//!
//! Precedence (first match wins):
//!
//! 1. Emergency kill (`EMERGENCY_KILL`)
//! 2. Behavioral lock (`COOLING_OFF`)
//! 3. Portfolio monitor (`SAFE_MODE:*` / `ZEN_MODE`)
//! 4. Liquidation in flight for the symbol (`ASSET_KILL_ACTIVE`)
//! 5. Per-trade gate (breaker, per-trade cap, leverage, stop distance)
//!
//! Every rejection except `COOLING_OFF` counts as a blocked interaction for
//! the subject's tilt detector.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use grd_audit::ForensicVault;
use grd_config::{GuardrailSettings, ResolvedSecrets, RiskParameterStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::asset_kill::{AssetKillSwitch, LiquidationExecutor, LiquidationKeys};
use crate::behavior::BehavioralLock;
use crate::bus::{BroadcastPublisher, EventPublisher};
use crate::clock::{Clock, SystemClock};
use crate::drawdown::PortfolioDrawdownMonitor;
use crate::emergency::EmergencyKillSwitch;
use crate::types::{Decision, GuardEvent, OrderIntent, ReasonCode};
use crate::warden::PerTradeRiskGate;

pub struct OrderGuard {
    emergency: Arc<EmergencyKillSwitch>,
    behavior: Arc<BehavioralLock>,
    monitor: Arc<PortfolioDrawdownMonitor>,
    keys: Arc<LiquidationKeys>,
    warden: Arc<PerTradeRiskGate>,
}

impl OrderGuard {
    pub fn new(
        emergency: Arc<EmergencyKillSwitch>,
        behavior: Arc<BehavioralLock>,
        monitor: Arc<PortfolioDrawdownMonitor>,
        keys: Arc<LiquidationKeys>,
        warden: Arc<PerTradeRiskGate>,
    ) -> Self {
        Self {
            emergency,
            behavior,
            monitor,
            keys,
            warden,
        }
    }

    pub fn evaluate(&self, intent: &OrderIntent) -> Decision {
        let decision = self.gate(intent);
        match decision {
            Decision::Approve => {
                debug!(subject = %intent.subject_id, symbol = %intent.symbol, "order approved");
            }
            Decision::Reject(code) => {
                info!(
                    subject = %intent.subject_id,
                    symbol = %intent.symbol,
                    reason_code = %code,
                    "order rejected"
                );
                if code != ReasonCode::CoolingOff {
                    self.behavior
                        .record_blocked_interaction(&intent.subject_id);
                }
            }
        }
        decision
    }

    fn gate(&self, intent: &OrderIntent) -> Decision {
        if self.emergency.is_frozen() {
            return Decision::Reject(ReasonCode::EmergencyKill);
        }
        if self.behavior.is_locked(&intent.subject_id).is_locked() {
            return Decision::Reject(ReasonCode::CoolingOff);
        }
        if let Some(code) = self.monitor.blocking_reason() {
            return Decision::Reject(code);
        }
        if self.keys.is_liquidating(&intent.symbol) {
            return Decision::Reject(ReasonCode::AssetKillActive);
        }
        self.warden.validate_order(intent)
    }
}

/// Every layer, constructed once and shared.
pub struct GuardrailSystem {
    pub store: Arc<RiskParameterStore>,
    pub warden: Arc<PerTradeRiskGate>,
    pub monitor: Arc<PortfolioDrawdownMonitor>,
    pub asset_kill: Arc<AssetKillSwitch>,
    pub behavior: Arc<BehavioralLock>,
    pub emergency: Arc<EmergencyKillSwitch>,
    pub keys: Arc<LiquidationKeys>,
    pub vault: ForensicVault,
    pub publisher: Arc<dyn EventPublisher>,
    pub guard: OrderGuard,
    /// Set when the builder created the bus itself (no `.publisher(..)`).
    bus: Option<Arc<BroadcastPublisher>>,
}

impl GuardrailSystem {
    pub fn builder(settings: GuardrailSettings) -> GuardrailSystemBuilder {
        GuardrailSystemBuilder {
            settings,
            store: None,
            publisher: None,
            vault: None,
            executor: None,
            clock: None,
            passcode: None,
            start_of_day_equity: None,
        }
    }

    pub fn evaluate(&self, intent: &OrderIntent) -> Decision {
        self.guard.evaluate(intent)
    }

    /// Attach a consumer to the built-in broadcast bus. `None` when the
    /// system was built with an external publisher; subscribe there instead.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<GuardEvent>> {
        self.bus.as_ref().map(|b| b.subscribe())
    }
}

pub struct GuardrailSystemBuilder {
    settings: GuardrailSettings,
    store: Option<Arc<RiskParameterStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    vault: Option<ForensicVault>,
    executor: Option<Arc<dyn LiquidationExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    passcode: Option<String>,
    start_of_day_equity: Option<f64>,
}

impl GuardrailSystemBuilder {
    /// Shared store. Defaults to a fresh (Safe Mode) store.
    pub fn store(mut self, store: Arc<RiskParameterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to a [`BroadcastPublisher`] sized from settings; reach it
    /// through [`GuardrailSystem::subscribe`].
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Defaults to [`ForensicVault::from_settings`].
    pub fn vault(mut self, vault: ForensicVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn LiquidationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn secrets(mut self, secrets: &ResolvedSecrets) -> Self {
        self.passcode = secrets.emergency_passcode.clone();
        self
    }

    pub fn start_of_day_equity(mut self, equity: f64) -> Self {
        self.start_of_day_equity = Some(equity);
        self
    }

    pub fn build(self) -> Result<GuardrailSystem> {
        self.settings.validate()?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow!("guardrail system: liquidation executor is required"))?;
        let start = self
            .start_of_day_equity
            .ok_or_else(|| anyhow!("guardrail system: start_of_day_equity is required"))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(RiskParameterStore::new()));
        let (publisher, bus): (Arc<dyn EventPublisher>, _) = match self.publisher {
            Some(p) => (p, None),
            None => {
                let bus = Arc::new(BroadcastPublisher::new(self.settings.bus.capacity));
                (bus.clone(), Some(bus))
            }
        };
        let vault = match self.vault {
            Some(v) => v,
            None => ForensicVault::from_settings(&self.settings.vault)?,
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let active = store.snapshot();
        if !active.is_safe_mode() {
            if let Err(e) = self.settings.check_threshold_ordering(&active.record) {
                warn!(error = %e, "kill threshold sits below the portfolio daily limit");
            }
        }

        let keys = Arc::new(LiquidationKeys::new());
        let warden = Arc::new(PerTradeRiskGate::new(
            store.clone(),
            publisher.clone(),
            vault.clone(),
            clock.clone(),
        ));
        let monitor = Arc::new(PortfolioDrawdownMonitor::new(
            store.clone(),
            start,
            publisher.clone(),
            vault.clone(),
            clock.clone(),
        )?);
        let asset_kill = Arc::new(AssetKillSwitch::new(
            &self.settings.kill_switch,
            keys.clone(),
            executor,
            publisher.clone(),
            vault.clone(),
            clock.clone(),
        ));
        let behavior = Arc::new(BehavioralLock::new(
            &self.settings.behavior,
            publisher.clone(),
            clock.clone(),
        ));
        let emergency = Arc::new(EmergencyKillSwitch::new(
            self.passcode.as_deref(),
            publisher.clone(),
            vault.clone(),
            clock,
        ));

        let guard = OrderGuard::new(
            emergency.clone(),
            behavior.clone(),
            monitor.clone(),
            keys.clone(),
            warden.clone(),
        );

        Ok(GuardrailSystem {
            store,
            warden,
            monitor,
            asset_kill,
            behavior,
            emergency,
            keys,
            vault,
            publisher,
            guard,
            bus,
        })
    }
}
