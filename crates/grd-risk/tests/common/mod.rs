//! Shared fixtures for grd-risk scenarios.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use grd_audit::{ForensicVault, MemoryIncidentStore};
use grd_config::{GuardrailSettings, ResolvedSecrets, RiskConfiguration, RiskParameterStore};
use grd_risk::{
    EventPublisher, GuardEvent, GuardrailSystem, LiquidationCommand, LiquidationExecutor,
    ManualClock, OrderIntent, PublishError, RecordingPublisher, Side,
};
use parking_lot::Mutex;

pub const PASSCODE: &str = "correct horse battery staple";

pub fn record() -> RiskConfiguration {
    RiskConfiguration {
        id: "core-risk".to_string(),
        version: 4,
        max_position_size_pct: 0.01,
        daily_drawdown_limit_pct: 0.03,
        max_leverage_ratio: 10.0,
        min_stop_loss_pips: 5.0,
    }
}

pub fn verified_store() -> Arc<RiskParameterStore> {
    let store = Arc::new(RiskParameterStore::new());
    let r = record();
    let h = r.compute_hash().unwrap();
    store.hydrate(r, &h).unwrap();
    store
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
    ))
}

#[derive(Default)]
pub struct RecordingExecutor {
    pub commands: Mutex<Vec<LiquidationCommand>>,
    pub fail: AtomicBool,
}

impl RecordingExecutor {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.commands.lock().len()
    }
}

impl LiquidationExecutor for RecordingExecutor {
    fn submit(&self, cmd: &LiquidationCommand) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("execution venue unreachable");
        }
        self.commands.lock().push(cmd.clone());
        Ok(())
    }
}

/// Publisher whose transport is down.
pub struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, _event: &GuardEvent) -> Result<(), PublishError> {
        Err(PublishError::Unavailable("bus offline".to_string()))
    }
}

pub struct Harness {
    pub sys: GuardrailSystem,
    pub events: Arc<RecordingPublisher>,
    pub incidents: Arc<MemoryIncidentStore>,
    pub executor: Arc<RecordingExecutor>,
    pub clock: Arc<ManualClock>,
}

pub fn harness_with(store: Arc<RiskParameterStore>, start_equity: f64) -> Harness {
    let events = Arc::new(RecordingPublisher::new());
    let (vault, incidents) = ForensicVault::in_memory();
    let executor = Arc::new(RecordingExecutor::default());
    let clock = manual_clock();
    let secrets = ResolvedSecrets {
        emergency_passcode: Some(PASSCODE.to_string()),
    };
    let sys = GuardrailSystem::builder(GuardrailSettings::default())
        .store(store)
        .publisher(events.clone())
        .vault(vault)
        .executor(executor.clone())
        .clock(clock.clone())
        .secrets(&secrets)
        .start_of_day_equity(start_equity)
        .build()
        .unwrap();
    Harness {
        sys,
        events,
        incidents,
        executor,
        clock,
    }
}

pub fn harness() -> Harness {
    harness_with(verified_store(), 100_000.0)
}

pub fn order(subject: &str, symbol: &str, risk: f64) -> OrderIntent {
    OrderIntent {
        subject_id: subject.to_string(),
        symbol: symbol.to_string(),
        side: Side::Buy,
        quantity: 1_000.0,
        proposed_risk_amount: risk,
        account_balance: 10_000.0,
        daily_loss_to_date: 0.0,
        notional: None,
        stop_loss_pips: None,
    }
}
