use std::sync::Arc;

use anyhow::{Context, Result};
use grd_audit::ForensicVault;
use grd_config::{resolve_secrets, RiskParameterStore, SignedRiskConfiguration};
use grd_risk::{GuardrailSystem, OrderIntent, RecordingPublisher};
use serde_json::json;
use tracing::warn;

use super::scan::DryRunExecutor;
use super::{load_settings, read_json_file};

pub struct CheckOrderArgs {
    pub record_path: String,
    pub intent_path: String,
    pub config_paths: Vec<String>,
    pub start_equity: Option<f64>,
    pub realized: f64,
    pub unrealized: f64,
}

/// Build a throwaway guardrail system, feed it the P&L and one intent, and
/// print the decision plus any events it produced. Nothing is persisted.
pub fn check_order(args: CheckOrderArgs) -> Result<()> {
    let settings = load_settings(&args.config_paths)?;
    let secrets = resolve_secrets(&settings)?;
    let signed: SignedRiskConfiguration = read_json_file(&args.record_path)?;
    let intent: OrderIntent = read_json_file(&args.intent_path)?;

    let store = Arc::new(RiskParameterStore::new());
    // Safe Mode is a decision outcome here, not a CLI failure.
    if let Err(e) = store.hydrate_signed(signed) {
        warn!(error = %e, "record rejected; evaluating in safe mode");
    }

    let events = Arc::new(RecordingPublisher::new());
    let sys = GuardrailSystem::builder(settings)
        .store(store)
        .publisher(events.clone())
        .vault(ForensicVault::in_memory().0)
        .executor(Arc::new(DryRunExecutor::default()))
        .secrets(&secrets)
        .start_of_day_equity(args.start_equity.unwrap_or(intent.account_balance))
        .build()
        .context("build guardrail system")?;

    sys.monitor.update_pnl(args.realized, args.unrealized);
    let decision = sys.evaluate(&intent);

    let out = json!({
        "decision": decision,
        "trading_allowed": sys.monitor.is_trading_allowed(),
        "drawdown_pct": sys.monitor.drawdown_pct(),
        "events": events.events(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
