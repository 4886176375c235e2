use std::sync::Arc;

use anyhow::Result;
use grd_audit::ForensicVault;
use grd_risk::{
    AssetKillSwitch, LiquidationCommand, LiquidationExecutor, LiquidationKeys, PortfolioSnapshot,
    RecordingPublisher, SystemClock,
};
use parking_lot::Mutex;
use serde_json::json;

use super::{load_settings, read_json_file};

/// Executor that only records what it would have sent.
#[derive(Default)]
pub struct DryRunExecutor {
    log: Mutex<Vec<LiquidationCommand>>,
}

impl DryRunExecutor {
    pub fn commands(&self) -> Vec<LiquidationCommand> {
        self.log.lock().clone()
    }
}

impl LiquidationExecutor for DryRunExecutor {
    fn submit(&self, cmd: &LiquidationCommand) -> Result<()> {
        tracing::info!(symbol = %cmd.symbol, side = ?cmd.side, quantity = cmd.quantity, "dry run: liquidation not sent");
        self.log.lock().push(cmd.clone());
        Ok(())
    }
}

pub fn dry_run_scan(snapshot_path: &str, config_paths: &[String]) -> Result<()> {
    let settings = load_settings(config_paths)?;
    let snap: PortfolioSnapshot = read_json_file(snapshot_path)?;

    let executor = Arc::new(DryRunExecutor::default());
    let switch = AssetKillSwitch::new(
        &settings.kill_switch,
        Arc::new(LiquidationKeys::new()),
        executor.clone(),
        Arc::new(RecordingPublisher::new()),
        ForensicVault::in_memory().0,
        Arc::new(SystemClock),
    );

    let flagged = switch.inspect_portfolio(&snap.positions, &snap.spot_prices);
    let issued = switch.scan(&snap.positions, &snap.spot_prices);

    let out = json!({
        "kill_threshold_pct": switch.kill_threshold(),
        "flagged": flagged,
        "liquidations": issued,
        "submitted": executor.commands().len(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
