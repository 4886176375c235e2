use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::asset_kill::AssetKillSwitch;
use crate::types::Position;

/// Positions and spot prices captured at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub positions: Vec<Position>,
    #[serde(default)]
    pub spot_prices: HashMap<String, f64>,
}

/// Spawn the periodic kill scan.
///
/// On each interval:
/// - calls `snapshot_fn()`; `None` skips the tick (no data yet);
/// - runs [`AssetKillSwitch::scan`] over the snapshot.
///
/// The first tick fires immediately. Abort the returned handle to stop.
pub fn spawn_kill_scan<F>(
    switch: Arc<AssetKillSwitch>,
    snapshot_fn: F,
    interval: Duration,
) -> JoinHandle<()>
where
    F: Fn() -> Option<PortfolioSnapshot> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(snap) = snapshot_fn() else {
                continue;
            };
            let issued = switch.scan(&snap.positions, &snap.spot_prices);
            debug!(
                positions = snap.positions.len(),
                issued = issued.len(),
                "kill scan tick"
            );
        }
    })
}
