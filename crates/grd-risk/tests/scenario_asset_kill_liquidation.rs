//! Scenario: per-asset kill switch.
//!
//! GREEN when:
//! - a long at 1.1000 marked at 0.9790 (11% loss) is liquidated at a 10%
//!   threshold; a long marked at 1.0650 is not;
//! - the liquidation is a SELL for the full quantity, captures a CRITICAL
//!   incident with drawdown 0.11 and publishes ASSET_LIQUIDATION;
//! - rescanning issues no duplicate command;
//! - missing prices are skipped;
//! - a symbol already claimed by the close path is left alone;
//! - executor failure releases the key so the next scan retries;
//! - the periodic scan task drives all of the above.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::harness;
use grd_audit::Severity;
use grd_risk::{
    spawn_kill_scan, ClaimOwner, GuardEventType, LiquidationOutcome, PortfolioSnapshot,
    Position, PositionSide, Side, MARKET_CLOSE_POSITION,
};
use parking_lot::Mutex;

fn long(symbol: &str, entry: f64, qty: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        entry_price: entry,
        side: PositionSide::Long,
        quantity: qty,
    }
}

fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
}

#[test]
fn eleven_percent_loss_is_liquidated() {
    let h = harness();
    let positions = vec![long("EURUSD", 1.1000, 100_000.0), long("GBPUSD", 1.1000, 50_000.0)];
    let px = prices(&[("EURUSD", 0.9790), ("GBPUSD", 1.0650)]);

    let flagged = h.sys.asset_kill.inspect_portfolio(&positions, &px);
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].position.symbol, "EURUSD");

    let issued = h.sys.asset_kill.scan(&positions, &px);
    assert_eq!(issued.len(), 1);
    let cmd = &issued[0];
    assert_eq!(cmd.side, Side::Sell);
    assert_eq!(cmd.quantity, 100_000.0);
    assert!((cmd.drawdown_pct - 0.11).abs() < 1e-9);
    assert!(cmd.idempotency_key.starts_with("LIQ-EURUSD-"));
    assert_eq!(h.executor.count(), 1);

    let incidents = h.incidents.incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].severity, Severity::Critical);
    assert_eq!(incidents[0].scope, "EURUSD");
    assert!((incidents[0].drawdown_pct - 0.11).abs() < 1e-9);

    let ev: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.event_type == GuardEventType::AssetLiquidation)
        .collect();
    assert_eq!(ev.len(), 1);
    assert_eq!(ev[0].recommended_action, MARKET_CLOSE_POSITION);
}

#[test]
fn short_position_closes_with_buy() {
    let h = harness();
    let positions = vec![Position {
        symbol: "XAUUSD".to_string(),
        entry_price: 2_000.0,
        side: PositionSide::Short,
        quantity: 3.0,
    }];
    let issued = h
        .sys
        .asset_kill
        .scan(&positions, &prices(&[("XAUUSD", 2_250.0)]));
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].side, Side::Buy);
}

#[test]
fn rescan_does_not_duplicate() {
    let h = harness();
    let positions = vec![long("EURUSD", 1.1000, 1_000.0)];
    let px = prices(&[("EURUSD", 0.9790)]);

    assert_eq!(h.sys.asset_kill.scan(&positions, &px).len(), 1);
    for _ in 0..5 {
        assert!(h.sys.asset_kill.scan(&positions, &px).is_empty());
    }
    assert_eq!(h.executor.count(), 1);
    assert_eq!(h.incidents.len(), 1);

    // Fully closed: key released, a fresh breach may liquidate again.
    h.sys.keys.release("EURUSD");
    assert_eq!(h.sys.asset_kill.scan(&positions, &px).len(), 1);
}

#[test]
fn missing_or_bad_price_is_skipped() {
    let h = harness();
    let positions = vec![
        long("EURUSD", 1.1000, 1_000.0),
        long("USDJPY", 150.0, 1_000.0),
        long("AUDUSD", 0.0, 1_000.0),
    ];
    let px = prices(&[("USDJPY", f64::NAN), ("AUDUSD", 0.5)]);
    assert!(h.sys.asset_kill.scan(&positions, &px).is_empty());
    assert_eq!(h.executor.count(), 0);
}

#[test]
fn close_path_claim_blocks_liquidation() {
    let h = harness();
    h.sys
        .keys
        .try_claim("EURUSD", ClaimOwner::ClosePath)
        .unwrap();

    let positions = vec![long("EURUSD", 1.1000, 1_000.0)];
    let flagged = h
        .sys
        .asset_kill
        .inspect_portfolio(&positions, &prices(&[("EURUSD", 0.9790)]));
    assert_eq!(
        h.sys.asset_kill.execute_liquidation(&flagged[0]),
        LiquidationOutcome::AlreadyClaimed(ClaimOwner::ClosePath)
    );
    assert_eq!(h.executor.count(), 0);

    // And the close path cannot claim a symbol under liquidation.
    h.sys.keys.release("EURUSD");
    assert!(matches!(
        h.sys.asset_kill.execute_liquidation(&flagged[0]),
        LiquidationOutcome::Issued(_)
    ));
    let err = h
        .sys
        .keys
        .try_claim("EURUSD", ClaimOwner::ClosePath)
        .unwrap_err();
    assert_eq!(err.owner, ClaimOwner::Liquidation);
}

#[test]
fn submit_failure_releases_key_for_retry() {
    let h = harness();
    let positions = vec![long("EURUSD", 1.1000, 1_000.0)];
    let px = prices(&[("EURUSD", 0.9790)]);

    h.executor.set_failing(true);
    let flagged = h.sys.asset_kill.inspect_portfolio(&positions, &px);
    assert!(matches!(
        h.sys.asset_kill.execute_liquidation(&flagged[0]),
        LiquidationOutcome::SubmitFailed(_)
    ));
    assert_eq!(h.sys.keys.holder("EURUSD"), None);
    assert_eq!(h.incidents.len(), 0);

    h.executor.set_failing(false);
    assert_eq!(h.sys.asset_kill.scan(&positions, &px).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scan_task_runs_on_interval() {
    let h = harness();
    let feed: Arc<Mutex<Option<PortfolioSnapshot>>> = Arc::new(Mutex::new(None));
    let feed_for_task = feed.clone();

    let handle = spawn_kill_scan(
        h.sys.asset_kill.clone(),
        move || feed_for_task.lock().clone(),
        Duration::from_secs(5),
    );

    // First tick fires immediately with no snapshot: skipped.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.executor.count(), 0);

    *feed.lock() = Some(PortfolioSnapshot {
        positions: vec![long("EURUSD", 1.1000, 1_000.0)],
        spot_prices: prices(&[("EURUSD", 0.9790)]),
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.executor.count(), 1);

    // Later ticks see the same breach but the key suppresses duplicates.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.executor.count(), 1);

    handle.abort();
}
