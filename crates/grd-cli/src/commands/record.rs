use anyhow::{bail, Result};
use grd_config::{HydrateOutcome, RiskParameterStore, SignedRiskConfiguration};
use tracing::warn;

use super::{load_settings, read_json_file};

/// Hydrate the record into a scratch store and report the outcome.
/// Anything other than a verified record is a non-zero exit.
pub fn verify_record(record_path: &str, config_paths: &[String]) -> Result<()> {
    let signed: SignedRiskConfiguration = read_json_file(record_path)?;
    let computed = signed.record.compute_hash()?;

    let store = RiskParameterStore::new();
    match store.hydrate_signed(signed)? {
        HydrateOutcome::Verified { id, version } => {
            println!("verified=true id={} version={}", id, version);
            println!("hash={}", computed);

            let settings = load_settings(config_paths)?;
            if let Err(e) = settings.check_threshold_ordering(&store.snapshot().record) {
                warn!(error = %e, "threshold ordering");
                println!("warning={}", e);
            }
            Ok(())
        }
        HydrateOutcome::SafeMode { cause } => {
            println!("verified=false");
            println!("computed_hash={}", computed);
            bail!("{}", cause.reason_code())
        }
    }
}
