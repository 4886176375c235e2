use anyhow::{bail, Result};
use grd_audit::{verify_incident_log, VerifyResult};

pub fn verify(path: &str) -> Result<()> {
    match verify_incident_log(path)? {
        VerifyResult::Valid { lines } => {
            println!("VALID lines={}", lines);
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            println!("BROKEN line={} reason={}", line, reason);
            bail!("incident log hash chain broken at line {}", line)
        }
    }
}
