//! grd-audit
//!
//! Forensic vault: append-only incident capture for kill-level events.
//!
//! Two stores:
//! - [`MemoryIncidentStore`]: in-process, for tests and dry runs.
//! - [`JsonlIncidentStore`]: JSON Lines file, one incident per line, with an
//!   optional hash chain (`hash_prev` / `hash_self` over canonical JSON).
//!
//! There is no update or delete path anywhere in this crate.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grd_config::canonical::{canonical_json, sha256_hex};
use grd_config::VaultSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Scope used for incidents that are not tied to one symbol.
pub const SCOPE_GLOBAL: &str = "GLOBAL";
/// Scope used for portfolio-wide incidents (daily drawdown, breaker).
pub const SCOPE_PORTFOLIO: &str = "PORTFOLIO";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One captured incident. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Symbol, or [`SCOPE_GLOBAL`] / [`SCOPE_PORTFOLIO`].
    pub scope: String,
    pub severity: Severity,
    pub drawdown_pct: f64,
    pub market_context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_self: Option<String>,
}

impl Incident {
    fn critical(
        scope: &str,
        timestamp: DateTime<Utc>,
        drawdown_pct: f64,
        market_context: Value,
    ) -> Self {
        Self {
            incident_id: Uuid::new_v4(),
            timestamp,
            scope: scope.to_string(),
            severity: Severity::Critical,
            drawdown_pct,
            market_context,
            hash_prev: None,
            hash_self: None,
        }
    }
}

/// JSON has no encoding for NaN or infinity; `serde_json` would write `null`
/// and the line could never be read back. `+inf` clamps to `f64::MAX`, NaN and
/// `-inf` to zero. The raw value is kept in the context as a string.
fn finite_drawdown(drawdown_pct: f64, market_context: &mut Value) -> f64 {
    if drawdown_pct.is_finite() {
        return drawdown_pct;
    }
    warn!(
        target: "security",
        raw = %drawdown_pct,
        "non-finite incident drawdown; storing clamped value"
    );
    if let Value::Object(map) = market_context {
        map.insert(
            "drawdown_pct_raw".to_string(),
            Value::String(drawdown_pct.to_string()),
        );
    }
    if drawdown_pct == f64::INFINITY {
        f64::MAX
    } else {
        0.0
    }
}

/// Append-only sink for incidents.
pub trait IncidentStore: Send + Sync {
    /// Persist one incident; returns it as stored (chain fields filled in).
    fn append(&self, incident: Incident) -> Result<Incident>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: Mutex<Vec<Incident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far, oldest first.
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.incidents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.lock().is_empty()
    }
}

impl IncidentStore for MemoryIncidentStore {
    fn append(&self, incident: Incident) -> Result<Incident> {
        self.incidents.lock().push(incident.clone());
        Ok(incident)
    }
}

// ---------------------------------------------------------------------------
// JSON Lines with hash chain
// ---------------------------------------------------------------------------

struct ChainState {
    last_hash: Option<String>,
    lines: u64,
}

pub struct JsonlIncidentStore {
    path: PathBuf,
    hash_chain: bool,
    state: Mutex<ChainState>,
}

impl JsonlIncidentStore {
    /// Open (or create) the log. An existing log is resumed: the chain
    /// continues from its last line.
    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let mut state = ChainState {
            last_hash: None,
            lines: 0,
        };
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("read incident log {:?}", path))?;
            for (i, line) in content.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let inc: Incident = serde_json::from_str(trimmed)
                    .with_context(|| format!("parse incident at line {}", i + 1))?;
                state.last_hash = inc.hash_self;
                state.lines += 1;
            }
        }

        Ok(Self {
            path,
            hash_chain,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of incidents in the log (including those found on open).
    pub fn len(&self) -> u64 {
        self.state.lock().lines
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IncidentStore for JsonlIncidentStore {
    fn append(&self, mut incident: Incident) -> Result<Incident> {
        // Held across the write so concurrent appends cannot fork the chain.
        let mut state = self.state.lock();

        if self.hash_chain {
            incident.hash_prev = state.last_hash.clone();
            incident.hash_self = None;
            incident.hash_self = Some(compute_incident_hash(&incident)?);
        }

        let line = canonical_json(&incident).context("serialize incident failed")?;
        append_line(&self.path, &line)?;

        state.last_hash = incident.hash_self.clone();
        state.lines += 1;
        Ok(incident)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open incident log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write incident line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    f.flush().context("flush incident log failed")?;
    Ok(())
}

/// Hash over canonical JSON of the incident WITHOUT `hash_self`.
pub fn compute_incident_hash(incident: &Incident) -> Result<String> {
    let mut clone = incident.clone();
    clone.hash_self = None;
    let canonical = canonical_json(&clone)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Result of chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

/// Verify the hash chain of an incident log file.
pub fn verify_incident_log(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read incident log {:?}", path.as_ref()))?;
    verify_incident_log_str(&content)
}

/// Same as [`verify_incident_log`] over in-memory JSONL content.
pub fn verify_incident_log_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let inc: Incident = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("unparseable incident: {e}"),
                })
            }
        };
        count += 1;

        if inc.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, inc.hash_prev
                ),
            });
        }

        match inc.hash_self {
            Some(ref claimed) => {
                let recomputed = compute_incident_hash(&inc)?;
                if *claimed != recomputed {
                    return Ok(VerifyResult::Broken {
                        line: i + 1,
                        reason: format!(
                            "hash_self mismatch: claimed {}, recomputed {}",
                            claimed, recomputed
                        ),
                    });
                }
            }
            None => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: "hash_self missing".to_string(),
                })
            }
        }

        prev_hash = inc.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: count })
}

// ---------------------------------------------------------------------------
// Vault facade
// ---------------------------------------------------------------------------

/// Entry point used by the guardrail layers.
#[derive(Clone)]
pub struct ForensicVault {
    store: Arc<dyn IncidentStore>,
}

impl ForensicVault {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    /// In-memory vault; the returned store handle can be inspected.
    pub fn in_memory() -> (Self, Arc<MemoryIncidentStore>) {
        let store = Arc::new(MemoryIncidentStore::new());
        (Self::new(store.clone()), store)
    }

    /// JSONL vault when a path is configured, memory otherwise.
    pub fn from_settings(settings: &VaultSettings) -> Result<Self> {
        match settings.path.as_deref() {
            Some(p) => {
                let store = JsonlIncidentStore::open(p, settings.hash_chain)?;
                info!(path = %p, existing = store.len(), "forensic vault opened");
                Ok(Self::new(Arc::new(store)))
            }
            None => Ok(Self::in_memory().0),
        }
    }

    /// Capture an incident. Every incident is CRITICAL: the vault is only
    /// reached from kill-level triggers. `at` is the trigger's own clock time.
    pub fn capture_incident(
        &self,
        scope: &str,
        at: DateTime<Utc>,
        drawdown_pct: f64,
        mut market_context: Value,
    ) -> Result<Incident> {
        let drawdown_pct = finite_drawdown(drawdown_pct, &mut market_context);
        let incident = Incident::critical(scope, at, drawdown_pct, market_context);
        match self.store.append(incident) {
            Ok(stored) => {
                info!(
                    target: "security",
                    incident_id = %stored.incident_id,
                    scope = %stored.scope,
                    severity = ?stored.severity,
                    drawdown_pct = stored.drawdown_pct,
                    "forensic incident captured"
                );
                Ok(stored)
            }
            Err(e) => {
                error!(
                    target: "security",
                    scope = %scope,
                    error = %e,
                    "forensic incident capture FAILED"
                );
                Err(e)
            }
        }
    }
}
