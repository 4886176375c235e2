//! grd-config
//!
//! Configuration for the guardrail engine, in two halves:
//!
//! - the **signed risk record** ([`RiskConfiguration`]) verified by
//!   [`RiskParameterStore`] before any threshold is trusted;
//! - the **engine settings** ([`GuardrailSettings`]) loaded from layered YAML,
//!   canonicalized and hashed so a run can name exactly what it ran with.
//!
//! Secrets never appear as literals in settings; see [`secrets`].

pub mod canonical;
pub mod record;
pub mod secrets;
pub mod settings;
pub mod store;

pub use record::{RiskConfiguration, SignedRiskConfiguration};
pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{
    BehaviorSettings, BusSettings, EmergencySettings, GuardrailSettings, KillSwitchSettings,
    VaultSettings,
};
pub use store::{ActiveConfig, HydrateOutcome, RiskParameterStore, SafeModeCause};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;

/// Unexpected configuration states. Hash mismatches are NOT errors; see
/// [`RiskParameterStore::hydrate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("CONFIG_INVALID field={field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },

    #[error(
        "CONFIG_THRESHOLD_ORDER {lower}={lower_value} must not exceed {upper}={upper_value}"
    )]
    ThresholdOrdering {
        lower: &'static str,
        lower_value: f64,
        upper: &'static str,
        upper_value: f64,
    },

    #[error("CONFIG_CANONICALIZE_FAILED: {0}")]
    Canonicalize(String),
}

/// Known secret-like prefixes. Any leaf string in the merged settings that
/// starts with one of these aborts loading with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Merge YAML docs in order (earlier = base, later = override), reject
/// secret literals, then canonicalize and hash.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as an empty layer.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonical::canonical_json(&merged)?;
    let config_hash = canonical::sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(|val| val.as_str()) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
