//! Runtime secret resolution.
//!
//! # Contract
//! - Settings store only env var NAMES (e.g. `"GRD_EMERGENCY_PASSCODE"`).
//! - Callers resolve secrets once at startup and pass [`ResolvedSecrets`]
//!   into constructors; `std::env::var` is not called anywhere else.
//! - `Debug` output redacts values; errors name the variable, never the value.

use anyhow::{bail, Result};

use crate::settings::GuardrailSettings;

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Emergency kill-switch deactivation passcode. `None` disables deactivation.
    pub emergency_passcode: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "emergency_passcode",
                &self.emergency_passcode.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Read a named env var; unset or blank yields `None`.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve every secret the settings refer to.
pub fn resolve_secrets(settings: &GuardrailSettings) -> Result<ResolvedSecrets> {
    let var = settings.emergency.passcode_env.trim();
    let emergency_passcode = resolve_env(var);

    if emergency_passcode.is_none() && settings.emergency.require_passcode {
        bail!(
            "SECRETS_MISSING: required env var '{}' (emergency passcode) is not set or empty",
            var
        );
    }

    Ok(ResolvedSecrets { emergency_passcode })
}
