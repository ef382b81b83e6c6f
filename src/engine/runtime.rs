//! Runtime feature guards.
//!
//! Guards are boolean switches with built-in defaults that the embedding
//! application may override when building the engine.

use crate::base::neterror::NetError;
use std::collections::HashMap;

const DEFAULT_GUARDS: [(&str, bool); 2] = [("test_feature_true", true), ("test_feature_false", false)];

/// Effective guard values for one engine.
#[derive(Debug, Clone, Default)]
pub struct RuntimeGuards {
    overrides: HashMap<String, bool>,
}

impl RuntimeGuards {
    pub fn new(overrides: HashMap<String, bool>) -> Self {
        Self { overrides }
    }

    /// Override first, then the built-in default; unknown guards are off.
    pub fn enabled(&self, name: &str) -> bool {
        if let Some(value) = self.overrides.get(name) {
            return *value;
        }
        DEFAULT_GUARDS
            .iter()
            .find(|(guard, _)| *guard == name)
            .map(|(_, value)| *value)
            .unwrap_or(false)
    }
}

pub(crate) fn validate_guard_name(name: &str) -> Result<(), NetError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'.');
    if !valid {
        return Err(NetError::configuration(format!(
            "invalid runtime guard name {name:?}"
        )));
    }
    Ok(())
}
