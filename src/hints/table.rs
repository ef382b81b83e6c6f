//! QUIC hint table.
//!
//! Exact `(host, port)` hints and canonical suffixes (".example.com") both
//! steer matching hosts toward HTTP/3. Exact hints win over suffixes.

use crate::base::neterror::NetError;
use crate::hints::HintMatch;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Thread-safe hint table.
#[derive(Debug, Clone, Default)]
pub struct ProtocolHints {
    exact: Arc<DashMap<String, DashSet<u16>>>,
    suffixes: Arc<DashSet<String>>,
}

impl ProtocolHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact QUIC hint.
    pub fn add_quic_hint(&self, host: &str, port: u16) -> Result<(), NetError> {
        validate_hint(host, port)?;
        self.exact
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(port);
        Ok(())
    }

    /// Add a canonical suffix; it must start with a dot.
    pub fn add_canonical_suffix(&self, suffix: &str) -> Result<(), NetError> {
        validate_suffix(suffix)?;
        self.suffixes.insert(suffix.to_ascii_lowercase());
        Ok(())
    }

    /// Classify `host:port` against the table.
    pub fn lookup(&self, host: &str, port: u16) -> HintMatch {
        let host = host.to_ascii_lowercase();

        if let Some(ports) = self.exact.get(&host) {
            if ports.contains(&port) {
                return HintMatch::Exact;
            }
        }

        // Longest suffix wins so reports are deterministic.
        let mut best: Option<String> = None;
        for entry in self.suffixes.iter() {
            let suffix = entry.key();
            if host.len() > suffix.len() && host.ends_with(suffix.as_str()) {
                let longer = best.as_ref().map_or(true, |b| suffix.len() > b.len());
                if longer {
                    best = Some(suffix.clone());
                }
            }
        }
        match best {
            Some(suffix) => HintMatch::Suffix(suffix),
            None => HintMatch::None,
        }
    }

    pub fn len(&self) -> usize {
        self.exact.iter().map(|e| e.value().len()).sum::<usize>() + self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn validate_hint(host: &str, port: u16) -> Result<(), NetError> {
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(NetError::configuration(format!("invalid QUIC hint host {host:?}")));
    }
    if port == 0 {
        return Err(NetError::configuration(format!("invalid QUIC hint port for {host}")));
    }
    Ok(())
}

pub(crate) fn validate_suffix(suffix: &str) -> Result<(), NetError> {
    if !suffix.starts_with('.') || suffix.len() < 2 || suffix.chars().any(char::is_whitespace) {
        return Err(NetError::configuration(format!(
            "invalid canonical suffix {suffix:?}"
        )));
    }
    Ok(())
}
