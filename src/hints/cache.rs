//! Persisted host-to-endpoint cache.
//!
//! The blob is a run of length-framed records, `<len>\n<key><len>\n<value>`,
//! where keys are `host:port` and values are `address:port|ttl|stickiness`.
//! Only the leading socket address of each value is used.

use crate::engine::stats::EngineStats;
use crate::hints::store::KeyValueStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, warn};

/// Store key the cache blob lives under.
pub const DNS_CACHE_KEY: &str = "dns_persistent_cache";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheFormatError {
    #[error("missing length terminator at byte {0}")]
    MissingLength(usize),
    #[error("invalid length at byte {0}")]
    InvalidLength(usize),
    #[error("record truncated at byte {0}")]
    Truncated(usize),
    #[error("key without value at byte {0}")]
    DanglingKey(usize),
}

/// Read-only map from authority to cached endpoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EndpointCache {
    entries: HashMap<String, SocketAddr>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the blob from `store`, best effort.
    ///
    /// A corrupt blob is removed from the store and yields an empty cache.
    pub fn load(store: &dyn KeyValueStore, stats: &EngineStats) -> Self {
        let Some(blob) = store.read(DNS_CACHE_KEY) else {
            debug!("no persisted endpoint cache");
            return Self::new();
        };
        match Self::parse(&blob) {
            Ok(cache) => {
                stats.incr("dns_cache.load_success");
                debug!(entries = cache.len(), "persisted endpoint cache loaded");
                cache
            }
            Err(e) => {
                stats.incr("dns_cache.load_error");
                warn!(error = %e, "discarding malformed endpoint cache");
                store.remove(DNS_CACHE_KEY);
                Self::new()
            }
        }
    }

    /// Parse a framed blob. Records with an unusable address are skipped.
    pub fn parse(blob: &str) -> Result<Self, CacheFormatError> {
        let mut entries = HashMap::new();
        let mut pos = 0;
        while pos < blob.len() {
            let (key, next) = read_field(blob, pos)?;
            if next >= blob.len() {
                return Err(CacheFormatError::DanglingKey(next));
            }
            let (value, next) = read_field(blob, next)?;
            pos = next;

            let address = value.split('|').next().unwrap_or_default();
            match address.parse::<SocketAddr>() {
                Ok(addr) => {
                    entries.insert(key.to_ascii_lowercase(), addr);
                }
                Err(_) => debug!(key, value, "skipping cache record with bad address"),
            }
        }
        Ok(Self { entries })
    }

    /// Frame `(authority, value)` pairs into a blob [`parse`](Self::parse) accepts.
    pub fn encode<'a>(records: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
        let mut blob = String::new();
        for (key, value) in records {
            for field in [key, value] {
                blob.push_str(&field.len().to_string());
                blob.push('\n');
                blob.push_str(field);
            }
        }
        blob
    }

    /// Cached endpoint for `host:port`.
    pub fn lookup(&self, authority: &str) -> Option<SocketAddr> {
        self.entries.get(&authority.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_field(blob: &str, start: usize) -> Result<(&str, usize), CacheFormatError> {
    let rest = &blob[start..];
    let newline = rest
        .find('\n')
        .ok_or(CacheFormatError::MissingLength(start))?;
    let digits = &rest[..newline];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CacheFormatError::InvalidLength(start));
    }
    let len: usize = digits
        .parse()
        .map_err(|_| CacheFormatError::InvalidLength(start))?;

    let body_start = start + newline + 1;
    let body_end = body_start
        .checked_add(len)
        .ok_or(CacheFormatError::InvalidLength(start))?;
    let field = blob
        .get(body_start..body_end)
        .ok_or(CacheFormatError::Truncated(body_start))?;
    Ok((field, body_end))
}
