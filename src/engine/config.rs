//! Engine configuration and builder.

use crate::base::neterror::NetError;
use crate::engine::runtime::validate_guard_name;
use crate::engine::Engine;
use crate::hints::table::{validate_hint, validate_suffix};
use crate::hints::KeyValueStore;
use crate::transport::{Http1Transport, Transport, TransportEvents, TransportFactory, TransportOptions};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default per-stream idle timeout.
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECONDS: u32 = 15;

/// Default refresh interval for the persisted endpoint cache.
pub const DEFAULT_DNS_REFRESH_SECONDS: u32 = 60;

/// Persisted endpoint cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsCacheConfig {
    pub enabled: bool,
    pub refresh_interval_seconds: u32,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_seconds: DEFAULT_DNS_REFRESH_SECONDS,
        }
    }
}

/// Everything the engine needs at start.
pub struct EngineConfig {
    /// Forwarded to the transport; the engine itself does no TLS.
    pub platform_cert_validation: bool,

    pub dns_cache: DnsCacheConfig,

    /// Exact `(host, port)` QUIC hints.
    pub quic_hints: Vec<(String, u16)>,

    /// Canonical suffixes such as `.example.com`.
    pub quic_canonical_suffixes: Vec<String>,

    pub stream_idle_timeout_seconds: u32,

    /// Runtime guard overrides.
    pub runtime_guards: HashMap<String, bool>,

    /// Namespace and store the endpoint cache is read from.
    pub key_value_store: Option<(String, Arc<dyn KeyValueStore>)>,

    /// Whether plain `http` requests may reach the transport.
    pub cleartext_permitted: bool,

    /// Transport factory (None = [`Http1Transport`]).
    pub transport: Option<TransportFactory>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_cert_validation: false,
            dns_cache: DnsCacheConfig::default(),
            quic_hints: Vec::new(),
            quic_canonical_suffixes: Vec::new(),
            stream_idle_timeout_seconds: DEFAULT_STREAM_IDLE_TIMEOUT_SECONDS,
            runtime_guards: HashMap::new(),
            key_value_store: None,
            cleartext_permitted: true,
            transport: None,
        }
    }
}

impl EngineConfig {
    /// Check every option; the first problem is reported.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.stream_idle_timeout_seconds == 0 {
            return Err(NetError::configuration(
                "stream idle timeout must be at least one second",
            ));
        }
        if self.dns_cache.enabled && self.dns_cache.refresh_interval_seconds == 0 {
            return Err(NetError::configuration(
                "DNS cache refresh interval must be positive",
            ));
        }
        for (host, port) in &self.quic_hints {
            validate_hint(host, *port)?;
        }
        for suffix in &self.quic_canonical_suffixes {
            validate_suffix(suffix)?;
        }
        for name in self.runtime_guards.keys() {
            validate_guard_name(name)?;
        }
        if let Some((namespace, _)) = &self.key_value_store {
            if namespace.is_empty() {
                return Err(NetError::configuration("key-value store namespace is empty"));
            }
        }
        Ok(())
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.stream_idle_timeout_seconds))
    }

    pub(crate) fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            platform_cert_validation: self.platform_cert_validation,
            stream_idle_timeout: self.stream_idle_timeout(),
            dns_refresh_interval: self
                .dns_cache
                .enabled
                .then(|| Duration::from_secs(u64::from(self.dns_cache.refresh_interval_seconds))),
        }
    }

    pub(crate) fn take_transport_factory(&mut self) -> TransportFactory {
        self.transport.take().unwrap_or_else(|| {
            Box::new(|events: TransportEvents, _: &TransportOptions| {
                Box::new(Http1Transport::new(events)) as Box<dyn Transport>
            })
        })
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("platform_cert_validation", &self.platform_cert_validation)
            .field("dns_cache", &self.dns_cache)
            .field("quic_hints", &self.quic_hints)
            .field("quic_canonical_suffixes", &self.quic_canonical_suffixes)
            .field("stream_idle_timeout_seconds", &self.stream_idle_timeout_seconds)
            .field("runtime_guards", &self.runtime_guards)
            .field(
                "key_value_store",
                &self.key_value_store.as_ref().map(|(namespace, _)| namespace),
            )
            .field("cleartext_permitted", &self.cleartext_permitted)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Builder for an [`Engine`].
///
/// # Example
/// ```ignore
/// let engine = EngineBuilder::new()
///     .stream_idle_timeout_seconds(30)
///     .add_quic_hint("www.example.com", 443)
///     .start()?;
/// ```
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform_cert_validation(mut self, enabled: bool) -> Self {
        self.config.platform_cert_validation = enabled;
        self
    }

    /// Enable the persisted endpoint cache.
    pub fn dns_cache(mut self, enabled: bool, refresh_interval_seconds: u32) -> Self {
        self.config.dns_cache = DnsCacheConfig {
            enabled,
            refresh_interval_seconds,
        };
        self
    }

    pub fn add_quic_hint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.quic_hints.push((host.into(), port));
        self
    }

    pub fn add_quic_canonical_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.quic_canonical_suffixes.push(suffix.into());
        self
    }

    pub fn stream_idle_timeout_seconds(mut self, seconds: u32) -> Self {
        self.config.stream_idle_timeout_seconds = seconds;
        self
    }

    pub fn runtime_guard(mut self, name: impl Into<String>, value: bool) -> Self {
        self.config.runtime_guards.insert(name.into(), value);
        self
    }

    pub fn key_value_store(
        mut self,
        namespace: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        self.config.key_value_store = Some((namespace.into(), store));
        self
    }

    pub fn cleartext_permitted(mut self, permitted: bool) -> Self {
        self.config.cleartext_permitted = permitted;
        self
    }

    /// Replace the default HTTP/1 transport.
    pub fn transport<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(TransportEvents, &TransportOptions) -> Box<dyn Transport> + Send + 'static,
    {
        self.config.transport = Some(Box::new(factory));
        self
    }

    /// The accumulated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build an engine without starting it.
    pub fn build(self) -> Engine {
        Engine::new(self.config)
    }

    /// Build and start.
    pub fn start(self) -> Result<Engine, NetError> {
        let engine = self.build();
        engine.start()?;
        Ok(engine)
    }
}
