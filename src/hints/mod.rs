//! Protocol-hint resolution.
//!
//! Turns a request header block into a [`Route`]: which protocol to prefer
//! and, when the persisted cache knows the authority, which endpoint to dial.
//! The engine never resolves names itself; a cache miss leaves resolution to
//! the transport.

pub mod cache;
pub mod store;
pub mod table;

use crate::base::neterror::NetError;
use crate::engine::stats::EngineStats;
use crate::http::HeaderList;
use crate::transport::{Protocol, Route};
use std::sync::Arc;
use tracing::trace;
use url::{Host, Url};

pub use cache::{EndpointCache, DNS_CACHE_KEY};
pub use store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use table::ProtocolHints;

/// Which hint selected a route's preferred protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HintMatch {
    #[default]
    None,
    Exact,
    /// Matched through the given canonical suffix.
    Suffix(String),
}

/// Routing decisions for the dispatcher. Read-only once the engine runs.
pub(crate) struct HintResolver {
    hints: ProtocolHints,
    cache: Option<EndpointCache>,
    stats: Arc<EngineStats>,
}

impl HintResolver {
    pub(crate) fn new(
        hints: ProtocolHints,
        cache: Option<EndpointCache>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            hints,
            cache,
            stats,
        }
    }

    pub(crate) fn route(&self, headers: &HeaderList) -> Result<Route, NetError> {
        let scheme = headers
            .get(":scheme")
            .ok_or(NetError::MissingPseudoHeader { name: ":scheme" })?
            .to_ascii_lowercase();
        let authority = headers
            .get(":authority")
            .ok_or(NetError::MissingPseudoHeader { name: ":authority" })?;
        if scheme != "http" && scheme != "https" {
            return Err(NetError::DisallowedUrlScheme);
        }

        let url = Url::parse(&format!("{scheme}://{authority}/")).map_err(|_| NetError::InvalidUrl)?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(NetError::InvalidUrl),
        };
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;

        // Only TLS origins can be upgraded.
        let hint = if scheme == "https" {
            self.hints.lookup(&host, port)
        } else {
            HintMatch::None
        };
        self.stats.incr(match hint {
            HintMatch::Exact => "hints.exact",
            HintMatch::Suffix(_) => "hints.suffix",
            HintMatch::None => "hints.none",
        });
        let preferred = match (&hint, scheme.as_str()) {
            (HintMatch::Exact | HintMatch::Suffix(_), _) => Protocol::Http3,
            (HintMatch::None, "https") => Protocol::Http2,
            (HintMatch::None, _) => Protocol::Http1,
        };

        let mut route = Route {
            scheme,
            host,
            port,
            preferred,
            hint,
            cached_endpoint: None,
        };
        if let Some(cache) = &self.cache {
            route.cached_endpoint = cache.lookup(&route.authority());
            self.stats.incr(if route.cached_endpoint.is_some() {
                "dns_cache.hit"
            } else {
                "dns_cache.miss"
            });
        }
        trace!(authority = %route.authority(), preferred = %route.preferred, hint = ?route.hint, "route selected");
        Ok(route)
    }
}
