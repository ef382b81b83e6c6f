//! Transport seam consumed by the engine.
//!
//! The engine never encodes a request or touches a socket. It hands each
//! routed stream to a [`Transport`] and learns about the response through
//! the [`TransportEvents`] sink, whose events are queued into the engine's
//! serialized context like every other operation.

pub mod http1;

use crate::base::neterror::NetError;
use crate::engine::dispatcher::{Command, StreamOp};
use crate::hints::HintMatch;
use crate::http::HeaderList;
use crate::stream::StreamId;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub use http1::Http1Transport;

/// Wire protocol of an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
    Http3,
}

impl Protocol {
    /// Diagnostics counter bumped when a stream connects over this protocol.
    pub fn counter_name(self) -> &'static str {
        match self {
            Protocol::Http1 => "upstream_cx_http1_total",
            Protocol::Http2 => "upstream_cx_http2_total",
            Protocol::Http3 => "upstream_cx_http3_total",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http1 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
            Protocol::Http3 => "HTTP/3",
        })
    }
}

/// Where and how one stream should be carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Protocol the hint table prefers; transports may fall back.
    pub preferred: Protocol,
    /// Which hint, if any, selected `preferred`.
    pub hint: HintMatch,
    /// Endpoint from the persisted cache, to skip resolution.
    pub cached_endpoint: Option<SocketAddr>,
}

impl Route {
    /// `host:port`, the key used by the endpoint cache.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Settings forwarded to the transport factory at engine start.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub platform_cert_validation: bool,
    pub stream_idle_timeout: Duration,
    /// Re-resolution interval when the persisted endpoint cache is enabled.
    pub dns_refresh_interval: Option<Duration>,
}

/// A transport driving streams on behalf of the engine.
///
/// All methods are called from the engine thread, inside its tokio runtime,
/// so implementations may `tokio::spawn`. They must not block and must not
/// report events synchronously through anything but [`TransportEvents`].
pub trait Transport: Send {
    /// Begin a new exchange with the request header block.
    fn start_stream(&mut self, id: StreamId, route: &Route, headers: &HeaderList, end_stream: bool);

    /// Append request body; `end_stream` finishes the request.
    fn send_data(&mut self, id: StreamId, data: Bytes, end_stream: bool);

    /// Finish the request with trailers.
    fn send_trailers(&mut self, id: StreamId, trailers: &HeaderList);

    /// Abandon the stream; no further events are expected for it.
    fn reset_stream(&mut self, id: StreamId);

    /// The engine is going away.
    fn shutdown(&mut self) {}
}

/// Factory invoked once on the engine thread at start.
pub type TransportFactory =
    Box<dyn FnOnce(TransportEvents, &TransportOptions) -> Box<dyn Transport> + Send>;

/// Response-side event for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        protocol: Protocol,
        connection_id: u64,
    },
    Headers {
        headers: HeaderList,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    Trailers(HeaderList),
    Error(NetError),
    Reset,
}

/// Sink through which transports report events back to the engine.
///
/// Cheap to clone and usable from any thread. Events for streams the engine
/// has already retired are dropped.
#[derive(Clone)]
pub struct TransportEvents {
    commands: UnboundedSender<Command>,
}

impl TransportEvents {
    pub(crate) fn new(commands: UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    pub fn connected(&self, id: StreamId, protocol: Protocol, connection_id: u64) {
        self.emit(
            id,
            TransportEvent::Connected {
                protocol,
                connection_id,
            },
        );
    }

    pub fn headers(&self, id: StreamId, headers: HeaderList, end_stream: bool) {
        self.emit(
            id,
            TransportEvent::Headers {
                headers,
                end_stream,
            },
        );
    }

    pub fn data(&self, id: StreamId, data: Bytes, end_stream: bool) {
        self.emit(id, TransportEvent::Data { data, end_stream });
    }

    pub fn trailers(&self, id: StreamId, trailers: HeaderList) {
        self.emit(id, TransportEvent::Trailers(trailers));
    }

    pub fn error(&self, id: StreamId, error: NetError) {
        self.emit(id, TransportEvent::Error(error));
    }

    pub fn reset(&self, id: StreamId) {
        self.emit(id, TransportEvent::Reset);
    }

    /// Whether the engine still accepts events.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn emit(&self, id: StreamId, event: TransportEvent) {
        // A closed channel means the engine terminated; the event is moot.
        let _ = self.commands.send(Command::Stream {
            id,
            op: StreamOp::Transport(event),
        });
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
