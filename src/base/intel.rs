//! Per-stream diagnostics handed to every callback.

use crate::stream::StreamId;
use crate::transport::Protocol;
use std::time::Instant;

/// Lightweight stream metadata passed to every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamIntel {
    pub stream_id: StreamId,
    /// Connection carrying the stream, once the transport reported one.
    pub connection_id: Option<u64>,
    /// Number of transport attempts made for this stream so far.
    pub attempt_count: u32,
}

impl StreamIntel {
    pub(crate) fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            connection_id: None,
            attempt_count: 0,
        }
    }
}

/// Summary delivered with the terminal callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalStreamIntel {
    pub stream_start: Instant,
    pub stream_end: Instant,
    /// Request body bytes handed to the transport.
    pub sent_byte_count: u64,
    /// Response body bytes received from the transport, delivered or not.
    pub received_byte_count: u64,
    pub upstream_protocol: Option<Protocol>,
    pub response_status: Option<u16>,
}

impl FinalStreamIntel {
    pub(crate) fn new(stream_start: Instant) -> Self {
        Self {
            stream_start,
            stream_end: stream_start,
            sent_byte_count: 0,
            received_byte_count: 0,
            upstream_protocol: None,
            response_status: None,
        }
    }
}
