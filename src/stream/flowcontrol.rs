//! Response-side backpressure between the transport and the application.
//!
//! Under explicit flow control the application grants byte credit with
//! `read_data`; body bytes beyond the granted credit are queued, never
//! dropped. Under implicit flow control everything passes straight through.

use crate::base::neterror::NetError;
use crate::http::HeaderList;
use bytes::Bytes;
use std::collections::VecDeque;

/// Flow-control mode chosen when a stream prototype is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// All response body is delivered as it arrives.
    #[default]
    Implicit,
    /// Response body is delivered only against credit granted by `read_data`.
    Explicit,
}

/// A unit of response delivery, in the order it must reach the callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data { data: Bytes, end_stream: bool },
    Trailers(HeaderList),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum End {
    Open,
    Data,
    Trailers(HeaderList),
    Delivered,
}

/// Credit accounting for one explicit-mode stream.
#[derive(Debug)]
pub struct FlowController {
    credit: usize,
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    end: End,
    delivered_bytes: u64,
    granted_bytes: u64,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowController {
    pub fn new() -> Self {
        Self {
            credit: 0,
            queue: VecDeque::new(),
            queued_bytes: 0,
            end: End::Open,
            delivered_bytes: 0,
            granted_bytes: 0,
        }
    }

    /// Unused credit.
    pub fn credit(&self) -> usize {
        self.credit
    }

    /// Bytes received from the transport but not yet delivered.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Total bytes handed to the application so far.
    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    /// Total credit granted so far.
    pub fn granted_bytes(&self) -> u64 {
        self.granted_bytes
    }

    /// Whether the end of the response has been handed out.
    pub fn is_finished(&self) -> bool {
        self.end == End::Delivered
    }

    /// Accept body bytes from the transport and release what credit allows.
    pub fn receive(&mut self, data: Bytes, end_stream: bool) -> Vec<Chunk> {
        if self.end != End::Open {
            return Vec::new();
        }
        if !data.is_empty() {
            self.queued_bytes += data.len();
            self.queue.push_back(data);
        }
        if end_stream {
            self.end = End::Data;
        }
        self.flush()
    }

    /// Accept response trailers; they are released after all queued body bytes.
    pub fn receive_trailers(&mut self, trailers: HeaderList) -> Vec<Chunk> {
        if self.end != End::Open {
            return Vec::new();
        }
        self.end = End::Trailers(trailers);
        self.flush()
    }

    /// Add `bytes` of credit and release queued data up to the new ceiling.
    pub fn grant(&mut self, bytes: usize) -> Vec<Chunk> {
        self.credit = self.credit.saturating_add(bytes);
        self.granted_bytes = self.granted_bytes.saturating_add(bytes as u64);
        self.flush()
    }

    fn flush(&mut self) -> Vec<Chunk> {
        let mut out = Vec::new();

        while self.credit > 0 {
            let Some(front) = self.queue.front_mut() else {
                break;
            };
            let take = self.credit.min(front.len());
            let data = if take == front.len() {
                match self.queue.pop_front() {
                    Some(data) => data,
                    None => break,
                }
            } else {
                front.split_to(take)
            };
            self.credit -= take;
            self.queued_bytes -= take;
            self.delivered_bytes += take as u64;

            let end_stream = self.queue.is_empty() && self.end == End::Data;
            if end_stream {
                self.end = End::Delivered;
            }
            out.push(Chunk::Data { data, end_stream });
        }

        // The end marker carries no bytes, so it needs no credit.
        if self.queue.is_empty() {
            match std::mem::replace(&mut self.end, End::Delivered) {
                End::Data => out.push(Chunk::Data {
                    data: Bytes::new(),
                    end_stream: true,
                }),
                End::Trailers(trailers) => out.push(Chunk::Trailers(trailers)),
                other => self.end = other,
            }
        }

        out
    }
}

/// Per-stream delivery policy: pass-through or credit-gated.
#[derive(Debug)]
pub(crate) enum ResponseFlow {
    Implicit,
    Explicit(FlowController),
}

impl ResponseFlow {
    pub(crate) fn new(mode: FlowControl) -> Self {
        match mode {
            FlowControl::Implicit => ResponseFlow::Implicit,
            FlowControl::Explicit => ResponseFlow::Explicit(FlowController::new()),
        }
    }

    pub(crate) fn receive(&mut self, data: Bytes, end_stream: bool) -> Vec<Chunk> {
        match self {
            ResponseFlow::Implicit => vec![Chunk::Data { data, end_stream }],
            ResponseFlow::Explicit(controller) => controller.receive(data, end_stream),
        }
    }

    pub(crate) fn receive_trailers(&mut self, trailers: HeaderList) -> Vec<Chunk> {
        match self {
            ResponseFlow::Implicit => vec![Chunk::Trailers(trailers)],
            ResponseFlow::Explicit(controller) => controller.receive_trailers(trailers),
        }
    }

    pub(crate) fn grant(&mut self, bytes: usize) -> Result<Vec<Chunk>, NetError> {
        match self {
            ResponseFlow::Implicit => Err(NetError::InvalidFlowControlMode),
            ResponseFlow::Explicit(controller) => Ok(controller.grant(bytes)),
        }
    }
}
