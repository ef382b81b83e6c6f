//! Per-stream lifecycle authority.
//!
//! A [`StreamStateMachine`] is only ever touched from the engine's serialized
//! context, so every transition below runs to completion before the next
//! event for any stream is looked at. The terminal commit is the single
//! decision point for the cancel/complete/error race: the first producer to
//! reach [`StreamStateMachine::commit`] wins and every later one is dropped.

use crate::base::intel::{FinalStreamIntel, StreamIntel};
use crate::base::neterror::NetError;
use crate::http::HeaderList;
use crate::stream::callbacks::StreamCallbacks;
use crate::stream::flowcontrol::{Chunk, FlowControl, ResponseFlow};
use crate::stream::StreamId;
use crate::transport::Protocol;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observable lifecycle position of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    HeadersSent,
    DataSent,
    /// Request side finished, waiting for the response.
    Closed,
    ResponseHeadersReceived,
    ResponseDataReceived,
    Complete,
    Cancelled,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Complete | StreamState::Cancelled | StreamState::Errored
        )
    }
}

/// The committed terminal variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Pending,
    Complete,
    Cancelled,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestSide {
    Idle,
    Open { data_sent: bool },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseSide {
    Awaiting,
    Headers,
    Body,
    /// The transport finished the response; delivery may still be pending.
    Ended,
}

/// Terminal flag shared with the application-side handle.
#[derive(Debug, Default)]
pub(crate) struct StreamShared {
    terminal: AtomicBool,
}

impl StreamShared {
    pub(crate) fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn mark_terminal(&self) {
        self.terminal.store(true, Ordering::Release);
    }
}

pub(crate) struct StreamStateMachine {
    id: StreamId,
    callbacks: Arc<StreamCallbacks>,
    flow: ResponseFlow,
    request: RequestSide,
    response: ResponseSide,
    outcome: Outcome,
    transport_open: bool,
    intel: StreamIntel,
    final_intel: FinalStreamIntel,
    shared: Arc<StreamShared>,
    idle_timeout: Duration,
    last_activity: Instant,
}

impl StreamStateMachine {
    pub(crate) fn new(
        id: StreamId,
        callbacks: Arc<StreamCallbacks>,
        mode: FlowControl,
        shared: Arc<StreamShared>,
        idle_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            callbacks,
            flow: ResponseFlow::new(mode),
            request: RequestSide::Idle,
            response: ResponseSide::Awaiting,
            outcome: Outcome::Pending,
            transport_open: false,
            intel: StreamIntel::new(id),
            final_intel: FinalStreamIntel::new(now),
            shared,
            idle_timeout,
            last_activity: now,
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    pub(crate) fn state(&self) -> StreamState {
        match self.outcome {
            Outcome::Complete => return StreamState::Complete,
            Outcome::Cancelled => return StreamState::Cancelled,
            Outcome::Errored => return StreamState::Errored,
            Outcome::Pending => {}
        }
        match (self.response, self.request) {
            (ResponseSide::Body | ResponseSide::Ended, _) => StreamState::ResponseDataReceived,
            (ResponseSide::Headers, _) => StreamState::ResponseHeadersReceived,
            (ResponseSide::Awaiting, RequestSide::Idle) => StreamState::Created,
            (ResponseSide::Awaiting, RequestSide::Open { data_sent: false }) => {
                StreamState::HeadersSent
            }
            (ResponseSide::Awaiting, RequestSide::Open { data_sent: true }) => {
                StreamState::DataSent
            }
            (ResponseSide::Awaiting, RequestSide::Closed) => StreamState::Closed,
        }
    }

    /// Whether the transport still holds state for this stream.
    pub(crate) fn transport_open(&self) -> bool {
        self.transport_open
    }

    pub(crate) fn mark_transport_open(&mut self) {
        self.transport_open = true;
    }

    /// When the stream times out if nothing else happens. A fully received
    /// response waiting on credit never expires.
    pub(crate) fn idle_deadline(&self) -> Option<Instant> {
        if self.is_terminal()
            || self.request == RequestSide::Idle
            || self.response == ResponseSide::Ended
        {
            return None;
        }
        Some(self.last_activity + self.idle_timeout)
    }

    // Request side

    pub(crate) fn record_headers_sent(&mut self, end_stream: bool) -> bool {
        if self.is_terminal() || self.request != RequestSide::Idle {
            return false;
        }
        self.request = if end_stream {
            RequestSide::Closed
        } else {
            RequestSide::Open { data_sent: false }
        };
        self.touch();
        true
    }

    pub(crate) fn record_data_sent(&mut self, len: usize, end_stream: bool) -> bool {
        if self.is_terminal() || !matches!(self.request, RequestSide::Open { .. }) {
            return false;
        }
        self.final_intel.sent_byte_count += len as u64;
        self.request = if end_stream {
            RequestSide::Closed
        } else {
            RequestSide::Open { data_sent: true }
        };
        self.settle_transport();
        self.touch();
        true
    }

    pub(crate) fn record_close(&mut self) -> bool {
        self.record_data_sent(0, true)
    }

    pub(crate) fn grant_credit(&mut self, bytes: usize) -> Result<(), NetError> {
        if self.is_terminal() {
            return Ok(());
        }
        self.touch();
        let chunks = self.flow.grant(bytes)?;
        self.deliver(chunks);
        Ok(())
    }

    /// Request side never reaches the transport; answer with a local response.
    pub(crate) fn local_reply(&mut self, status: u16, body: &'static str) {
        self.on_response_headers(HeaderList::response(status), body.is_empty());
        if !self.is_terminal() && !body.is_empty() {
            self.on_response_data(Bytes::from_static(body.as_bytes()), true);
        }
    }

    // Transport events

    pub(crate) fn on_connected(&mut self, protocol: Protocol, connection_id: u64) {
        if self.is_terminal() {
            return;
        }
        self.intel.connection_id = Some(connection_id);
        self.intel.attempt_count += 1;
        self.final_intel.upstream_protocol = Some(protocol);
        self.touch();
    }

    pub(crate) fn on_response_headers(&mut self, headers: HeaderList, end_stream: bool) {
        if self.is_terminal() {
            return;
        }
        if self.response != ResponseSide::Awaiting {
            self.fail(NetError::InvalidResponse);
            return;
        }
        self.touch();
        self.final_intel.response_status = headers.http_status();
        self.response = if end_stream {
            ResponseSide::Ended
        } else {
            ResponseSide::Headers
        };
        self.settle_transport();
        self.callbacks.headers(&headers, end_stream, &self.intel);
        if end_stream {
            self.finish();
        }
    }

    pub(crate) fn on_response_data(&mut self, data: Bytes, end_stream: bool) {
        if self.is_terminal() || self.response == ResponseSide::Ended {
            return;
        }
        if self.response == ResponseSide::Awaiting {
            self.fail(NetError::InvalidResponse);
            return;
        }
        self.touch();
        self.final_intel.received_byte_count += data.len() as u64;
        self.response = if end_stream {
            ResponseSide::Ended
        } else {
            ResponseSide::Body
        };
        self.settle_transport();
        let chunks = self.flow.receive(data, end_stream);
        self.deliver(chunks);
    }

    pub(crate) fn on_response_trailers(&mut self, trailers: HeaderList) {
        if self.is_terminal() || self.response == ResponseSide::Ended {
            return;
        }
        if self.response == ResponseSide::Awaiting {
            self.fail(NetError::InvalidResponse);
            return;
        }
        self.touch();
        self.response = ResponseSide::Ended;
        self.settle_transport();
        let chunks = self.flow.receive_trailers(trailers);
        self.deliver(chunks);
    }

    pub(crate) fn on_transport_error(&mut self, error: NetError) -> bool {
        self.transport_open = false;
        self.fail(error)
    }

    pub(crate) fn on_transport_reset(&mut self) -> bool {
        self.transport_open = false;
        self.fail(NetError::StreamReset)
    }

    // Terminal producers

    pub(crate) fn cancel(&mut self) -> bool {
        if !self.commit(Outcome::Cancelled) {
            return false;
        }
        self.callbacks.cancel(&self.intel, &self.final_intel);
        true
    }

    pub(crate) fn fail(&mut self, error: NetError) -> bool {
        if !self.commit(Outcome::Errored) {
            return false;
        }
        self.callbacks.error(&error, &self.intel, &self.final_intel);
        true
    }

    pub(crate) fn expire_idle(&mut self, now: Instant) -> bool {
        match self.idle_deadline() {
            Some(deadline) if deadline <= now => self.fail(NetError::TimedOut),
            _ => false,
        }
    }

    fn finish(&mut self) {
        if self.commit(Outcome::Complete) {
            self.callbacks.complete(&self.intel, &self.final_intel);
        }
    }

    fn commit(&mut self, outcome: Outcome) -> bool {
        if self.outcome != Outcome::Pending {
            return false;
        }
        self.outcome = outcome;
        self.final_intel.stream_end = Instant::now();
        self.shared.mark_terminal();
        true
    }

    fn deliver(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            if self.is_terminal() {
                break;
            }
            match chunk {
                Chunk::Data { data, end_stream } => {
                    self.callbacks.data(data, end_stream, &self.intel);
                    if end_stream {
                        self.finish();
                    }
                }
                Chunk::Trailers(trailers) => {
                    self.callbacks.trailers(&trailers, &self.intel);
                    self.finish();
                }
            }
        }
    }

    // Both directions done means the transport has already released the stream.
    fn settle_transport(&mut self) {
        if self.request == RequestSide::Closed && self.response == ResponseSide::Ended {
            self.transport_open = false;
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
