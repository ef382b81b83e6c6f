//! The engine's serialized context.
//!
//! One [`Dispatcher`] runs on the engine thread and owns the registry of live
//! streams. Application calls and transport events arrive as [`Command`]s on
//! a single queue and are applied one at a time, so a stream's state machine
//! is never entered twice concurrently and every terminal decision is made
//! here.

use crate::engine::stats::EngineStats;
use crate::hints::HintResolver;
use crate::http::HeaderList;
use crate::stream::state::{Outcome, StreamStateMachine};
use crate::stream::StreamId;
use crate::transport::{Transport, TransportEvent};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Body of the local response synthesized for refused cleartext requests.
pub const CLEARTEXT_NOT_PERMITTED: &str = "Cleartext is not permitted";

pub(crate) enum Command {
    Start(Box<StreamStateMachine>),
    Stream { id: StreamId, op: StreamOp },
    /// Cancel everything, then report how many streams were cancelled.
    Terminate { done: oneshot::Sender<usize> },
}

pub(crate) enum StreamOp {
    SendHeaders { headers: HeaderList, end_stream: bool },
    SendData { data: Bytes, end_stream: bool },
    Close { trailers: HeaderList },
    Cancel,
    ReadData(usize),
    Transport(TransportEvent),
}

pub(crate) struct Dispatcher {
    commands: UnboundedReceiver<Command>,
    streams: HashMap<StreamId, StreamStateMachine>,
    transport: Box<dyn Transport>,
    resolver: HintResolver,
    stats: Arc<EngineStats>,
    cleartext_permitted: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        commands: UnboundedReceiver<Command>,
        transport: Box<dyn Transport>,
        resolver: HintResolver,
        stats: Arc<EngineStats>,
        cleartext_permitted: bool,
    ) -> Self {
        Self {
            commands,
            streams: HashMap::new(),
            transport,
            resolver,
            stats,
            cleartext_permitted,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("engine dispatcher running");
        loop {
            let deadline = self.next_deadline();
            let command = tokio::select! {
                command = self.commands.recv() => command,
                _ = sleep_until(deadline) => {
                    self.expire_idle(Instant::now());
                    continue;
                }
            };
            match command {
                Some(Command::Terminate { done }) => {
                    let cancelled = self.terminate();
                    let _ = done.send(cancelled);
                    break;
                }
                Some(command) => self.handle(command),
                None => {
                    self.terminate();
                    break;
                }
            }
        }
        debug!("engine dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start(machine) => {
                let id = machine.id();
                self.stats.incr("engine.streams_started");
                trace!(stream_id = %id, "stream entered registry");
                self.streams.insert(id, *machine);
            }
            Command::Stream { id, op } => {
                self.apply(id, op);
                self.settle(id);
            }
            Command::Terminate { done } => {
                // Only reachable while draining; the first terminate already did the work.
                let _ = done.send(0);
            }
        }
    }

    fn apply(&mut self, id: StreamId, op: StreamOp) {
        let Some(machine) = self.streams.get_mut(&id) else {
            trace!(stream_id = %id, "dropping event for retired stream");
            return;
        };

        match op {
            StreamOp::SendHeaders {
                headers,
                end_stream,
            } => {
                if !machine.record_headers_sent(end_stream) {
                    return;
                }
                match self.resolver.route(&headers) {
                    Err(e) => {
                        debug!(stream_id = %id, error = %e, "request could not be routed");
                        machine.fail(e);
                    }
                    Ok(route) if route.scheme == "http" && !self.cleartext_permitted => {
                        debug!(stream_id = %id, "cleartext request refused locally");
                        self.stats.incr("stream.local_reply");
                        machine.local_reply(400, CLEARTEXT_NOT_PERMITTED);
                    }
                    Ok(route) => {
                        machine.mark_transport_open();
                        self.transport
                            .start_stream(id, &route, &headers, end_stream);
                    }
                }
            }
            StreamOp::SendData { data, end_stream } => {
                let forward = machine.transport_open();
                let len = data.len();
                if machine.record_data_sent(len, end_stream) && forward {
                    self.transport.send_data(id, data, end_stream);
                }
            }
            StreamOp::Close { trailers } => {
                let forward = machine.transport_open();
                if machine.record_close() && forward {
                    if trailers.is_empty() {
                        self.transport.send_data(id, Bytes::new(), true);
                    } else {
                        self.transport.send_trailers(id, &trailers);
                    }
                }
            }
            StreamOp::Cancel => {
                machine.cancel();
            }
            StreamOp::ReadData(bytes) => {
                if let Err(e) = machine.grant_credit(bytes) {
                    debug!(stream_id = %id, error = %e, "credit grant rejected");
                }
            }
            StreamOp::Transport(event) => match event {
                TransportEvent::Connected {
                    protocol,
                    connection_id,
                } => {
                    self.stats.incr(protocol.counter_name());
                    machine.on_connected(protocol, connection_id);
                }
                TransportEvent::Headers {
                    headers,
                    end_stream,
                } => machine.on_response_headers(headers, end_stream),
                TransportEvent::Data { data, end_stream } => {
                    machine.on_response_data(data, end_stream)
                }
                TransportEvent::Trailers(trailers) => machine.on_response_trailers(trailers),
                TransportEvent::Error(error) => {
                    debug!(stream_id = %id, error = %error, "transport error");
                    machine.on_transport_error(error);
                }
                TransportEvent::Reset => {
                    machine.on_transport_reset();
                }
            },
        }
    }

    /// Retire `id` if it reached a terminal state.
    fn settle(&mut self, id: StreamId) {
        let outcome = match self.streams.get(&id) {
            Some(machine) => machine.outcome(),
            None => return,
        };
        let counter = match outcome {
            Outcome::Pending => return,
            Outcome::Complete => "stream.complete",
            Outcome::Cancelled => "stream.cancel",
            Outcome::Errored => "stream.error",
        };
        let Some(machine) = self.streams.remove(&id) else {
            return;
        };
        self.stats.incr(counter);
        if machine.transport_open() {
            self.transport.reset_stream(id);
        }
        debug!(stream_id = %id, outcome = ?outcome, state = ?machine.state(), "stream retired");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.streams
            .values()
            .filter_map(StreamStateMachine::idle_deadline)
            .min()
    }

    fn expire_idle(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (id, machine) in self.streams.iter_mut() {
            if machine.expire_idle(now) {
                expired.push(*id);
            }
        }
        for id in expired {
            debug!(stream_id = %id, "stream idle timeout");
            self.stats.incr("stream.idle_timeout");
            self.settle(id);
        }
    }

    /// Drain queued work, cancel every live stream and stop the transport.
    fn terminate(&mut self) -> usize {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command);
        }

        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort();
        let mut cancelled = 0;
        for id in ids {
            if let Some(machine) = self.streams.get_mut(&id) {
                if machine.cancel() {
                    cancelled += 1;
                }
            }
            self.settle(id);
        }
        self.transport.shutdown();
        debug!(cancelled, "engine dispatcher drained");
        cancelled
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
