//! Shared fixtures: scripted transports and callback recorders.

#![allow(dead_code)]

use bytes::Bytes;
use mobinet::base::intel::FinalStreamIntel;
use mobinet::http::HeaderList;
use mobinet::stream::{StreamCallbacks, StreamId};
use mobinet::transport::{
    Protocol, Route, Transport, TransportEvents, TransportFactory, TransportOptions,
};
use mobinet::NetError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Something the engine asked the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start {
        id: StreamId,
        route: Route,
        headers: HeaderList,
        end_stream: bool,
    },
    Data {
        id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    Trailers {
        id: StreamId,
    },
    Reset {
        id: StreamId,
    },
    Shutdown,
}

#[derive(Default)]
struct MockState {
    events: Option<TransportEvents>,
    calls: Vec<Call>,
}

/// Transport that records calls and lets the test play the peer.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<(Mutex<MockState>, Condvar)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> impl FnOnce(TransportEvents, &TransportOptions) -> Box<dyn Transport> + Send + 'static {
        let mock = self.clone();
        move |events: TransportEvents, _options: &TransportOptions| {
            let (lock, cvar) = &*mock.state;
            lock.lock().unwrap().events = Some(events);
            cvar.notify_all();
            Box::new(mock) as Box<dyn Transport>
        }
    }

    /// The engine's event sink, once the factory ran.
    pub fn events(&self) -> TransportEvents {
        let (lock, cvar) = &*self.state;
        let guard = cvar
            .wait_timeout_while(lock.lock().unwrap(), WAIT, |s| s.events.is_none())
            .unwrap()
            .0;
        guard.events.clone().expect("transport factory never ran")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.0.lock().unwrap().calls.clone()
    }

    /// Block until a recorded call satisfies `pred`.
    pub fn wait_for(&self, pred: impl Fn(&Call) -> bool) -> Call {
        let (lock, cvar) = &*self.state;
        let guard = cvar
            .wait_timeout_while(lock.lock().unwrap(), WAIT, |s| !s.calls.iter().any(&pred))
            .unwrap()
            .0;
        guard
            .calls
            .iter()
            .find(|c| pred(c))
            .cloned()
            .expect("expected transport call never happened")
    }

    /// Block until `n` recorded calls satisfy `pred`.
    pub fn wait_count(&self, pred: impl Fn(&Call) -> bool, n: usize) -> usize {
        let (lock, cvar) = &*self.state;
        let guard = cvar
            .wait_timeout_while(lock.lock().unwrap(), WAIT, |s| {
                s.calls.iter().filter(|c| pred(c)).count() < n
            })
            .unwrap()
            .0;
        guard.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn wait_started(&self, id: StreamId) -> Call {
        self.wait_for(|c| matches!(c, Call::Start { id: started, .. } if *started == id))
    }

    pub fn request_bytes(&self, id: StreamId) -> usize {
        self.calls()
            .iter()
            .map(|c| match c {
                Call::Data { id: sid, data, .. } if *sid == id => data.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn was_reset(&self, id: StreamId) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, Call::Reset { id: sid } if *sid == id))
    }

    fn record(&self, call: Call) {
        let (lock, cvar) = &*self.state;
        lock.lock().unwrap().calls.push(call);
        cvar.notify_all();
    }
}

impl Transport for MockTransport {
    fn start_stream(&mut self, id: StreamId, route: &Route, headers: &HeaderList, end_stream: bool) {
        self.record(Call::Start {
            id,
            route: route.clone(),
            headers: headers.clone(),
            end_stream,
        });
    }

    fn send_data(&mut self, id: StreamId, data: Bytes, end_stream: bool) {
        self.record(Call::Data {
            id,
            data,
            end_stream,
        });
    }

    fn send_trailers(&mut self, id: StreamId, _trailers: &HeaderList) {
        self.record(Call::Trailers { id });
    }

    fn reset_stream(&mut self, id: StreamId) {
        self.record(Call::Reset { id });
    }

    fn shutdown(&mut self) {
        self.record(Call::Shutdown);
    }
}

/// Transport that answers every finished request on its own.
pub struct AutonomousTransport {
    events: TransportEvents,
    status: u16,
    body: Bytes,
    protocol: Protocol,
    next_connection_id: u64,
}

impl AutonomousTransport {
    pub fn factory(status: u16, body: impl Into<Bytes>) -> TransportFactory {
        Self::factory_with_protocol(status, body, Protocol::Http1)
    }

    pub fn factory_with_protocol(
        status: u16,
        body: impl Into<Bytes>,
        protocol: Protocol,
    ) -> TransportFactory {
        let body = body.into();
        Box::new(move |events: TransportEvents, _options: &TransportOptions| {
            Box::new(AutonomousTransport {
                events,
                status,
                body,
                protocol,
                next_connection_id: 1,
            }) as Box<dyn Transport>
        })
    }

    fn respond(&mut self, id: StreamId) {
        self.events.connected(id, self.protocol, self.next_connection_id);
        self.next_connection_id += 1;
        if self.body.is_empty() {
            self.events.headers(id, HeaderList::response(self.status), true);
        } else {
            self.events.headers(id, HeaderList::response(self.status), false);
            self.events.data(id, self.body.clone(), true);
        }
    }
}

impl Transport for AutonomousTransport {
    fn start_stream(&mut self, id: StreamId, _route: &Route, _headers: &HeaderList, end_stream: bool) {
        if end_stream {
            self.respond(id);
        }
    }

    fn send_data(&mut self, id: StreamId, _data: Bytes, end_stream: bool) {
        if end_stream {
            self.respond(id);
        }
    }

    fn send_trailers(&mut self, id: StreamId, _trailers: &HeaderList) {
        self.respond(id);
    }

    fn reset_stream(&mut self, _id: StreamId) {}
}

/// What the callbacks of one or more streams observed.
#[derive(Debug, Clone, Default)]
pub struct Counts {
    pub headers: usize,
    pub header_only: usize,
    pub data_calls: usize,
    pub data_bytes: usize,
    pub data_end: usize,
    pub trailers: usize,
    pub complete: usize,
    pub cancel: usize,
    pub error: usize,
    pub status: Option<u16>,
    pub last_error: Option<NetError>,
    pub final_intel: Option<FinalStreamIntel>,
    pub order: Vec<&'static str>,
}

impl Counts {
    pub fn terminal(&self) -> usize {
        self.complete + self.cancel + self.error
    }
}

type DataHook = Arc<dyn Fn(&Bytes, bool) + Send + Sync>;

/// Callback recorder with a blocking wait for terminal callbacks.
#[derive(Default)]
pub struct CallbackCounters {
    counts: Mutex<Counts>,
    cvar: Condvar,
}

impl CallbackCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callbacks(self: &Arc<Self>) -> StreamCallbacks {
        self.callbacks_with_data_hook(Arc::new(|_, _| {}))
    }

    /// Like [`callbacks`](Self::callbacks), running `hook` after each `on_data`.
    pub fn callbacks_with_data_hook(self: &Arc<Self>, hook: DataHook) -> StreamCallbacks {
        let (h, d, t, c, x, e) = (
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
        );
        StreamCallbacks::new()
            .on_headers(move |headers, end_stream, _| {
                h.update(|c| {
                    c.headers += 1;
                    if end_stream {
                        c.header_only += 1;
                    }
                    c.status = headers.http_status();
                    c.order.push("headers");
                })
            })
            .on_data(move |data, end_stream, _| {
                d.update(|c| {
                    c.data_calls += 1;
                    c.data_bytes += data.len();
                    if end_stream {
                        c.data_end += 1;
                    }
                    c.order.push("data");
                });
                hook(&data, end_stream);
            })
            .on_trailers(move |_, _| t.update(|c| {
                c.trailers += 1;
                c.order.push("trailers");
            }))
            .on_complete(move |_, final_intel| {
                c.update(|c| {
                    c.complete += 1;
                    c.final_intel = Some(*final_intel);
                    c.order.push("complete");
                })
            })
            .on_cancel(move |_, final_intel| {
                x.update(|c| {
                    c.cancel += 1;
                    c.final_intel = Some(*final_intel);
                    c.order.push("cancel");
                })
            })
            .on_error(move |error, _, final_intel| {
                e.update(|c| {
                    c.error += 1;
                    c.last_error = Some(error.clone());
                    c.final_intel = Some(*final_intel);
                    c.order.push("error");
                })
            })
    }

    pub fn snapshot(&self) -> Counts {
        self.counts.lock().unwrap().clone()
    }

    /// Wait until at least `n` terminal callbacks fired.
    pub fn wait_terminal(&self, n: usize) -> Counts {
        self.wait_until(|c| c.terminal() >= n)
    }

    pub fn wait_until(&self, pred: impl Fn(&Counts) -> bool) -> Counts {
        let guard = self
            .cvar
            .wait_timeout_while(self.counts.lock().unwrap(), WAIT, |c| !pred(c))
            .unwrap()
            .0;
        guard.clone()
    }

    /// Give in-flight engine work a moment, then snapshot.
    pub fn settle(&self, pause: Duration) -> Counts {
        let deadline = Instant::now() + pause;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.snapshot()
    }

    fn update(&self, f: impl FnOnce(&mut Counts)) {
        f(&mut self.counts.lock().unwrap());
        self.cvar.notify_all();
    }
}
