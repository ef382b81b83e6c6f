//! Explicit and implicit flow control through the engine.

mod common;

use bytes::Bytes;
use common::{AutonomousTransport, CallbackCounters, MockTransport};
use mobinet::http::HeaderList;
use mobinet::stream::{FlowControl, Stream};
use mobinet::{EngineBuilder, NetError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn get() -> HeaderList {
    HeaderList::request("GET", "https", "example.com", "/")
}

#[test]
fn test_credit_caps_delivery() {
    let mock = MockTransport::new();
    let engine = EngineBuilder::new()
        .transport(mock.factory())
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let stream = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Explicit)
        .unwrap()
        .start()
        .unwrap();

    stream.read_data(100).unwrap();
    stream.send_headers(get(), true).unwrap();
    mock.wait_started(stream.id());
    let events = mock.events();
    events.headers(stream.id(), HeaderList::response(200), false);
    events.data(stream.id(), Bytes::from(vec![1u8; 1000]), true);

    let counts = counters.wait_until(|c| c.data_bytes >= 100);
    assert_eq!(counts.data_bytes, 100);
    let counts = counters.settle(Duration::from_millis(50));
    assert_eq!(counts.data_bytes, 100);
    assert_eq!(counts.complete, 0);

    stream.read_data(400).unwrap();
    counters.wait_until(|c| c.data_bytes >= 500);
    stream.read_data(500).unwrap();

    let counts = counters.wait_terminal(1);
    assert_eq!(counts.data_bytes, 1000);
    assert_eq!(counts.complete, 1);
    assert_eq!(counts.data_end, 1);
    engine.terminate().unwrap();
}

#[test]
fn test_zero_credit_withholds_until_cancel() {
    let mock = MockTransport::new();
    let engine = EngineBuilder::new()
        .transport(mock.factory())
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let stream = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Explicit)
        .unwrap()
        .start()
        .unwrap();

    stream.send_headers(get(), true).unwrap();
    mock.wait_started(stream.id());
    let events = mock.events();
    events.headers(stream.id(), HeaderList::response(200), false);
    events.data(stream.id(), Bytes::from_static(b"withheld"), true);

    let counts = counters.wait_until(|c| c.headers == 1);
    assert_eq!(counts.data_calls, 0);
    let counts = counters.settle(Duration::from_millis(50));
    assert_eq!(counts.data_calls, 0);
    assert_eq!(counts.terminal(), 0);

    // The response finished on the wire but was never observed; cancel still wins.
    stream.cancel();
    let counts = counters.wait_terminal(1);
    assert_eq!(counts.cancel, 1);
    assert_eq!(counts.complete, 0);
    engine.terminate().unwrap();
}

#[test]
fn test_read_from_on_data() {
    const BODY: usize = 32768;
    const CHUNK: usize = 1000;

    let engine = EngineBuilder::new()
        .transport(AutonomousTransport::factory(200, vec![b'z'; BODY]))
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let handle: Arc<OnceLock<Stream>> = Arc::new(OnceLock::new());
    let granted = Arc::new(AtomicUsize::new(CHUNK));
    let delivered = Arc::new(AtomicUsize::new(0));
    let over_credit = Arc::new(AtomicBool::new(false));

    let hook = {
        let handle = handle.clone();
        let granted = granted.clone();
        let delivered = delivered.clone();
        let over_credit = over_credit.clone();
        Arc::new(move |data: &Bytes, end_stream: bool| {
            let total = delivered.fetch_add(data.len(), Ordering::SeqCst) + data.len();
            if total > granted.load(Ordering::SeqCst) || data.len() > CHUNK {
                over_credit.store(true, Ordering::SeqCst);
            }
            if !end_stream {
                if let Some(stream) = handle.get() {
                    granted.fetch_add(CHUNK, Ordering::SeqCst);
                    stream.read_data(CHUNK).unwrap();
                }
            }
        })
    };
    let stream = engine
        .new_stream_prototype(counters.callbacks_with_data_hook(hook), FlowControl::Explicit)
        .unwrap()
        .start()
        .unwrap();
    handle.set(stream.clone()).unwrap();

    stream.read_data(CHUNK).unwrap();
    stream.send_headers(get(), true).unwrap();

    let counts = counters.wait_terminal(1);
    assert_eq!(counts.complete, 1);
    assert_eq!(counts.data_bytes, BODY);
    assert_eq!(counts.data_calls, BODY.div_ceil(CHUNK));
    assert!(!over_credit.load(Ordering::SeqCst));
    engine.terminate().unwrap();
}

#[test]
fn test_header_only_response_needs_no_credit() {
    let engine = EngineBuilder::new()
        .transport(AutonomousTransport::factory(204, Bytes::new()))
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let stream = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Explicit)
        .unwrap()
        .start()
        .unwrap();

    stream.send_headers(get(), true).unwrap();
    let counts = counters.wait_terminal(1);
    assert_eq!(counts.complete, 1);
    assert_eq!(counts.data_calls, 0);
    engine.terminate().unwrap();
}

#[test]
fn test_trailers_wait_behind_withheld_data() {
    let mock = MockTransport::new();
    let engine = EngineBuilder::new()
        .transport(mock.factory())
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let stream = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Explicit)
        .unwrap()
        .start()
        .unwrap();

    stream.send_headers(get(), true).unwrap();
    mock.wait_started(stream.id());
    let events = mock.events();
    events.headers(stream.id(), HeaderList::response(200), false);
    events.data(stream.id(), Bytes::from_static(b"0123456789"), false);
    events.trailers(stream.id(), HeaderList::new().with("grpc-status", "0").unwrap());

    let counts = counters.wait_until(|c| c.headers == 1);
    assert_eq!(counts.trailers, 0);

    stream.read_data(4).unwrap();
    counters.wait_until(|c| c.data_bytes == 4);
    assert_eq!(counters.snapshot().trailers, 0);

    stream.read_data(6).unwrap();
    let counts = counters.wait_terminal(1);
    assert_eq!(counts.order, vec!["headers", "data", "data", "trailers", "complete"]);
    engine.terminate().unwrap();
}

#[test]
fn test_implicit_streams_reject_read_data() {
    let engine = EngineBuilder::new()
        .transport(AutonomousTransport::factory(200, "body"))
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let stream = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Implicit)
        .unwrap()
        .start()
        .unwrap();

    assert_eq!(stream.read_data(1), Err(NetError::InvalidFlowControlMode));
    stream.send_headers(get(), true).unwrap();
    let counts = counters.wait_terminal(1);
    assert_eq!(counts.data_bytes, 4);
    assert_eq!(stream.read_data(1), Err(NetError::InvalidFlowControlMode));
    engine.terminate().unwrap();
}

#[test]
fn test_many_explicit_streams_with_cancels_and_terminate() {
    const STREAMS: usize = 30;
    let engine = EngineBuilder::new()
        .transport(AutonomousTransport::factory(200, vec![7u8; 4096]))
        .start()
        .unwrap();
    let counters = CallbackCounters::new();
    let proto = engine
        .new_stream_prototype(counters.callbacks(), FlowControl::Explicit)
        .unwrap();

    let mut streams = Vec::new();
    for i in 0..STREAMS {
        let stream = proto.start().unwrap();
        stream.send_headers(get(), true).unwrap();
        match i % 3 {
            0 => stream.read_data(1 << 20).unwrap(),
            1 => stream.cancel(),
            _ => stream.read_data(16).unwrap(),
        }
        streams.push(stream);
    }

    counters.wait_terminal(2 * STREAMS / 3);
    engine.terminate().unwrap();

    let counts = counters.snapshot();
    assert_eq!(counts.terminal(), STREAMS);
    assert_eq!(counts.complete, STREAMS / 3);
    assert_eq!(counts.cancel, 2 * STREAMS / 3);
    assert!(streams.iter().all(Stream::is_terminal));
}
