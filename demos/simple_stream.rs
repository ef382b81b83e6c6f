//! Simple stream example.
//!
//! Fetches `http://<authority><path>` through the default HTTP/1.1
//! transport using explicit flow control, then prints the engine counters.
//!
//! ```text
//! cargo run --example simple_stream -- 127.0.0.1:8080 /
//! ```

use mobinet::http::HeaderList;
use mobinet::stream::{FlowControl, Stream, StreamCallbacks};
use mobinet::EngineBuilder;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const READ_SIZE: usize = 16 * 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let authority = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let path = args.next().unwrap_or_else(|| "/".to_string());

    let engine = EngineBuilder::new()
        .stream_idle_timeout_seconds(10)
        .start()?;

    // Each on_data asks for the next READ_SIZE bytes.
    let handle: Arc<OnceLock<Stream>> = Arc::new(OnceLock::new());
    let (done_tx, done_rx) = mpsc::channel::<String>();
    let (cancel_tx, error_tx) = (done_tx.clone(), done_tx.clone());

    let reader = handle.clone();
    let callbacks = StreamCallbacks::new()
        .on_headers(|headers, end_stream, intel| {
            println!(
                "[{}] status {:?} (header only: {end_stream})",
                intel.stream_id,
                headers.http_status()
            );
            for (name, value) in headers.regular() {
                println!("  {name}: {value}");
            }
        })
        .on_data(move |data, end_stream, _| {
            println!("  read {} bytes", data.len());
            if !end_stream {
                if let Some(stream) = reader.get() {
                    let _ = stream.read_data(READ_SIZE);
                }
            }
        })
        .on_complete(move |_, final_intel| {
            let _ = done_tx.send(format!(
                "complete: sent {} B, received {} B over {:?}",
                final_intel.sent_byte_count,
                final_intel.received_byte_count,
                final_intel.upstream_protocol
            ));
        })
        .on_cancel(move |_, _| {
            let _ = cancel_tx.send("cancelled".to_string());
        })
        .on_error(move |error, _, _| {
            let _ = error_tx.send(format!("error {}: {error}", error.as_i32()));
        });

    let stream = engine
        .new_stream_prototype(callbacks, FlowControl::Explicit)?
        .start()?;
    let _ = handle.set(stream.clone());

    stream.read_data(READ_SIZE)?;
    stream.send_headers(
        HeaderList::request("GET", "http", &authority, &path).with("accept", "*/*")?,
        true,
    )?;

    match done_rx.recv_timeout(Duration::from_secs(30)) {
        Ok(outcome) => println!("{outcome}"),
        Err(_) => {
            println!("no answer in 30s, cancelling");
            stream.cancel();
        }
    }

    engine.terminate()?;
    println!("\n--- Engine counters ---\n{}", engine.dump_stats()?);
    Ok(())
}
