//! # mobinet
//!
//! A mobile-oriented HTTP stream engine.
//!
//! `mobinet` runs many request/response exchanges ("streams") through one
//! engine thread, giving each stream a strict lifecycle: exactly one of
//! `on_complete`, `on_cancel` or `on_error` fires per stream, whatever the
//! interleaving of application calls and transport events.
//!
//! ## Features
//!
//! - **Serialized engine**: one thread owns every stream state machine
//! - **Flow control**: implicit delivery or explicit byte credit via `read_data`
//! - **Cancellation**: race-free against completion, errors and termination
//! - **Idle timeouts**: per stream, surfaced as `on_error(TimedOut)`
//! - **Protocol hints**: exact and canonical-suffix QUIC hints, persisted endpoint cache
//! - **Pluggable transports**: a hyper HTTP/1.1 transport ships by default
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mobinet::engine::EngineBuilder;
//! use mobinet::http::HeaderList;
//! use mobinet::stream::{FlowControl, StreamCallbacks};
//!
//! let engine = EngineBuilder::new().start()?;
//! let callbacks = StreamCallbacks::new()
//!     .on_headers(|headers, _, _| println!("status {:?}", headers.http_status()))
//!     .on_complete(|_, _| println!("done"));
//! let stream = engine
//!     .new_stream_prototype(callbacks, FlowControl::Implicit)?
//!     .start()?;
//! stream.send_headers(HeaderList::request("GET", "http", "example.com", "/"), true)?;
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error taxonomy and per-stream intel
//! - [`engine`] - Engine lifecycle, configuration and diagnostics
//! - [`hints`] - Protocol hints and the persisted endpoint cache
//! - [`http`] - Header lists
//! - [`stream`] - Stream handles, callbacks and flow control
//! - [`transport`] - The transport seam and the HTTP/1.1 transport

pub mod base;
pub mod engine;
pub mod hints;
pub mod http;
pub mod stream;
pub mod transport;

pub use base::neterror::NetError;
pub use engine::{Engine, EngineBuilder};
