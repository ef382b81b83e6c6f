//! Streams: one request/response exchange each.
//!
//! A [`StreamPrototype`] binds callbacks and a flow-control mode; every
//! [`StreamPrototype::start`] registers a fresh state machine with the engine
//! and hands back a [`Stream`] handle the application drives from any thread.

pub mod callbacks;
pub mod flowcontrol;
pub mod handle;
pub mod prototype;
pub(crate) mod state;

use std::fmt;

pub use callbacks::StreamCallbacks;
pub use flowcontrol::{Chunk, FlowControl, FlowController};
pub use handle::Stream;
pub use prototype::StreamPrototype;
pub use state::StreamState;

/// Engine-unique stream identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct StreamId(u64);

impl StreamId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
