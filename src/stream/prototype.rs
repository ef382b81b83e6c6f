//! Stream factory bound to one callback set and flow-control mode.

use crate::base::neterror::NetError;
use crate::engine::dispatcher::Command;
use crate::engine::EngineLink;
use crate::stream::callbacks::StreamCallbacks;
use crate::stream::flowcontrol::FlowControl;
use crate::stream::handle::Stream;
use crate::stream::state::{StreamShared, StreamStateMachine};
use std::sync::Arc;
use tracing::debug;

/// Produces a new [`Stream`] per [`start`](Self::start) call.
///
/// Obtained from [`Engine::new_stream_prototype`](crate::engine::Engine::new_stream_prototype).
#[derive(Clone, Debug)]
pub struct StreamPrototype {
    callbacks: Arc<StreamCallbacks>,
    mode: FlowControl,
    link: EngineLink,
}

impl StreamPrototype {
    pub(crate) fn new(callbacks: StreamCallbacks, mode: FlowControl, link: EngineLink) -> Self {
        Self {
            callbacks: Arc::new(callbacks),
            mode,
            link,
        }
    }

    pub fn flow_control(&self) -> FlowControl {
        self.mode
    }

    /// Register a new stream with the engine.
    ///
    /// Every stream started successfully receives exactly one terminal
    /// callback, even if the engine terminates before the stream is used.
    pub fn start(&self) -> Result<Stream, NetError> {
        if !self.link.is_running() {
            return Err(NetError::EngineNotRunning);
        }
        let id = self.link.next_stream_id();
        let shared = Arc::new(StreamShared::default());
        let machine = StreamStateMachine::new(
            id,
            self.callbacks.clone(),
            self.mode,
            shared.clone(),
            self.link.idle_timeout(),
        );
        self.link.post(Command::Start(Box::new(machine)))?;
        debug!(stream_id = %id, mode = ?self.mode, "stream registered");
        Ok(Stream::new(id, self.mode, self.link.clone(), shared))
    }
}
