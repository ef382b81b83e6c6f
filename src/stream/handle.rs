//! Application-side stream handle.

use crate::base::neterror::NetError;
use crate::engine::dispatcher::{Command, StreamOp};
use crate::engine::EngineLink;
use crate::http::HeaderList;
use crate::stream::flowcontrol::FlowControl;
use crate::stream::state::StreamShared;
use crate::stream::StreamId;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    Open,
    Closed,
}

/// Handle to one started stream.
///
/// Every operation posts work to the engine thread and returns without
/// waiting for it. Misuse (writing before headers, writing after close,
/// `read_data` under implicit flow control) is reported synchronously;
/// transport failures only ever arrive through `on_error`.
///
/// Once the stream has reached a terminal state every operation is a silent
/// no-op. Clones share the same stream.
#[derive(Clone)]
pub struct Stream {
    id: StreamId,
    mode: FlowControl,
    link: EngineLink,
    shared: Arc<StreamShared>,
    write: Arc<Mutex<WriteState>>,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        mode: FlowControl,
        link: EngineLink,
        shared: Arc<StreamShared>,
    ) -> Self {
        Self {
            id,
            mode,
            link,
            shared,
            write: Arc::new(Mutex::new(WriteState::Idle)),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn flow_control(&self) -> FlowControl {
        self.mode
    }

    /// Whether a terminal callback has been committed for this stream.
    pub fn is_terminal(&self) -> bool {
        self.shared.is_terminal()
    }

    /// Send the request header block.
    ///
    /// `headers` must carry `:method`, `:scheme`, `:authority` and `:path`.
    /// With `end_stream` the request has no body and no further writes are
    /// allowed.
    pub fn send_headers(&self, headers: HeaderList, end_stream: bool) -> Result<(), NetError> {
        let mut write = self.lock_write();
        if *write != WriteState::Idle {
            return Err(NetError::HeadersAlreadySent);
        }
        headers.validate_request()?;
        self.post_write(
            &mut write,
            StreamOp::SendHeaders {
                headers,
                end_stream,
            },
            if end_stream {
                WriteState::Closed
            } else {
                WriteState::Open
            },
        )
    }

    /// Append request body bytes; successive calls form one ordered byte stream.
    pub fn send_data(&self, data: impl Into<Bytes>, end_stream: bool) -> Result<(), NetError> {
        let mut write = self.lock_write();
        Self::check_writable(*write)?;
        self.post_write(
            &mut write,
            StreamOp::SendData {
                data: data.into(),
                end_stream,
            },
            if end_stream {
                WriteState::Closed
            } else {
                WriteState::Open
            },
        )
    }

    /// Finish the request side, optionally with trailers.
    pub fn close(&self, trailers: HeaderList) -> Result<(), NetError> {
        let mut write = self.lock_write();
        Self::check_writable(*write)?;
        self.post_write(&mut write, StreamOp::Close { trailers }, WriteState::Closed)
    }

    /// Grant `max_bytes` of response credit. Explicit flow control only.
    pub fn read_data(&self, max_bytes: usize) -> Result<(), NetError> {
        if self.mode != FlowControl::Explicit {
            return Err(NetError::InvalidFlowControlMode);
        }
        if self.shared.is_terminal() {
            return Ok(());
        }
        self.link.post(Command::Stream {
            id: self.id,
            op: StreamOp::ReadData(max_bytes),
        })
    }

    /// Request cancellation.
    ///
    /// Completion is observed only through `on_cancel`, or through whichever
    /// terminal callback the engine committed first.
    pub fn cancel(&self) {
        if self.shared.is_terminal() {
            return;
        }
        if self
            .link
            .try_post(Command::Stream {
                id: self.id,
                op: StreamOp::Cancel,
            })
            .is_err()
        {
            trace!(stream_id = %self.id, "cancel after engine shutdown ignored");
        }
    }

    fn check_writable(write: WriteState) -> Result<(), NetError> {
        match write {
            WriteState::Idle => Err(NetError::HeadersNotSent),
            WriteState::Closed => Err(NetError::StreamAlreadyClosed),
            WriteState::Open => Ok(()),
        }
    }

    // Posting under the write lock keeps ops from racing threads in order.
    fn post_write(
        &self,
        write: &mut MutexGuard<'_, WriteState>,
        op: StreamOp,
        next: WriteState,
    ) -> Result<(), NetError> {
        if self.shared.is_terminal() {
            **write = next;
            return Ok(());
        }
        self.link.post(Command::Stream { id: self.id, op })?;
        **write = next;
        Ok(())
    }

    fn lock_write(&self) -> MutexGuard<'_, WriteState> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("terminal", &self.shared.is_terminal())
            .finish()
    }
}
