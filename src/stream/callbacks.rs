//! Application handlers bound to a stream prototype.

use crate::base::intel::{FinalStreamIntel, StreamIntel};
use crate::base::neterror::NetError;
use crate::http::HeaderList;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

type HeadersFn = dyn Fn(&HeaderList, bool, &StreamIntel) + Send + Sync;
type DataFn = dyn Fn(Bytes, bool, &StreamIntel) + Send + Sync;
type TrailersFn = dyn Fn(&HeaderList, &StreamIntel) + Send + Sync;
type FinalFn = dyn Fn(&StreamIntel, &FinalStreamIntel) + Send + Sync;
type ErrorFn = dyn Fn(&NetError, &StreamIntel, &FinalStreamIntel) + Send + Sync;

/// The set of per-stream handlers.
///
/// All handlers run on the engine thread, one stream event at a time. At most
/// one of `on_complete`, `on_cancel` and `on_error` runs per stream. Handlers
/// may call back into the stream handle (for example `read_data` from
/// `on_data`) but must not call [`Engine::terminate`](crate::engine::Engine::terminate).
///
/// # Example
/// ```ignore
/// let callbacks = StreamCallbacks::new()
///     .on_headers(|headers, _end, _intel| println!("status {:?}", headers.http_status()))
///     .on_complete(|_intel, final_intel| println!("{} bytes", final_intel.received_byte_count));
/// ```
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    on_headers: Option<Arc<HeadersFn>>,
    on_data: Option<Arc<DataFn>>,
    on_trailers: Option<Arc<TrailersFn>>,
    on_complete: Option<Arc<FinalFn>>,
    on_cancel: Option<Arc<FinalFn>>,
    on_error: Option<Arc<ErrorFn>>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response headers; the flag is true for header-only responses.
    pub fn on_headers<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderList, bool, &StreamIntel) + Send + Sync + 'static,
    {
        self.on_headers = Some(Arc::new(f));
        self
    }

    /// Response body bytes; the flag marks the last body chunk.
    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(Bytes, bool, &StreamIntel) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    pub fn on_trailers<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderList, &StreamIntel) + Send + Sync + 'static,
    {
        self.on_trailers = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamIntel, &FinalStreamIntel) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamIntel, &FinalStreamIntel) + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&NetError, &StreamIntel, &FinalStreamIntel) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn headers(&self, headers: &HeaderList, end_stream: bool, intel: &StreamIntel) {
        if let Some(cb) = &self.on_headers {
            cb(headers, end_stream, intel);
        }
    }

    pub(crate) fn data(&self, data: Bytes, end_stream: bool, intel: &StreamIntel) {
        if let Some(cb) = &self.on_data {
            cb(data, end_stream, intel);
        }
    }

    pub(crate) fn trailers(&self, trailers: &HeaderList, intel: &StreamIntel) {
        if let Some(cb) = &self.on_trailers {
            cb(trailers, intel);
        }
    }

    pub(crate) fn complete(&self, intel: &StreamIntel, final_intel: &FinalStreamIntel) {
        if let Some(cb) = &self.on_complete {
            cb(intel, final_intel);
        }
    }

    pub(crate) fn cancel(&self, intel: &StreamIntel, final_intel: &FinalStreamIntel) {
        if let Some(cb) = &self.on_cancel {
            cb(intel, final_intel);
        }
    }

    pub(crate) fn error(&self, error: &NetError, intel: &StreamIntel, final_intel: &FinalStreamIntel) {
        if let Some(cb) = &self.on_error {
            cb(error, intel, final_intel);
        }
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_headers", &self.on_headers.is_some())
            .field("on_data", &self.on_data.is_some())
            .field("on_trailers", &self.on_trailers.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
