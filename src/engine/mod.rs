//! Engine lifecycle.
//!
//! An [`Engine`] owns one dedicated thread running a single-threaded tokio
//! runtime. Everything that touches stream state happens on that thread,
//! inside the [`dispatcher`]; public calls from other threads only post
//! commands to it. [`Engine::terminate`] is the one call that waits: it
//! returns after every live stream has received its terminal callback and
//! the engine thread has exited.

pub mod config;
pub(crate) mod dispatcher;
pub mod runtime;
pub mod stats;

use crate::base::neterror::NetError;
use crate::hints::table::{validate_hint, validate_suffix};
use crate::hints::{EndpointCache, HintResolver, ProtocolHints};
use crate::stream::{FlowControl, StreamCallbacks, StreamId, StreamPrototype};
use crate::transport::TransportEvents;
use dispatcher::{Command, Dispatcher};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use config::{DnsCacheConfig, EngineBuilder, EngineConfig};
pub use dispatcher::CLEARTEXT_NOT_PERMITTED;
pub use runtime::RuntimeGuards;
pub use stats::EngineStats;

const ENGINE_THREAD_NAME: &str = "mobinet-engine";

/// Engine lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running,
    Terminating,
    Terminated,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EngineState::NotStarted,
            1 => EngineState::Running,
            2 => EngineState::Terminating,
            _ => EngineState::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineState::NotStarted => 0,
            EngineState::Running => 1,
            EngineState::Terminating => 2,
            EngineState::Terminated => 3,
        }
    }
}

/// State visible to every handle of one engine.
#[derive(Debug)]
pub(crate) struct EngineShared {
    state: AtomicU8,
    next_stream_id: AtomicU64,
    stats: Arc<EngineStats>,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::NotStarted.as_u8()),
            next_stream_id: AtomicU64::new(1),
            stats: Arc::new(EngineStats::new()),
        }
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Sending side of the engine, carried by prototypes and stream handles.
#[derive(Clone)]
pub(crate) struct EngineLink {
    commands: UnboundedSender<Command>,
    shared: Arc<EngineShared>,
    idle_timeout: Duration,
}

impl EngineLink {
    pub(crate) fn is_running(&self) -> bool {
        self.shared.state() == EngineState::Running
    }

    /// Post a command while the engine is running.
    pub(crate) fn post(&self, command: Command) -> Result<(), NetError> {
        if !self.is_running() {
            return Err(NetError::EngineNotRunning);
        }
        self.try_post(command)
    }

    /// Post regardless of lifecycle; fails once the dispatcher stopped listening.
    pub(crate) fn try_post(&self, command: Command) -> Result<(), NetError> {
        self.commands
            .send(command)
            .map_err(|_| NetError::EngineNotRunning)
    }

    pub(crate) fn next_stream_id(&self) -> StreamId {
        StreamId::new(self.shared.next_stream_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

impl fmt::Debug for EngineLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLink")
            .field("state", &self.shared.state())
            .finish()
    }
}

struct EngineThread {
    handle: JoinHandle<()>,
    id: ThreadId,
}

struct EngineInner {
    shared: Arc<EngineShared>,
    pending: Mutex<Option<EngineConfig>>,
    hints: ProtocolHints,
    guards: OnceLock<RuntimeGuards>,
    link: OnceLock<EngineLink>,
    thread: Mutex<Option<EngineThread>>,
}

/// A running (or runnable) stream engine.
///
/// Cloning yields another handle to the same engine. Dropping the last
/// handle of a running engine terminates it.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine in the `NotStarted` state.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                shared: Arc::new(EngineShared::new()),
                pending: Mutex::new(Some(config)),
                hints: ProtocolHints::new(),
                guards: OnceLock::new(),
                link: OnceLock::new(),
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn state(&self) -> EngineState {
        self.inner.shared.state()
    }

    /// Validate the configuration and spawn the engine thread.
    ///
    /// Fails with a configuration error before anything is spawned. A
    /// missing or malformed persisted cache never fails start.
    pub fn start(&self) -> Result<(), NetError> {
        let mut pending = lock(&self.inner.pending);
        if self.state() != EngineState::NotStarted {
            return Err(NetError::EngineStartFailed {
                message: "engine already started".to_string(),
            });
        }
        let Some(config) = pending.as_mut() else {
            return Err(NetError::EngineStartFailed {
                message: "engine configuration already consumed".to_string(),
            });
        };
        config.validate()?;

        let stats = self.inner.shared.stats.clone();
        let guards = RuntimeGuards::new(config.runtime_guards.clone());
        stats.incr("runtime.load_success");

        for (host, port) in &config.quic_hints {
            self.inner.hints.add_quic_hint(host, *port)?;
        }
        for suffix in &config.quic_canonical_suffixes {
            self.inner.hints.add_canonical_suffix(suffix)?;
        }
        let cache = match (&config.key_value_store, config.dns_cache.enabled) {
            (Some((namespace, store)), true) => {
                debug!(namespace = %namespace, "loading persisted endpoint cache");
                Some(EndpointCache::load(store.as_ref(), &stats))
            }
            (None, true) => Some(EndpointCache::new()),
            (_, false) => None,
        };
        let resolver = HintResolver::new(self.inner.hints.clone(), cache, stats.clone());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetError::EngineStartFailed {
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(tx.clone());
        let options = config.transport_options();
        let factory = config.take_transport_factory();
        let cleartext_permitted = config.cleartext_permitted;
        let idle_timeout = config.stream_idle_timeout();

        let dispatcher_stats = stats.clone();
        let handle = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let transport = factory(events, &options);
                    Dispatcher::new(rx, transport, resolver, dispatcher_stats, cleartext_permitted)
                        .run()
                        .await;
                });
            })
            .map_err(|e| NetError::EngineStartFailed {
                message: e.to_string(),
            })?;

        let id = handle.thread().id();
        *lock(&self.inner.thread) = Some(EngineThread { handle, id });
        let _ = self.inner.guards.set(guards);
        let _ = self.inner.link.set(EngineLink {
            commands: tx,
            shared: self.inner.shared.clone(),
            idle_timeout,
        });
        *pending = None;
        self.inner.shared.set_state(EngineState::Running);
        debug!(idle_timeout = ?idle_timeout, "engine started");
        Ok(())
    }

    /// New factory for streams sharing `callbacks` and `mode`.
    pub fn new_stream_prototype(
        &self,
        callbacks: StreamCallbacks,
        mode: FlowControl,
    ) -> Result<StreamPrototype, NetError> {
        match self.inner.link.get() {
            Some(link) if link.is_running() => {
                Ok(StreamPrototype::new(callbacks, mode, link.clone()))
            }
            _ => Err(NetError::EngineNotRunning),
        }
    }

    /// Cancel every live stream, wait for the engine thread to exit.
    ///
    /// Every stream without a committed terminal callback receives
    /// `on_cancel` before this returns. Must not be called from a callback.
    pub fn terminate(&self) -> Result<(), NetError> {
        self.inner.terminate()
    }

    /// Diagnostics counters as `name: value` lines.
    pub fn dump_stats(&self) -> Result<String, NetError> {
        match self.state() {
            EngineState::NotStarted => Err(NetError::EngineNotRunning),
            _ => Ok(self.inner.shared.stats.dump()),
        }
    }

    /// Live counters.
    pub fn stats(&self) -> &EngineStats {
        &self.inner.shared.stats
    }

    /// Whether a runtime guard is on.
    pub fn runtime_feature_enabled(&self, name: &str) -> bool {
        if let Some(guards) = self.inner.guards.get() {
            return guards.enabled(name);
        }
        let pending = lock(&self.inner.pending);
        match pending.as_ref() {
            Some(config) => RuntimeGuards::new(config.runtime_guards.clone()).enabled(name),
            None => RuntimeGuards::default().enabled(name),
        }
    }

    /// Add an exact QUIC hint before start.
    pub fn add_quic_hint(&self, host: &str, port: u16) -> Result<(), NetError> {
        let mut pending = lock(&self.inner.pending);
        match pending.as_mut() {
            Some(config) if self.state() == EngineState::NotStarted => {
                validate_hint(host, port)?;
                config.quic_hints.push((host.to_string(), port));
                Ok(())
            }
            _ => Err(NetError::ConfigurationFrozen),
        }
    }

    /// Add a canonical QUIC suffix before start.
    pub fn add_quic_canonical_suffix(&self, suffix: &str) -> Result<(), NetError> {
        let mut pending = lock(&self.inner.pending);
        match pending.as_mut() {
            Some(config) if self.state() == EngineState::NotStarted => {
                validate_suffix(suffix)?;
                config.quic_canonical_suffixes.push(suffix.to_string());
                Ok(())
            }
            _ => Err(NetError::ConfigurationFrozen),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("hints", &self.inner.hints.len())
            .finish()
    }
}

impl EngineInner {
    fn terminate(&self) -> Result<(), NetError> {
        if self.shared.state() != EngineState::Running {
            return Err(NetError::EngineNotRunning);
        }
        let thread = {
            let mut slot = lock(&self.thread);
            if slot
                .as_ref()
                .is_some_and(|t| t.id == thread::current().id())
            {
                return Err(NetError::TerminateOnEngineThread);
            }
            slot.take()
        };
        self.shared.set_state(EngineState::Terminating);
        debug!("engine terminating");

        let (done_tx, done_rx) = oneshot::channel();
        let posted = self
            .link
            .get()
            .map(|link| link.try_post(Command::Terminate { done: done_tx }).is_ok())
            .unwrap_or(false);
        // blocking_recv panics inside a runtime; the join below still waits for the drain.
        if posted && tokio::runtime::Handle::try_current().is_err() {
            match done_rx.blocking_recv() {
                Ok(cancelled) => debug!(cancelled, "engine drained"),
                Err(_) => warn!("engine thread exited before acknowledging terminate"),
            }
        }
        if let Some(thread) = thread {
            if thread.handle.join().is_err() {
                warn!("engine thread panicked");
            }
        }

        self.shared.set_state(EngineState::Terminated);
        debug!("engine terminated");
        Ok(())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if self.shared.state() != EngineState::Running {
            return;
        }
        match self.terminate() {
            Ok(()) => {}
            Err(NetError::TerminateOnEngineThread) => {
                // Last handle released from a callback: stop without waiting on ourselves.
                self.shared.set_state(EngineState::Terminating);
                if let Some(link) = self.link.get() {
                    let (done, _) = oneshot::channel();
                    let _ = link.try_post(Command::Terminate { done });
                }
            }
            Err(e) => warn!(error = %e, "engine drop failed to terminate"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
