//! Per-request event channel and the process-level diagnostics seam.
//!
//! Every decision the pipeline takes for a request (a handler starting, a header being
//! rejected, a second `send`) is recorded on that request's [`EventChannel`]. The channel
//! keeps the ordered history so it can be flushed as one grouped log line once the request
//! is settled, and fans each event out to any subscribed listener as it happens.
//!
//! Conditions that indicate a programming error rather than a bad request are additionally
//! reported through a [`Diagnostics`] collaborator, which is injected by whoever owns the
//! pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::Level;

/// The part of the pipeline an [`Event`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Request,
    Response,
    Hook,
    Server,
    Timeout,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Hook => "hook",
            Self::Server => "server",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured log record produced while processing one request.
#[derive(Debug, Clone)]
pub struct Event {
    level: Level,
    category: Category,
    message: String,
    elapsed: Duration,
}

impl Event {
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Time between the creation of the channel and the emission of this event.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Publish/subscribe channel scoped to a single request.
///
/// Cloning the channel yields another handle to the same history; the request and its
/// response each hold one.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

struct ChannelInner {
    started: Instant,
    listeners: Vec<Listener>,
    events: Vec<Event>,
}

impl EventChannel {
    pub fn new() -> Self {
        let inner = ChannelInner { started: Instant::now(), listeners: vec![], events: vec![] };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener invoked for every event emitted after this call.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.lock().listeners.push(Arc::new(listener));
    }

    pub fn emit(&self, level: Level, category: Category, message: impl Into<String>) {
        let (event, listeners) = {
            let mut inner = self.lock();
            let event = Event { level, category, message: message.into(), elapsed: inner.started.elapsed() };
            inner.events.push(event.clone());
            (event, inner.listeners.clone())
        };

        // listeners run outside the lock so they may emit themselves
        for listener in &listeners {
            listener(&event);
        }
    }

    pub fn debug(&self, category: Category, message: impl Into<String>) {
        self.emit(Level::DEBUG, category, message);
    }

    pub fn info(&self, category: Category, message: impl Into<String>) {
        self.emit(Level::INFO, category, message);
    }

    pub fn warn(&self, category: Category, message: impl Into<String>) {
        self.emit(Level::WARN, category, message);
    }

    pub fn error(&self, category: Category, message: impl Into<String>) {
        self.emit(Level::ERROR, category, message);
    }

    /// Returns a copy of every event recorded so far, in emission order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().started.elapsed()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventChannel")
            .field("events", &inner.events.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

/// Programmer errors surfaced through [`Diagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// `send` was called on a response that had already been sent.
    AlreadySent,
    /// a response was asked to deliver its final state twice.
    AlreadyDelivered,
    /// a handler failed after its response had been sent.
    ErrorAfterSend,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySent => f.write_str("already-sent"),
            Self::AlreadyDelivered => f.write_str("already-delivered"),
            Self::ErrorAfterSend => f.write_str("error-after-send"),
        }
    }
}

/// Receiver for unrecoverable or contract-violating conditions.
#[cfg_attr(test, mockall::automock)]
pub trait Diagnostics: Send + Sync {
    fn emit(&self, kind: DiagnosticKind, message: &str);
}

/// [`Diagnostics`] implementation writing to the `tracing` error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn emit(&self, kind: DiagnosticKind, message: &str) {
        tracing::error!(kind = %kind, "{message}");
    }
}
