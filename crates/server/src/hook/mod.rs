//! Hooks and the phases they are registered against.
//!
//! A [`Hook`] pairs a [`Handler`] with a weight. Hooks of a [`Phase`] are dispatched by
//! weight, ties broken by registration order. The request phase runs ascending; the response
//! phase runs as a stack, so the hook registered last runs first.
//!
//! A handler is either normal or error handling, never both. While an error is in flight only
//! error handlers are called; otherwise only normal ones are. Returning `Err` from any handler
//! puts (or keeps) the chain in error mode, returning `Ok` clears it.

mod registry;
pub(crate) mod runner;

pub use registry::HookRegistry;

use std::any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use sans_http::protocol::{BoxError, SharedError};

use crate::RequestContext;

pub type HookResult = Result<(), BoxError>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> HookResult;

    fn name(&self) -> &str {
        any::type_name::<Self>()
    }
}

#[async_trait]
pub trait ErrorMiddleware: Send + Sync {
    /// Handles `error`. `Ok` marks it handled, `Err` keeps the chain in error mode.
    async fn call(&self, error: SharedError, ctx: &mut RequestContext) -> HookResult;

    fn name(&self) -> &str {
        any::type_name::<Self>()
    }
}

#[derive(Clone)]
pub enum Handler {
    Normal(Arc<dyn Middleware>),
    Error(Arc<dyn ErrorMiddleware>),
}

impl Handler {
    pub fn normal(middleware: impl Middleware + 'static) -> Self {
        Self::Normal(Arc::new(middleware))
    }

    pub fn error(middleware: impl ErrorMiddleware + 'static) -> Self {
        Self::Error(Arc::new(middleware))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Normal(middleware) => middleware.name(),
            Self::Error(middleware) => middleware.name(),
        }
    }

    pub fn is_error_handling(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_error_handling() { "Error" } else { "Normal" };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

const ANONYMOUS: &str = "anonymous";

/// An async closure used as a [`Middleware`].
pub struct FnMiddleware<F> {
    f: F,
    name: Cow<'static, str>,
}

/// Wraps an async closure. The closure has to box its future, which keeps the borrow of the
/// context expressible:
///
/// ```
/// use sans_server::hook::{HookResult, handler_fn};
///
/// let hello = handler_fn(|ctx| {
///     Box::pin(async move {
///         ctx.response_mut().send_body("hello")?;
///         HookResult::Ok(())
///     })
/// })
/// .with_name("hello");
/// ```
pub fn handler_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HookResult> + Send + Sync,
{
    FnMiddleware { f, name: Cow::Borrowed(ANONYMOUS) }
}

impl<F> FnMiddleware<F> {
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HookResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> HookResult {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A synchronous closure used as a [`Middleware`].
pub struct SyncMiddleware<F> {
    f: F,
    name: Cow<'static, str>,
}

pub fn handler_sync<F>(f: F) -> SyncMiddleware<F>
where
    F: Fn(&mut RequestContext) -> HookResult + Send + Sync,
{
    SyncMiddleware { f, name: Cow::Borrowed(ANONYMOUS) }
}

impl<F> SyncMiddleware<F> {
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> Middleware for SyncMiddleware<F>
where
    F: Fn(&mut RequestContext) -> HookResult + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> HookResult {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An async closure used as an [`ErrorMiddleware`].
pub struct FnErrorMiddleware<F> {
    f: F,
    name: Cow<'static, str>,
}

pub fn error_handler_fn<F>(f: F) -> FnErrorMiddleware<F>
where
    F: for<'a> Fn(SharedError, &'a mut RequestContext) -> BoxFuture<'a, HookResult> + Send + Sync,
{
    FnErrorMiddleware { f, name: Cow::Borrowed(ANONYMOUS) }
}

impl<F> FnErrorMiddleware<F> {
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> ErrorMiddleware for FnErrorMiddleware<F>
where
    F: for<'a> Fn(SharedError, &'a mut RequestContext) -> BoxFuture<'a, HookResult> + Send + Sync,
{
    async fn call(&self, error: SharedError, ctx: &mut RequestContext) -> HookResult {
        (self.f)(error, ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A synchronous closure used as an [`ErrorMiddleware`].
pub struct SyncErrorMiddleware<F> {
    f: F,
    name: Cow<'static, str>,
}

pub fn error_handler_sync<F>(f: F) -> SyncErrorMiddleware<F>
where
    F: Fn(SharedError, &mut RequestContext) -> HookResult + Send + Sync,
{
    SyncErrorMiddleware { f, name: Cow::Borrowed(ANONYMOUS) }
}

impl<F> SyncErrorMiddleware<F> {
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> ErrorMiddleware for SyncErrorMiddleware<F>
where
    F: Fn(SharedError, &mut RequestContext) -> HookResult + Send + Sync,
{
    async fn call(&self, error: SharedError, ctx: &mut RequestContext) -> HookResult {
        (self.f)(error, ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A handler registered against a phase.
#[derive(Debug, Clone)]
pub struct Hook {
    weight: i32,
    seq: u64,
    handler: Handler,
}

impl Hook {
    pub fn new(weight: i32, handler: Handler) -> Self {
        Self { weight, seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed), handler }
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// Position of the hook within its phase, ascending.
    pub(crate) fn position(&self) -> (i32, u64) {
        (self.weight, self.seq)
    }
}

/// Key of a phase within a [`HookRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Phase(usize);

impl Phase {
    /// Hooks run before a response exists, in ascending weight.
    pub const REQUEST: Self = Self(0);
    /// Hooks run after the response was sent and before it is delivered, as a stack.
    pub const RESPONSE: Self = Self(1);

    pub(crate) fn index(self) -> usize {
        self.0
    }

    pub(crate) fn is_builtin(self) -> bool {
        self == Self::REQUEST || self == Self::RESPONSE
    }
}

/// Dispatch order of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// lowest weight first, earliest registration first among equal weights
    Ascending,
    /// highest weight first, latest registration first among equal weights
    Stack,
}
