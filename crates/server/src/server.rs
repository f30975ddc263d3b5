//! The server facade.
//!
//! A [`Server`] is assembled once by a [`ServerBuilder`] and is cheap to clone. Every call to
//! [`Server::request`] normalizes the input into a fresh request and hands back a
//! [`PendingRequest`]; awaiting it drives the request through its phases and resolves with the
//! [`Settlement`] exactly once.
//!
//! Processing a request:
//!
//! 1. the request phase runs, raced against the timeout; the race ends as soon as the
//!    response is sent
//! 2. a request phase that ends without a send answers 404, or sends whatever was set
//! 3. an error left unhandled before the response was sent becomes its body, which the send
//!    hooks turn into a 500; a response already sent is left alone
//! 4. the response phase runs against the sent response
//! 5. the send hooks run and the settlement is produced

use std::fmt;
use std::future::{self, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use sans_http::event::{Category, Diagnostics, Event, EventChannel, TracingDiagnostics};
use sans_http::protocol::{Body, Request, RequestId, RequestInput, Settlement, Transform, TransformChain};
use tokio::sync::watch;

use crate::builtin::{JSON_BODY_WEIGHT, JsonBodyParser, METHOD_CHECK_WEIGHT, MethodCheck};
use crate::hook::runner::{self, Outcome};
use crate::hook::{ErrorMiddleware, Handler, Hook, HookRegistry, Middleware, Order, Phase};
use crate::logging::RequestLog;
use crate::{PhaseError, RequestContext, RequestFailure, ServerBuildError, ServerConfig};

static DEFAULT_DIAGNOSTICS: Lazy<Arc<dyn Diagnostics>> = Lazy::new(|| Arc::new(TracingDiagnostics));

pub struct ServerBuilder {
    config: ServerConfig,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    transforms: TransformChain,
    registry: HookRegistry,
    errors: Vec<PhaseError>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            diagnostics: None,
            transforms: TransformChain::standard(),
            registry: HookRegistry::new(),
            errors: vec![],
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the process-wide default receiver of diagnostics for this server.
    pub fn diagnostics(mut self, diagnostics: impl Diagnostics + 'static) -> Self {
        self.diagnostics = Some(Arc::new(diagnostics));
        self
    }

    /// Appends a send hook, run after the built-in body transforms.
    pub fn send_hook(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms = self.transforms.with(transform);
        self
    }

    /// Appends a request-phase handler at weight 0.
    pub fn middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.hook(Phase::REQUEST, 0, Handler::normal(middleware))
    }

    /// Appends a request-phase error handler at weight 0.
    pub fn error_middleware(self, middleware: impl ErrorMiddleware + 'static) -> Self {
        self.hook(Phase::REQUEST, 0, Handler::error(middleware))
    }

    /// Registers `handler` against `phase`. An unknown phase fails [`build`](Self::build).
    pub fn hook(mut self, phase: Phase, weight: i32, handler: Handler) -> Self {
        if let Err(e) = self.registry.add(phase, Hook::new(weight, handler)) {
            self.errors.push(e);
        }
        self
    }

    /// Defines a custom phase, run on demand through [`RequestContext::run_phase`], and hands
    /// it to `configure` to register its hooks. A duplicate name fails [`build`](Self::build).
    pub fn define_phase<F>(mut self, name: &str, order: Order, configure: F) -> Self
    where
        F: FnOnce(Self, Phase) -> Self,
    {
        match self.registry.define(name, order) {
            Ok(phase) => configure(self, phase),
            Err(e) => {
                self.errors.push(e);
                self
            }
        }
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let methods = self.config.validate()?;
        if let Some(e) = self.errors.into_iter().next() {
            return Err(e.into());
        }

        let mut registry = self.registry;
        if self.config.method_check {
            registry.add(Phase::REQUEST, Hook::new(METHOD_CHECK_WEIGHT, Handler::normal(MethodCheck::new(methods))))?;
        }
        registry.add(Phase::REQUEST, Hook::new(JSON_BODY_WEIGHT, Handler::normal(JsonBodyParser)))?;

        let inner = ServerInner {
            config: self.config,
            registry: Arc::new(registry),
            diagnostics: self.diagnostics.unwrap_or_else(|| Arc::clone(&*DEFAULT_DIAGNOSTICS)),
            transforms: self.transforms,
        };
        Ok(Server { inner: Arc::new(inner) })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<HookRegistry>,
    diagnostics: Arc<dyn Diagnostics>,
    transforms: TransformChain,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn phase(&self, name: &str) -> Option<Phase> {
        self.inner.registry.lookup(name)
    }

    /// Normalizes `input` into a request. Nothing runs until the returned value is awaited.
    pub fn request(&self, input: impl Into<RequestInput>) -> PendingRequest {
        let request = Request::with_pipeline(input.into(), Arc::clone(&self.inner.diagnostics), self.inner.transforms.clone());
        PendingRequest { server: Arc::clone(&self.inner), request }
    }

    /// Like [`request`](Self::request), also handing the outcome to `callback` once.
    pub fn request_with<F>(&self, input: impl Into<RequestInput>, callback: F) -> BoxFuture<'static, Result<Settlement, RequestFailure>>
    where
        F: FnOnce(&Result<Settlement, RequestFailure>) + Send + 'static,
    {
        let pending = self.request(input);
        Box::pin(async move {
            let result = pending.await;
            callback(&result);
            result
        })
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// A normalized request waiting to be processed.
///
/// It exposes the events of the request, which can be observed with
/// [`on_event`](Self::on_event), and resolves with its outcome when awaited.
pub struct PendingRequest {
    server: Arc<ServerInner>,
    request: Request,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.request.id()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn events(&self) -> &EventChannel {
        self.request.events()
    }

    /// Calls `listener` for every event of the request, including those already recorded.
    #[must_use]
    pub fn on_event<F>(self, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let events = self.request.events();
        for event in &events.events() {
            listener(event);
        }
        events.subscribe(listener);
        self
    }
}

impl IntoFuture for PendingRequest {
    type Output = Result<Settlement, RequestFailure>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(process(self.server, self.request))
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").field("request", &self.request).finish_non_exhaustive()
    }
}

enum Interrupt {
    Sent,
    TimedOut(Duration),
}

enum Progress {
    Finished(Outcome),
    Interrupted(Interrupt),
}

/// Resolves when the response is sent or when `limit` elapses first.
async fn watchdog(limit: Option<Duration>, mut sent: watch::Receiver<bool>) -> Interrupt {
    let deadline = async {
        match limit {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => future::pending().await,
        }
    };

    tokio::select! {
        limit = deadline => Interrupt::TimedOut(limit),
        _ = sent.wait_for(|sent| *sent) => Interrupt::Sent,
    }
}

fn request_line(request: &Request) -> String {
    let method = request.unmatched_method().unwrap_or(request.method().as_str());
    if request.query().is_empty() {
        format!("{method} {}", request.path())
    } else {
        format!("{method} {}?{}", request.path(), request.query())
    }
}

async fn process(server: Arc<ServerInner>, request: Request) -> Result<Settlement, RequestFailure> {
    let config = &server.config;
    let events = request.events().clone();
    let log = RequestLog::new(config.logs, request.id()).attach(&events);
    let line = request_line(&request);
    events.info(Category::Request, format!("start {line}"));

    let mut ctx = RequestContext::new(request, Arc::clone(&server.registry));
    let sent = ctx.response().subscribe_sent();

    let progress = tokio::select! {
        biased;
        outcome = runner::run(&mut ctx, Phase::REQUEST) => Progress::Finished(outcome),
        interrupt = watchdog(config.timeout(), sent) => Progress::Interrupted(interrupt),
    };

    let mut failure = None;
    match progress {
        Progress::Finished(Outcome::Completed) if !ctx.response().is_sent() => {
            if ctx.response().is_pristine() {
                events.info(Category::Request, "no handler sent a response");
                ctx.response_mut().send_status(404)?;
            } else {
                ctx.response_mut().send()?;
            }
        }
        Progress::Finished(Outcome::Failed(error)) => {
            events.error(Category::Request, format!("unhandled error: {error}"));
            ctx.response_mut().set_body(Body::Error(Arc::clone(&error)));
            failure = Some(error);
        }
        Progress::Interrupted(Interrupt::TimedOut(limit)) if !ctx.response().is_sent() => {
            events.warn(Category::Timeout, format!("no response after {limit:?}"));
            ctx.response_mut().send_status(config.timeout_status)?;
        }
        Progress::Finished(_) | Progress::Interrupted(_) => {}
    }

    let response = ctx.response_mut();
    if !response.is_sent() {
        response.send()?;
    }
    response.begin_post_processing();

    if let Outcome::Failed(error) = runner::run(&mut ctx, Phase::RESPONSE).await {
        events.error(Category::Response, format!("unhandled error: {error}"));
        ctx.response_mut().set_body(Body::Error(Arc::clone(&error)));
        failure = failure.or(Some(error));
    }

    let settlement = ctx.response_mut().finish()?;
    log.finish(&events, &format!("{line} -> {}", settlement.status_code));

    match failure {
        Some(source) if config.rejectable => Err(RequestFailure::Unhandled { source, settlement: Box::new(settlement) }),
        _ => Ok(settlement),
    }
}
