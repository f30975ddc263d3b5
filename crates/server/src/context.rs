use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sans_http::event::EventChannel;
use sans_http::protocol::{Request, Response, SharedError};

use crate::PhaseError;
use crate::hook::runner::{self, Outcome};
use crate::hook::{Handler, Hook, HookRegistry, Phase};

/// What every handler receives: the request, its response and access to the hooks of the
/// server for this request only.
pub struct RequestContext {
    request: Request,
    pub(crate) registry: Arc<HookRegistry>,
    pub(crate) once: Vec<(Phase, Hook)>,
}

impl RequestContext {
    pub(crate) fn new(request: Request, registry: Arc<HookRegistry>) -> Self {
        Self { request, registry, once: vec![] }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        self.request.response()
    }

    pub fn response_mut(&mut self) -> &mut Response {
        self.request.response_mut()
    }

    pub fn events(&self) -> &EventChannel {
        self.request.events()
    }

    /// Looks a phase up by the name it was defined with.
    pub fn phase(&self, name: &str) -> Option<Phase> {
        self.registry.lookup(name)
    }

    /// Registers a hook for this request only. It runs once, at its weight, the next time
    /// `phase` reaches that position. Added to a running phase whose cursor is already past
    /// that weight, it runs right after the current hook.
    pub fn hook_once(&mut self, phase: Phase, weight: i32, handler: Handler) -> Result<(), PhaseError> {
        if !self.registry.contains(phase) {
            return Err(PhaseError::UnknownPhase(format!("#{}", phase.index())));
        }
        self.once.push((phase, Hook::new(weight, handler)));
        Ok(())
    }

    /// Runs a custom phase and resolves with the error left in flight, if any.
    ///
    /// The request and response phases are driven by the server and cannot be run this way.
    pub fn run_phase(&mut self, phase: Phase) -> BoxFuture<'_, Result<(), SharedError>> {
        Box::pin(async move {
            let name = self.registry.name(phase).map(str::to_owned);
            match name {
                None => Err(Arc::new(PhaseError::UnknownPhase(format!("#{}", phase.index()))) as SharedError),
                Some(name) if phase.is_builtin() => Err(Arc::new(PhaseError::Reserved(name)) as SharedError),
                Some(_) => match runner::run(self, phase).await {
                    Outcome::Completed | Outcome::Sent => Ok(()),
                    Outcome::Failed(e) => Err(e),
                },
            }
        })
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("once", &self.once.len())
            .finish_non_exhaustive()
    }
}
