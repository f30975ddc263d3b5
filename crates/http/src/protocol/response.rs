//! The response half of a request.
//!
//! A [`Response`] is a mutable builder until it is sent. Sending is exactly-once: the first
//! `send*` call wins, and every later attempt is reported through the event channel and the
//! injected [`Diagnostics`] without touching the state that was sent.
//!
//! The lifecycle is tracked by [`Stage`]:
//!
//! - [`Stage::Open`]: freely mutable
//! - [`Stage::Sent`]: `send` was called; further mutation is ignored with a warning
//! - [`Stage::PostProcessing`]: response-phase hooks are running and may adjust the response
//! - [`Stage::Delivered`]: the send hooks ran and the [`Settlement`] was produced

use std::fmt;
use std::sync::Arc;

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::watch;

use crate::ensure;
use crate::event::{Category, DiagnosticKind, Diagnostics, EventChannel};
use crate::protocol::{Body, Cookie, CookieOptions, Parts, ResponseError, SharedError, TransformChain};

/// Standard reason phrase of `code`, or the code itself when there is none.
pub fn reason_phrase(code: u16) -> String {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .map_or_else(|| code.to_string(), str::to_owned)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Sent,
    PostProcessing,
    Delivered,
}

/// A detached copy of the response state.
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub body: Body,
    pub cookies: Vec<Cookie>,
    pub headers: HeaderMap,
    pub sent: bool,
    pub status_code: u16,
}

/// The final, delivered outcome of a request.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub cookies: Vec<Cookie>,
    pub body: String,
    /// one `Name: value` line per header followed by one `Set-Cookie` line per cookie
    pub raw_headers: String,
    pub error: Option<SharedError>,
}

impl Settlement {
    fn from_parts(parts: &Parts) -> Self {
        let mut lines: Vec<String> = parts
            .headers
            .iter()
            .map(|(name, value)| format!("{}: {}", title_case(name.as_str()), String::from_utf8_lossy(value.as_bytes())))
            .collect();
        lines.extend(parts.cookies.iter().map(|cookie| format!("Set-Cookie: {}", cookie.serialized())));

        Self {
            status_code: parts.status,
            headers: parts.headers.clone(),
            cookies: parts.cookies.clone(),
            body: parts.body.as_text().unwrap_or_default().to_owned(),
            raw_headers: lines.join("\n"),
            error: parts.error.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ResponseError> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ResponseError::invalid_header(name, e))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| ResponseError::invalid_header(name, e))?;
    Ok((header_name, header_value))
}

pub struct Response {
    parts: Parts,
    stage: Stage,
    events: EventChannel,
    diagnostics: Arc<dyn Diagnostics>,
    transforms: TransformChain,
    sent: watch::Sender<bool>,
}

impl Response {
    pub(crate) fn new(events: EventChannel, diagnostics: Arc<dyn Diagnostics>, transforms: TransformChain) -> Self {
        let (sent, _) = watch::channel(false);
        Self { parts: Parts::default(), stage: Stage::Open, events, diagnostics, transforms, sent }
    }

    /// Current status code; `0` while unset.
    pub fn status_code(&self) -> u16 {
        self.parts.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.parts.cookies
    }

    pub fn body(&self) -> &Body {
        &self.parts.body
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_sent(&self) -> bool {
        self.stage != Stage::Open
    }

    /// True while nothing at all has been set on the response.
    pub fn is_pristine(&self) -> bool {
        self.parts.status == 0
            && self.parts.headers.is_empty()
            && self.parts.cookies.is_empty()
            && self.parts.body.is_empty()
    }

    /// A receiver that flips to `true` when the response is sent.
    pub fn subscribe_sent(&self) -> watch::Receiver<bool> {
        self.sent.subscribe()
    }

    /// A snapshot of the current state; mutating it never affects the response.
    pub fn state(&self) -> ResponseState {
        ResponseState {
            body: self.parts.body.clone(),
            cookies: self.parts.cookies.clone(),
            headers: self.parts.headers.clone(),
            sent: self.is_sent(),
            status_code: self.parts.status,
        }
    }

    fn writable(&self, what: &str) -> bool {
        match self.stage {
            Stage::Open | Stage::PostProcessing => true,
            Stage::Sent | Stage::Delivered => {
                self.events.warn(Category::Response, format!("{what} ignored: response already sent"));
                false
            }
        }
    }

    pub fn status(&mut self, code: u16) -> &mut Self {
        if !self.writable("status change") {
            return self;
        }
        if StatusCode::from_u16(code).is_err() {
            self.events.warn(Category::Response, format!("{} ignored", ResponseError::InvalidStatus(code)));
            return self;
        }
        self.parts.status = code;
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if !self.writable("header change") {
            return self;
        }
        match header_pair(name, value) {
            Ok((name, value)) => {
                self.parts.headers.insert(name, value);
            }
            Err(e) => self.events.warn(Category::Response, format!("{e}, header ignored")),
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        if self.writable("header removal") {
            self.parts.headers.remove(name);
        }
        self
    }

    /// Sets a cookie, replacing any earlier cookie with the same name.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: CookieOptions) -> &mut Self {
        self.put_cookie(Cookie::new(name, value, options))
    }

    /// Sets an already expired cookie so the client drops `name`.
    pub fn clear_cookie(&mut self, name: &str, options: CookieOptions) -> &mut Self {
        self.put_cookie(Cookie::expired(name, options))
    }

    fn put_cookie(&mut self, cookie: Cookie) -> &mut Self {
        if self.writable("cookie change") {
            self.parts.cookies.retain(|existing| existing.name() != cookie.name());
            self.parts.cookies.push(cookie);
        }
        self
    }

    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        if self.writable("body change") {
            self.parts.body = body.into();
        }
        self
    }

    fn check_open(&self) -> Result<(), ResponseError> {
        if self.stage == Stage::Open {
            return Ok(());
        }
        let message = format!("cannot send: response was already sent with status {}", self.parts.status);
        self.events.error(Category::Response, message.as_str());
        self.diagnostics.emit(DiagnosticKind::AlreadySent, &message);
        Err(ResponseError::AlreadySent)
    }

    /// Sends whatever has been set so far. The status defaults to 200.
    pub fn send(&mut self) -> Result<(), ResponseError> {
        self.check_open()?;
        if self.parts.status == 0 {
            self.parts.status = 200;
        }
        self.stage = Stage::Sent;
        self.sent.send_replace(true);
        self.events.info(Category::Response, format!("sent {}", self.parts.status));
        Ok(())
    }

    pub fn send_body(&mut self, body: impl Into<Body>) -> Result<(), ResponseError> {
        self.check_open()?;
        self.parts.body = body.into();
        self.send()
    }

    pub fn send_with_status(&mut self, code: u16, body: impl Into<Body>) -> Result<(), ResponseError> {
        self.check_open()?;
        ensure!(StatusCode::from_u16(code).is_ok(), ResponseError::InvalidStatus(code));
        self.parts.status = code;
        self.parts.body = body.into();
        self.send()
    }

    /// Sends with a status, a body and headers merged over the ones already set.
    pub fn send_full(&mut self, code: u16, body: impl Into<Body>, headers: HeaderMap) -> Result<(), ResponseError> {
        self.check_open()?;
        ensure!(StatusCode::from_u16(code).is_ok(), ResponseError::InvalidStatus(code));
        self.parts.status = code;
        self.parts.body = body.into();
        self.parts.headers.extend(headers);
        self.send()
    }

    /// Sends `code` with its reason phrase as a plain text body.
    pub fn send_status(&mut self, code: u16) -> Result<(), ResponseError> {
        self.check_open()?;
        ensure!(StatusCode::from_u16(code).is_ok(), ResponseError::InvalidStatus(code));
        self.parts.status = code;
        self.parts.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        self.parts.body = Body::Text(reason_phrase(code));
        self.send()
    }

    /// Sends a 302 pointing at `location`.
    pub fn redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.check_open()?;
        let (_, value) = header_pair(LOCATION.as_str(), location)?;
        self.parts.status = 302;
        self.parts.headers.insert(LOCATION, value);
        self.send()
    }

    /// Reports `error` raised by a handler after this response was sent. The response is left
    /// as it was sent.
    pub fn report_error_after_send(&self, handler: &str, error: &SharedError) {
        let message = format!("{handler} failed after the response was sent: {error}");
        self.events.error(Category::Response, message.as_str());
        self.diagnostics.emit(DiagnosticKind::ErrorAfterSend, &message);
    }

    /// Opens a sent response to the response-phase hooks.
    #[doc(hidden)]
    pub fn begin_post_processing(&mut self) {
        if self.stage == Stage::Sent {
            self.stage = Stage::PostProcessing;
        }
    }

    /// Runs the send hooks and produces the settlement. Succeeds once per response.
    #[doc(hidden)]
    pub fn finish(&mut self) -> Result<Settlement, ResponseError> {
        match self.stage {
            Stage::Delivered => {
                let message = "response delivered more than once";
                self.events.error(Category::Response, message);
                self.diagnostics.emit(DiagnosticKind::AlreadyDelivered, message);
                return Err(ResponseError::AlreadyDelivered);
            }
            Stage::Open => self.send()?,
            Stage::Sent | Stage::PostProcessing => {}
        }

        self.transforms.apply(&mut self.parts, &self.events);
        self.stage = Stage::Delivered;
        Ok(Settlement::from_parts(&self.parts))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("stage", &self.stage)
            .field("status", &self.parts.status)
            .field("headers", &self.parts.headers)
            .field("cookies", &self.parts.cookies.len())
            .field("body", &self.parts.body)
            .finish_non_exhaustive()
    }
}
