//! Send hooks: the transformations applied exactly once to a response before delivery.
//!
//! The standard chain, in order:
//!
//! 1. [`ErrorBody`]: an error body resets the response to a plain 500
//! 2. [`BinaryBody`]: bytes are base64 encoded as `application/octet-stream`
//! 3. [`JsonBody`]: objects and arrays are serialized as `application/json`
//! 4. [`ScalarBody`]: remaining values are stringified as `text/plain`
//! 5. [`DefaultContentType`]: a string without a content type becomes `text/html`
//!
//! An absent or `null` body is delivered as an empty string without a content type.
//!
//! A hook that fails replaces the body with its error and the remaining hooks still run.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::event::{Category, EventChannel};
use crate::protocol::{Body, BoxError, Cookie, SharedError, reason_phrase};

/// The mutable state of a response.
#[derive(Debug, Clone, Default)]
pub struct Parts {
    pub status: u16,
    pub headers: HeaderMap,
    pub cookies: Vec<Cookie>,
    pub body: Body,
    pub error: Option<SharedError>,
}

impl Parts {
    fn set_content_type(&mut self, mime: &mime::Mime) {
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            self.headers.insert(CONTENT_TYPE, value);
        }
    }
}

pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorBody;

impl Transform for ErrorBody {
    fn name(&self) -> &str {
        "error-body"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        if let Body::Error(error) = &parts.body {
            let error = Arc::clone(error);
            parts.headers.clear();
            parts.cookies.clear();
            parts.status = 500;
            parts.set_content_type(&mime::TEXT_PLAIN);
            parts.body = Body::Text(reason_phrase(500));
            parts.error = Some(error);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryBody;

impl Transform for BinaryBody {
    fn name(&self) -> &str {
        "binary-body"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        if let Body::Binary(bytes) = &parts.body {
            parts.body = Body::Text(BASE64_STANDARD.encode(bytes));
            parts.set_content_type(&mime::APPLICATION_OCTET_STREAM);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JsonBody;

impl Transform for JsonBody {
    fn name(&self) -> &str {
        "json-body"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        if let Body::Json(value @ (Value::Object(_) | Value::Array(_))) = &parts.body {
            parts.body = Body::Text(serde_json::to_string(value)?);
            parts.set_content_type(&mime::APPLICATION_JSON);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarBody;

impl Transform for ScalarBody {
    fn name(&self) -> &str {
        "scalar-body"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        match &parts.body {
            Body::Json(Value::Null) => parts.body = Body::Empty,
            Body::Json(Value::String(s)) => parts.body = Body::Text(s.clone()),
            Body::Json(value @ (Value::Bool(_) | Value::Number(_))) => {
                parts.body = Body::Text(value.to_string());
                parts.set_content_type(&mime::TEXT_PLAIN);
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DefaultContentType;

impl Transform for DefaultContentType {
    fn name(&self) -> &str {
        "default-content-type"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        if matches!(parts.body, Body::Text(_)) && !parts.headers.contains_key(CONTENT_TYPE) {
            parts.set_content_type(&mime::TEXT_HTML);
        }
        Ok(())
    }
}

static STANDARD: [&dyn Transform; 5] = [&ErrorBody, &BinaryBody, &JsonBody, &ScalarBody, &DefaultContentType];

/// An ordered list of send hooks: the standard chain followed by user hooks.
#[derive(Clone, Default)]
pub struct TransformChain {
    extra: Vec<Arc<dyn Transform>>,
}

impl TransformChain {
    pub fn standard() -> Self {
        Self::default()
    }

    /// Appends a hook that runs after the standard chain.
    pub fn with<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.extra.push(Arc::new(transform));
        self
    }

    pub fn push(&mut self, transform: Arc<dyn Transform>) {
        self.extra.push(transform);
    }

    fn hooks(&self) -> impl Iterator<Item = &dyn Transform> {
        STANDARD.iter().copied().chain(self.extra.iter().map(|hook| &**hook))
    }

    /// Runs every hook against `parts`. On return the body is always [`Body::Text`].
    pub fn apply(&self, parts: &mut Parts, events: &EventChannel) {
        for hook in self.hooks() {
            run(hook, parts, events);
        }

        // a user hook failed or left a raw value behind
        if !matches!(parts.body, Body::Text(_) | Body::Empty) {
            for hook in &STANDARD {
                run(*hook, parts, events);
            }
        }

        if !matches!(parts.body, Body::Text(_)) {
            parts.body = Body::Text(String::new());
        }
    }
}

fn run(hook: &dyn Transform, parts: &mut Parts, events: &EventChannel) {
    if let Err(e) = hook.apply(parts) {
        events.warn(Category::Response, format!("send hook {} failed: {e}", hook.name()));
        parts.body = Body::Error(Arc::from(e));
    }
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.hooks().map(|hook| hook.name()).collect();
        f.debug_struct("TransformChain").field("hooks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn normalize(body: Body) -> Parts {
        let mut parts = Parts { status: 200, body, ..Parts::default() };
        TransformChain::standard().apply(&mut parts, &EventChannel::new());
        parts
    }

    fn content_type(parts: &Parts) -> Option<&str> {
        parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn object_becomes_json() {
        let parts = normalize(Body::from(json!({"a": 1})));
        assert_eq!(parts.body.as_text(), Some(r#"{"a":1}"#));
        assert_eq!(content_type(&parts), Some("application/json"));
    }

    #[test]
    fn bytes_become_base64() {
        let parts = normalize(Body::from(Bytes::from_static(b"hello")));
        assert_eq!(parts.body.as_text(), Some("aGVsbG8="));
        assert_eq!(content_type(&parts), Some("application/octet-stream"));
    }

    #[test]
    fn scalars_become_plain_text() {
        let parts = normalize(Body::from(json!(42)));
        assert_eq!(parts.body.as_text(), Some("42"));
        assert_eq!(content_type(&parts), Some("text/plain"));
    }

    #[test]
    fn strings_default_to_html() {
        let parts = normalize(Body::from("<p>hi</p>"));
        assert_eq!(content_type(&parts), Some("text/html"));

        let parts = normalize(Body::from(""));
        assert_eq!(parts.body.as_text(), Some(""));
        assert_eq!(content_type(&parts), Some("text/html"));
    }

    #[test]
    fn absent_bodies_stay_untyped() {
        for body in [Body::empty(), Body::from(json!(null))] {
            let parts = normalize(body);
            assert_eq!(parts.body.as_text(), Some(""));
            assert_eq!(content_type(&parts), None);
        }
    }

    #[test]
    fn error_resets_everything() {
        let mut parts = Parts { status: 201, body: Body::from(BoxError::from("boom")), ..Parts::default() };
        parts.headers.insert("x-custom", HeaderValue::from_static("1"));
        parts.cookies.push(Cookie::new("a", "b", crate::protocol::CookieOptions::default()));

        TransformChain::standard().apply(&mut parts, &EventChannel::new());

        assert_eq!(parts.status, 500);
        assert_eq!(parts.body.as_text(), Some("Internal Server Error"));
        assert!(parts.cookies.is_empty());
        assert_eq!(parts.headers.len(), 1);
        assert_eq!(parts.error.as_ref().map(ToString::to_string), Some("boom".to_owned()));
    }

    struct Failing;

    impl Transform for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn apply(&self, _parts: &mut Parts) -> Result<(), BoxError> {
            Err("transform exploded".into())
        }
    }

    #[test]
    fn failing_user_hook_is_funneled_into_error_rule() {
        let mut parts = Parts { status: 200, body: Body::from("ok"), ..Parts::default() };
        let events = EventChannel::new();
        TransformChain::standard().with(Failing).apply(&mut parts, &events);

        assert_eq!(parts.status, 500);
        assert_eq!(parts.body.as_text(), Some("Internal Server Error"));
        assert!(events.events().iter().any(|e| e.message().contains("failing")));
    }
}
