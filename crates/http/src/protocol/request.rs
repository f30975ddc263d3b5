//! The normalized request.
//!
//! A [`Request`] is built from a loosely typed [`RequestInput`]. Normalization never fails:
//! every problem with the input is recorded as a warning on the request's event channel and
//! replaced by a sensible default, so that the pipeline can still answer with a 4xx.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::event::{Category, Diagnostics, EventChannel, TracingDiagnostics};
use crate::protocol::{Body, Query, Response, TransformChain, parse_method};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier, unique for every request created by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Query component of a [`RequestInput`]: a raw string or an already parsed mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    Raw(String),
    Map(Map<String, Value>),
}

/// Loosely typed description of an inbound request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestInput {
    pub method: Option<String>,
    pub path: Option<String>,
    pub query: Option<QueryInput>,
    /// values that are not strings are stringified
    pub headers: Map<String, Value>,
    #[serde(deserialize_with = "deserialize_body")]
    pub body: Body,
}

fn deserialize_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Body, D::Error> {
    Value::deserialize(deserializer).map(Body::from_value)
}

impl RequestInput {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: Some(path.into()), ..Self::default() }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(QueryInput::Raw(query.into()));
        self
    }

    pub fn query_map(mut self, query: Map<String, Value>) -> Self {
        self.query = Some(QueryInput::Map(query));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

impl From<&str> for RequestInput {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for RequestInput {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

pub struct Request {
    id: RequestId,
    method: Method,
    unmatched_method: Option<String>,
    path: String,
    query: Query,
    headers: HeaderMap,
    body: Body,
    events: EventChannel,
    response: Response,
}

impl Request {
    /// Normalizes `input` with the default diagnostics and send hooks.
    pub fn new(input: RequestInput) -> Self {
        Self::with_pipeline(input, Arc::new(TracingDiagnostics), TransformChain::standard())
    }

    /// Normalizes `input`, wiring the paired response to the given collaborators.
    pub fn with_pipeline(input: RequestInput, diagnostics: Arc<dyn Diagnostics>, transforms: TransformChain) -> Self {
        let events = EventChannel::new();
        let response = Response::new(events.clone(), diagnostics, transforms);
        let RequestInput { method, path, query, headers, body } = input;

        let (method, unmatched_method) = match method {
            None => (Method::GET, None),
            Some(raw) => match parse_method(&raw) {
                Some(method) => (method, None),
                None => {
                    events.warn(Category::Request, format!("unsupported method {raw:?}, treated as GET"));
                    (Method::GET, Some(raw))
                }
            },
        };

        let raw_path = path.unwrap_or_default();
        let (path, mut parsed_query) = match raw_path.split_once('?') {
            Some((path, query)) => (normalize_path(path), Query::parse(query)),
            None => (normalize_path(&raw_path), Query::new()),
        };

        match query {
            Some(QueryInput::Raw(raw)) => parsed_query.extend(Query::parse(raw.trim_start_matches('?'))),
            Some(QueryInput::Map(map)) => {
                let mut warnings = vec![];
                parsed_query.extend(Query::from_map(&map, &mut warnings));
                for warning in warnings {
                    events.warn(Category::Request, warning);
                }
            }
            None => {}
        }

        let headers = normalize_headers(headers, &events);

        Self {
            id: RequestId::next(),
            method,
            unmatched_method,
            path,
            query: parsed_query,
            headers,
            body,
            events,
            response,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The method string the request arrived with, when it was not a recognized verb.
    pub fn unmatched_method(&self) -> Option<&str> {
        self.unmatched_method.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Describes this request as input again; normalizing it yields an equal request.
    pub fn to_input(&self) -> RequestInput {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned())))
            .collect();

        RequestInput {
            method: Some(self.unmatched_method.clone().unwrap_or_else(|| self.method.to_string())),
            path: Some(self.path.clone()),
            query: (!self.query.is_empty()).then(|| QueryInput::Raw(self.query.to_query_string())),
            headers,
            body: self.body.clone(),
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_headers(headers: Map<String, Value>, events: &EventChannel) -> HeaderMap {
    let mut header_map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let value = match value {
            Value::String(s) => s,
            other => {
                events.debug(Category::Request, format!("header {name} coerced to string"));
                other.to_string()
            }
        };

        let header_name = match HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
            Ok(header_name) => header_name,
            Err(e) => {
                events.warn(Category::Request, format!("header name {name:?} ignored: {e}"));
                continue;
            }
        };
        match HeaderValue::from_str(&value) {
            Ok(header_value) => {
                header_map.append(header_name, header_value);
            }
            Err(e) => events.warn(Category::Request, format!("header {name} ignored: {e}")),
        }
    }
    header_map
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}
