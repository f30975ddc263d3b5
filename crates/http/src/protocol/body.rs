use std::error::Error;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::protocol::{BodyError, BoxError, SharedError};

/// The payload of a request or response before it is normalized for delivery.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
    /// structured data; objects and arrays are serialized as JSON at send time
    Json(Value),
    /// an error value; sending it produces a 500 response
    Error(SharedError),
}

impl Body {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Error(Arc::new(error))
    }

    /// Converts a loosely typed value: strings become [`Body::Text`], `null` becomes
    /// [`Body::Empty`], anything else is kept as [`Body::Json`].
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Binary(bytes) => bytes.is_empty(),
            Self::Json(_) | Self::Error(_) => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Parses a text body as JSON. Returns `Ok(None)` for bodies that are not text or
    /// are blank.
    pub fn parse_json(&self) -> Result<Option<Value>, BodyError> {
        match self {
            Self::Text(s) if !s.trim().is_empty() => Ok(Some(serde_json::from_str(s)?)),
            _ => Ok(None),
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<BoxError> for Body {
    fn from(value: BoxError) -> Self {
        Self::Error(Arc::from(value))
    }
}

impl From<()> for Body {
    fn from((): ()) -> Self {
        Self::Empty
    }
}
