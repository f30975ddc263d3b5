use std::any::Any;

use sans_http::protocol::{ResponseError, Settlement, SharedError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("unknown phase {0}")]
    UnknownPhase(String),

    #[error("phase {0} is already defined")]
    DuplicatePhase(String),

    #[error("phase {0} is driven by the server")]
    Reserved(String),
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("phase error: {source}")]
    Phase {
        #[from]
        source: PhaseError,
    },
}

impl ServerBuildError {
    pub fn invalid_config<S: ToString>(str: S) -> Self {
        Self::InvalidConfig { reason: str.to_string() }
    }
}

/// Why a request did not resolve to a settlement.
#[derive(Error, Debug)]
pub enum RequestFailure {
    /// an error reached the end of a chain unhandled and the server is rejectable
    #[error("unhandled error: {source}")]
    Unhandled { source: SharedError, settlement: Box<Settlement> },

    #[error("response error: {source}")]
    Response {
        #[from]
        source: ResponseError,
    },
}

impl RequestFailure {
    /// The 500 response that would have been delivered, if one was produced.
    pub fn settlement(&self) -> Option<&Settlement> {
        match self {
            Self::Unhandled { settlement, .. } => Some(settlement),
            Self::Response { .. } => None,
        }
    }
}

/// A handler panicked; the payload message is kept when it is a string.
#[derive(Error, Debug)]
#[error("handler panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Self { message }
    }
}
