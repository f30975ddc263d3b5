use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by handlers and send hooks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// An error shared between the pipeline, response bodies and settlements.
pub type SharedError = Arc<dyn Error + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response has already been sent")]
    AlreadySent,

    #[error("response has already been delivered")]
    AlreadyDelivered,

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),
}

impl ResponseError {
    pub fn invalid_header<N: ToString, R: ToString>(name: N, reason: R) -> Self {
        Self::InvalidHeader { name: name.to_string(), reason: reason.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum BodyError {
    #[error("invalid json body: {source}")]
    InvalidJson {
        #[from]
        source: serde_json::Error,
    },
}
