//! Transport-agnostic HTTP request and response entities.
//!
//! This crate provides the data side of the sans-server pipeline: a normalized [`Request`]
//! that owns exactly one [`Response`], the response's exactly-once send with its chain of
//! send hooks, and the per-request [`EventChannel`] every component reports to.
//!
//! No sockets are involved. An adapter turns whatever it receives into a
//! [`RequestInput`], and the final [`Settlement`] back into bytes on the wire.
//!
//! # Example
//!
//! ```
//! use sans_http::protocol::{Request, RequestInput};
//! use serde_json::json;
//!
//! let mut request = Request::new(RequestInput::new("/users/?active").method("get"));
//! assert_eq!(request.path(), "/users");
//!
//! request.response_mut().send_body(json!({ "users": [] })).unwrap();
//! let settlement = request.response_mut().finish().unwrap();
//!
//! assert_eq!(settlement.status_code, 200);
//! assert_eq!(settlement.body, r#"{"users":[]}"#);
//! assert_eq!(settlement.header("content-type"), Some("application/json"));
//! ```
//!
//! # Architecture
//!
//! - [`event`]: per-request event channel and the [`Diagnostics`](event::Diagnostics) seam
//! - [`protocol`]: request, response, body, query, cookie and send-hook types
//!
//! [`Request`]: protocol::Request
//! [`Response`]: protocol::Response
//! [`RequestInput`]: protocol::RequestInput
//! [`Settlement`]: protocol::Settlement
//! [`EventChannel`]: event::EventChannel

pub mod event;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
