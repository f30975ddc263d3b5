//! A transport-agnostic HTTP request pipeline.
//!
//! `sans-server` threads requests through ordered, weighted hooks without ever touching a
//! socket. Handlers receive a [`RequestContext`] holding the normalized request and its
//! response; the first `send` wins, an error switches the chain to error handlers only, and a
//! timeout answers for handlers that never do. Every request settles exactly once into a
//! [`Settlement`](sans_http::protocol::Settlement) that an adapter can write to a real
//! connection.
//!
//! ```
//! use sans_server::Server;
//! use sans_server::hook::handler_sync;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let server = Server::builder()
//!     .middleware(handler_sync(|ctx| {
//!         let name = ctx.request().query().get_all("name").first().copied().flatten().unwrap_or("world").to_owned();
//!         ctx.response_mut().send_body(format!("hello {name}"))?;
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! let settlement = server.request("/greet?name=sans").await?;
//! assert_eq!(settlement.status_code, 200);
//! assert_eq!(settlement.body, "hello sans");
//! # Ok(())
//! # }
//! ```

mod builtin;
mod config;
mod context;
mod error;
pub mod hook;
pub mod logging;
mod server;

pub use config::{LogConfig, ServerConfig};
pub use context::RequestContext;
pub use error::{PanicError, PhaseError, RequestFailure, ServerBuildError};
pub use server::{PendingRequest, Server, ServerBuilder};
