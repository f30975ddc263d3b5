//! Request and response entities.
//!
//! - **Request** ([`Request`]): normalization of a loosely typed [`RequestInput`] into a
//!   [`Request`], which owns its paired [`Response`]
//! - **Response** ([`Response`]): the exactly-once send and the resulting [`Settlement`]
//! - **Send hooks** ([`transform`]): body normalization applied once before delivery
//! - **Query** ([`Query`]), **method** ([`parse_method`]), **body** ([`Body`]) and
//!   **cookie** ([`Cookie`]) value types
//! - **Errors** ([`ResponseError`], [`BodyError`])

mod body;
pub use body::Body;

mod cookies;
pub use cookies::Cookie;
pub use cookies::CookieOptions;
pub use cookies::SameSite;

mod error;
pub use error::BodyError;
pub use error::BoxError;
pub use error::ResponseError;
pub use error::SharedError;

mod method;
pub use method::STANDARD_METHODS;
pub use method::parse_method;

mod query;
pub use query::Query;
pub use query::QueryValue;

mod request;
pub use request::QueryInput;
pub use request::Request;
pub use request::RequestId;
pub use request::RequestInput;

mod response;
pub use response::Response;
pub use response::ResponseState;
pub use response::Settlement;
pub use response::Stage;
pub use response::reason_phrase;

pub mod transform;
pub use transform::Parts;
pub use transform::Transform;
pub use transform::TransformChain;
