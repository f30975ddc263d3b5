//! Hooks every server registers ahead of user middleware.

use async_trait::async_trait;
use http::Method;
use http::header::CONTENT_TYPE;
use mime::Mime;
use sans_http::event::Category;
use sans_http::protocol::Body;

use crate::RequestContext;
use crate::hook::{HookResult, Middleware};

pub(crate) const METHOD_CHECK_WEIGHT: i32 = -1_000_000;
pub(crate) const JSON_BODY_WEIGHT: i32 = -999_999;

/// Answers 405 for methods the server does not support.
#[derive(Debug)]
pub(crate) struct MethodCheck {
    allowed: Vec<Method>,
}

impl MethodCheck {
    pub(crate) fn new(allowed: Vec<Method>) -> Self {
        Self { allowed }
    }

    fn allow_header(&self) -> String {
        self.allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
    }
}

#[async_trait]
impl Middleware for MethodCheck {
    async fn call(&self, ctx: &mut RequestContext) -> HookResult {
        let request = ctx.request();
        let rejected = match request.unmatched_method() {
            Some(raw) => Some(raw.to_owned()),
            None if !self.allowed.contains(request.method()) => Some(request.method().to_string()),
            None => None,
        };

        if let Some(method) = rejected {
            ctx.events().warn(Category::Request, format!("method {method} is not allowed"));
            ctx.response_mut().set_header("allow", &self.allow_header()).send_status(405)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "method-check"
    }
}

/// Parses text bodies of JSON requests, answering 400 when they are malformed.
#[derive(Debug)]
pub(crate) struct JsonBodyParser;

fn is_json(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .is_ok_and(|parsed| parsed.subtype() == mime::JSON || parsed.suffix() == Some(mime::JSON))
}

#[async_trait]
impl Middleware for JsonBodyParser {
    async fn call(&self, ctx: &mut RequestContext) -> HookResult {
        if !ctx.request().header(CONTENT_TYPE.as_str()).is_some_and(is_json) {
            return Ok(());
        }

        match ctx.request().body().parse_json() {
            Ok(Some(value)) => ctx.request_mut().set_body(Body::Json(value)),
            Ok(None) => {}
            Err(e) => {
                ctx.events().warn(Category::Request, format!("rejecting body: {e}"));
                ctx.response_mut().send_status(400)?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "json-body"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookRegistry;
    use sans_http::protocol::{Request, RequestInput};
    use serde_json::json;
    use std::sync::Arc;

    fn context(input: RequestInput) -> RequestContext {
        RequestContext::new(Request::new(input), Arc::new(HookRegistry::new()))
    }

    #[test]
    fn json_content_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/problem+json"));
        assert!(!is_json("text/plain"));
        assert!(!is_json("not a mime"));
    }

    #[tokio::test]
    async fn unsupported_method_gets_405() {
        let check = MethodCheck::new(vec![Method::GET, Method::HEAD]);
        let mut ctx = context(RequestInput::new("/").method("delete"));
        check.call(&mut ctx).await.unwrap();

        let state = ctx.response().state();
        assert!(state.sent);
        assert_eq!(state.status_code, 405);
        assert_eq!(ctx.response().header("allow"), Some("GET, HEAD"));
    }

    #[tokio::test]
    async fn unknown_method_gets_405() {
        let check = MethodCheck::new(vec![Method::GET]);
        let mut ctx = context(RequestInput::new("/").method("BREW"));
        check.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().status_code(), 405);
    }

    #[tokio::test]
    async fn supported_method_passes() {
        let check = MethodCheck::new(vec![Method::GET]);
        let mut ctx = context(RequestInput::new("/"));
        check.call(&mut ctx).await.unwrap();
        assert!(!ctx.response().is_sent());
    }

    #[tokio::test]
    async fn json_body_is_parsed() {
        let input = RequestInput::new("/").method("post").header("Content-Type", "application/json").body(r#"{"a":1}"#);
        let mut ctx = context(input);
        JsonBodyParser.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.request().body().as_json(), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn malformed_json_gets_400() {
        let input = RequestInput::new("/").method("post").header("content-type", "application/json").body("{oops");
        let mut ctx = context(input);
        JsonBodyParser.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().status_code(), 400);
        assert_eq!(ctx.response().body().as_text(), Some("Bad Request"));
    }

    #[tokio::test]
    async fn other_bodies_are_left_alone() {
        let input = RequestInput::new("/").method("post").header("content-type", "text/plain").body("{oops");
        let mut ctx = context(input);
        JsonBodyParser.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.request().body().as_text(), Some("{oops"));
        assert!(!ctx.response().is_sent());
    }
}
