use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indoc::indoc;
use mockall::mock;
use mockall::predicate::eq;
use sans_http::event::{DiagnosticKind, Diagnostics};
use sans_http::protocol::{BoxError, CookieOptions, Parts, QueryValue, RequestInput, ResponseError, SharedError, Transform};
use sans_server::hook::{Handler, HookResult, Middleware, Order, Phase, error_handler_sync, handler_fn, handler_sync};
use sans_server::{RequestContext, RequestFailure, Server, ServerBuilder, ServerConfig};
use serde_json::json;

mock! {
    Diag {}

    impl Diagnostics for Diag {
        fn emit(&self, kind: DiagnosticKind, message: &str);
    }
}

type Trail = Arc<Mutex<String>>;

struct Mark {
    trail: Trail,
    mark: &'static str,
    send: bool,
}

#[async_trait]
impl Middleware for Mark {
    async fn call(&self, ctx: &mut RequestContext) -> HookResult {
        self.trail.lock().unwrap().push_str(self.mark);
        if self.send {
            ctx.response_mut().send_body(self.trail.lock().unwrap().clone())?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.mark
    }
}

fn mark(trail: &Trail, mark: &'static str) -> Mark {
    Mark { trail: Arc::clone(trail), mark, send: false }
}

fn quiet() -> ServerBuilder {
    let config = ServerConfig { logs: sans_server::LogConfig { silent: true, ..Default::default() }, ..Default::default() };
    Server::builder().config(config)
}

fn strict() -> ServerBuilder {
    let config = ServerConfig {
        rejectable: true,
        logs: sans_server::LogConfig { silent: true, ..Default::default() },
        ..Default::default()
    };
    Server::builder().config(config)
}

#[tokio::test]
async fn middleware_runs_in_registration_order() {
    let trail = Trail::default();
    let server = quiet()
        .middleware(mark(&trail, "a"))
        .middleware(Mark { trail: Arc::clone(&trail), mark: "b", send: true })
        .middleware(mark(&trail, "c"))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.body, "ab");
    assert_eq!(*trail.lock().unwrap(), "ab");
}

#[tokio::test]
async fn response_hooks_run_in_reverse() {
    let trail = Trail::default();
    let server = quiet()
        .hook(Phase::REQUEST, 0, Handler::normal(mark(&trail, "a")))
        .hook(Phase::REQUEST, 0, Handler::normal(mark(&trail, "b")))
        .hook(Phase::RESPONSE, 0, Handler::normal(mark(&trail, "a")))
        .hook(Phase::RESPONSE, 0, Handler::normal(mark(&trail, "b")))
        .build()
        .unwrap();

    server.request("/").await.unwrap();
    assert_eq!(*trail.lock().unwrap(), "abba");
}

#[tokio::test]
async fn weights_order_hooks() {
    let trail = Trail::default();
    let server = quiet()
        .hook(Phase::REQUEST, 10, Handler::normal(mark(&trail, "late")))
        .hook(Phase::REQUEST, -10, Handler::normal(mark(&trail, "early")))
        .middleware(mark(&trail, "-"))
        .build()
        .unwrap();

    server.request("/").await.unwrap();
    assert_eq!(*trail.lock().unwrap(), "early-late");
}

#[tokio::test]
async fn unanswered_requests_get_404() {
    let server = quiet().build().unwrap();
    let settlement = server.request("/missing").await.unwrap();

    assert_eq!(settlement.status_code, 404);
    assert_eq!(settlement.body, "Not Found");
    assert_eq!(settlement.header("content-type"), Some("text/plain"));
}

#[tokio::test]
async fn partially_built_responses_are_flushed() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().status(201).set_body("created");
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 201);
    assert_eq!(settlement.body, "created");
    assert_eq!(settlement.header("content-type"), Some("text/html"));
}

#[tokio::test]
async fn unsupported_method_gets_405() {
    let config = ServerConfig {
        supported_methods: vec!["GET".into(), "POST".into()],
        logs: sans_server::LogConfig { silent: true, ..Default::default() },
        ..Default::default()
    };
    let server = Server::builder().config(config).build().unwrap();

    let settlement = server.request(RequestInput::new("/").method("put")).await.unwrap();
    assert_eq!(settlement.status_code, 405);
    assert_eq!(settlement.header("allow"), Some("GET, POST"));

    let settlement = server.request(RequestInput::new("/").method("teapot")).await.unwrap();
    assert_eq!(settlement.status_code, 405);
}

#[tokio::test]
async fn method_check_can_be_disabled() {
    let config = ServerConfig {
        supported_methods: vec!["GET".into()],
        method_check: false,
        logs: sans_server::LogConfig { silent: true, ..Default::default() },
        ..Default::default()
    };
    let server = Server::builder().config(config).build().unwrap();

    let settlement = server.request(RequestInput::new("/").method("put")).await.unwrap();
    assert_eq!(settlement.status_code, 404);
}

#[tokio::test]
async fn objects_are_sent_as_json() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_body(json!({"a": 1}))?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.body, r#"{"a":1}"#);
    assert_eq!(settlement.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn send_status_uses_reason_phrase() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_status(404)?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 404);
    assert_eq!(settlement.body, "Not Found");
}

#[tokio::test]
async fn query_and_path_are_normalized() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            let request = ctx.request();
            assert_eq!(request.path(), "/foo");
            assert_eq!(request.query().get("abc"), Some(QueryValue::Present));
            assert_eq!(request.query().get("def"), Some(QueryValue::Single("bar")));
            ctx.response_mut().send_status(204)?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/foo/?abc&def=bar").await.unwrap();
    assert_eq!(settlement.status_code, 204);
}

#[tokio::test]
async fn second_send_is_reported_and_ignored() {
    let mut diagnostics = MockDiag::new();
    diagnostics.expect_emit().with(eq(DiagnosticKind::AlreadySent), mockall::predicate::always()).times(1).return_const(());

    let server = quiet()
        .diagnostics(diagnostics)
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_with_status(200, "first")?;
            let second = ctx.response_mut().send_with_status(500, "second");
            assert_eq!(second, Err(ResponseError::AlreadySent));
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 200);
    assert_eq!(settlement.body, "first");
}

#[tokio::test]
async fn errors_after_send_keep_the_sent_response() {
    let mut diagnostics = MockDiag::new();
    diagnostics
        .expect_emit()
        .withf(|kind, message| *kind == DiagnosticKind::ErrorAfterSend && message.contains("after send"))
        .times(1)
        .return_const(());

    let server = strict()
        .diagnostics(diagnostics)
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_with_status(201, "created")?;
            Err(BoxError::from("after send"))
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 201);
    assert_eq!(settlement.body, "created");
    assert!(settlement.error.is_none());
}

#[tokio::test]
async fn errors_after_send_and_await_keep_the_sent_response() {
    let server = strict()
        .middleware(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().send_with_status(201, "created")?;
                tokio::task::yield_now().await;
                HookResult::Err(BoxError::from("after send"))
            })
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 201);
    assert_eq!(settlement.body, "created");
    assert!(settlement.error.is_none());
}

#[tokio::test]
async fn error_handlers_recover() {
    let trail = Trail::default();
    let recovered = Arc::clone(&trail);
    let server = quiet()
        .middleware(handler_sync(|_| Err(BoxError::from("broken"))))
        .middleware(mark(&trail, "skipped"))
        .error_middleware(error_handler_sync(move |error, ctx| {
            recovered.lock().unwrap().push_str("recovered");
            ctx.response_mut().send_with_status(503, format!("sorry: {error}"))?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(*trail.lock().unwrap(), "recovered");
    assert_eq!(settlement.status_code, 503);
    assert_eq!(settlement.body, "sorry: broken");
    assert!(settlement.error.is_none());
}

#[tokio::test]
async fn unhandled_errors_become_500() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().set_header("x-partial", "yes").set_cookie("session", "abc", CookieOptions::default());
            Err(BoxError::from("database unavailable"))
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 500);
    assert_eq!(settlement.body, "Internal Server Error");
    assert_eq!(settlement.header("x-partial"), None);
    assert!(settlement.cookies.is_empty());
    assert_eq!(settlement.error.map(|e| e.to_string()).as_deref(), Some("database unavailable"));
}

#[tokio::test]
async fn rejectable_servers_reject() {
    let server = strict().middleware(handler_sync(|_| Err(BoxError::from("boom")))).build().unwrap();

    match server.request("/").await {
        Err(RequestFailure::Unhandled { source, settlement }) => {
            assert_eq!(source.to_string(), "boom");
            assert_eq!(settlement.status_code, 500);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn panics_become_500() {
    let server = quiet().middleware(handler_sync(|_| panic!("handler exploded"))).build().unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 500);
    assert_eq!(settlement.error.map(|e| e.to_string()).as_deref(), Some("handler panicked: handler exploded"));
}

#[tokio::test]
async fn response_phase_errors_become_500() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_body("fine")?;
            Ok(())
        }))
        .hook(Phase::RESPONSE, 0, Handler::normal(handler_sync(|_| Err(BoxError::from("late failure")))))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 500);
}

#[tokio::test]
async fn response_hooks_may_adjust_the_sent_response() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_body("hello")?;
            Ok(())
        }))
        .hook(
            Phase::RESPONSE,
            0,
            Handler::normal(handler_sync(|ctx| {
                ctx.response_mut().set_header("x-powered-by", "sans").set_cookie("seen", "1", CookieOptions::default().path("/"));
                Ok(())
            })),
        )
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(
        settlement.raw_headers,
        indoc! {"
            X-Powered-By: sans
            Content-Type: text/html
            Set-Cookie: seen=1; Path=/"}
    );
}

#[tokio::test]
async fn late_mutation_of_a_sent_response_is_ignored() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_with_status(202, "accepted")?;
            ctx.response_mut().status(500).set_body("changed");
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 202);
    assert_eq!(settlement.body, "accepted");
}

#[tokio::test(start_paused = true)]
async fn silent_handlers_time_out() {
    let config = ServerConfig {
        timeout: 2.0,
        logs: sans_server::LogConfig { silent: true, ..Default::default() },
        ..Default::default()
    };
    let server = Server::builder()
        .config(config)
        .middleware(handler_fn(|_| Box::pin(std::future::pending::<HookResult>())))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let settlement = server.request("/").await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(settlement.status_code, 408);
    assert_eq!(settlement.body, "Request Timeout");
}

#[tokio::test(start_paused = true)]
async fn sending_disarms_the_timer() {
    let config = ServerConfig {
        timeout: 1.0,
        logs: sans_server::LogConfig { silent: true, ..Default::default() },
        ..Default::default()
    };
    let server = Server::builder()
        .config(config)
        .middleware(handler_fn(|ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                ctx.response_mut().send_body("in time")?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                HookResult::Ok(())
            })
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 200);
    assert_eq!(settlement.body, "in time");
}

#[tokio::test]
async fn malformed_json_gets_400() {
    let server = quiet()
        .middleware(handler_sync(|ctx| {
            let body = ctx.request().body().as_json().cloned();
            ctx.response_mut().send_body(body.unwrap_or_default())?;
            Ok(())
        }))
        .build()
        .unwrap();

    let input = RequestInput::new("/").method("POST").header("content-type", "application/json");
    let settlement = server.request(input.clone().body("{not json")).await.unwrap();
    assert_eq!(settlement.status_code, 400);

    let settlement = server.request(input.body(r#"{"ok":true}"#)).await.unwrap();
    assert_eq!(settlement.status_code, 200);
    assert_eq!(settlement.body, r#"{"ok":true}"#);
}

#[tokio::test]
async fn one_time_response_hooks() {
    let trail = Trail::default();
    let cleanup = mark(&trail, "cleanup");
    let cleanup = Handler::normal(cleanup);
    let server = quiet()
        .middleware(handler_sync(move |ctx| {
            ctx.hook_once(Phase::RESPONSE, 0, cleanup.clone())?;
            ctx.response_mut().send_status(204)?;
            Ok(())
        }))
        .build()
        .unwrap();

    server.request("/").await.unwrap();
    server.request("/").await.unwrap();
    assert_eq!(*trail.lock().unwrap(), "cleanupcleanup");
}

#[tokio::test]
async fn one_time_hooks_behind_the_cursor_still_run() {
    let early = Handler::normal(
        handler_sync(|ctx| {
            ctx.response_mut().send_body("early")?;
            Ok(())
        })
        .with_name("early"),
    );
    let server = quiet()
        .middleware(handler_sync(move |ctx| {
            ctx.hook_once(Phase::REQUEST, -5, early.clone())?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 200);
    assert_eq!(settlement.body, "early");
}

#[tokio::test]
async fn custom_phases_run_on_demand() {
    let trail = Trail::default();
    let server = quiet()
        .define_phase("audit", Order::Ascending, |builder, audit| {
            builder.hook(audit, 1, Handler::normal(mark(&trail, "2"))).hook(audit, 0, Handler::normal(mark(&trail, "1")))
        })
        .middleware(handler_fn(|ctx| {
            Box::pin(async move {
                let audit = ctx.phase("audit").ok_or("audit phase missing")?;
                ctx.run_phase(audit).await?;
                ctx.response_mut().send_status(204)?;
                HookResult::Ok(())
            })
        }))
        .build()
        .unwrap();

    assert!(server.phase("audit").is_some());
    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 204);
    assert_eq!(*trail.lock().unwrap(), "12");
}

struct Shout;

impl Transform for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn apply(&self, parts: &mut Parts) -> Result<(), BoxError> {
        if let Some(text) = parts.body.as_text() {
            parts.body = text.to_uppercase().into();
        }
        Ok(())
    }
}

#[tokio::test]
async fn send_hooks_run_after_the_builtin_ones() {
    let server = quiet()
        .send_hook(Shout)
        .middleware(handler_sync(|ctx| {
            ctx.response_mut().send_body(json!(["a"]))?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.body, r#"["A"]"#);
}

#[tokio::test]
async fn callbacks_see_the_settlement_once() {
    let server = quiet().build().unwrap();
    let calls = Arc::new(Mutex::new(vec![]));
    let sink = Arc::clone(&calls);

    let result = server
        .request_with("/nowhere", move |result| {
            sink.lock().unwrap().push(result.as_ref().map(|settlement| settlement.status_code).ok());
        })
        .await;

    assert_eq!(result.unwrap().status_code, 404);
    assert_eq!(*calls.lock().unwrap(), [Some(404)]);
}

#[tokio::test]
async fn loosely_typed_input() {
    let input: RequestInput = serde_json::from_value(json!({
        "method": "post",
        "path": "items",
        "query": { "tag": ["a", "b"], "all": true },
        "headers": { "X-Count": 3 },
        "body": { "name": "widget" }
    }))
    .unwrap();

    let server = quiet()
        .middleware(handler_sync(|ctx| {
            let request = ctx.request();
            assert_eq!(request.path(), "/items");
            assert_eq!(request.header("x-count"), Some("3"));
            assert_eq!(request.query().to_query_string(), "tag=a&tag=b&all");
            let echo = request.body().as_json().cloned().unwrap_or_default();
            ctx.response_mut().send_body(echo)?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settlement = server.request(input).await.unwrap();
    assert_eq!(settlement.body, r#"{"name":"widget"}"#);
}

#[tokio::test]
async fn error_propagates_past_failing_error_handlers() {
    let server = quiet()
        .middleware(handler_sync(|_| Err(BoxError::from("first"))))
        .error_middleware(error_handler_sync(|error: SharedError, _| Err(BoxError::from(format!("{error}, then second")))))
        .build()
        .unwrap();

    let settlement = server.request("/").await.unwrap();
    assert_eq!(settlement.status_code, 500);
    assert_eq!(settlement.error.map(|e| e.to_string()).as_deref(), Some("first, then second"));
}
