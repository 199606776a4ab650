use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use rivet::{
    App, ContextHook, Error, ErrorKind, Formatter, HttpError, Method, Parser, Request, RequestContext, Resource,
    Response, UrlValues, context,
};
use serde_json::{Value, json};

fn echo(name: &str) -> Resource {
    Resource::new(name)
        .read(|vars: UrlValues| async move {
            let vars: BTreeMap<String, String> = vars.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
            Ok::<_, Error>(json!({ "vars": vars }))
        })
        .write(|_: UrlValues, input: Value| async move { Ok::<_, Error>(input) })
}

#[tokio::test]
async fn unknown_paths_are_404() -> anyhow::Result<()> {
    let app = App::new();
    let res = app.handle(Request::get("/nowhere")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert!(res.json_body()?["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn url_variables_reach_the_model() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/users/{user}/posts/{post}")?;
    let res = app.handle(Request::get("/users/ann/posts/7")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.json_body()?, json!({"vars": {"user": "ann", "post": "7"}}));
    Ok(())
}

#[tokio::test]
async fn url_variables_are_percent_decoded() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/users/{name}")?;
    let res = app.handle(Request::get("/users/j%C3%BCrgen%20s")).await;
    assert_eq!(res.json_body()?, json!({"vars": {"name": "jürgen s"}}));

    let res = app.handle(Request::get("/users/%C3%28")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn unsupported_methods_are_405_with_allow() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;

    let res = app.handle(Request::delete("/echo")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD, PUT"));

    // POST is for collections only
    let res = app.handle(Request::post("/echo").with_json(&json!({}))).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn declared_methods_limit_a_route() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route_with(echo("echo"), "/echo", &[Method::Get])?;
    let res = app.handle(Request::put("/echo").with_json(&json!({"a": 1}))).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD"));
    Ok(())
}

#[tokio::test]
async fn put_round_trips_json() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;
    let res = app
        .handle(Request::put("/echo").with_header("content-type", "application/json; charset=utf-8").with_body(r#"{"a":[1,2]}"#))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.json_body()?, json!({"a": [1, 2]}));

    let res = app.handle(Request::put("/echo").with_body("{broken")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn missing_read_function_reads_empty_object() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(Resource::new("blank"), "/blank")?;
    let res = app.handle(Request::get("/blank")).await;
    assert_eq!(res.json_body()?, json!({}));
    Ok(())
}

#[tokio::test]
async fn unacceptable_formats_are_406() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;

    let res = app.handle(Request::get("/echo").with_header("accept", "text/html")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_ACCEPTABLE);

    let res = app.handle(Request::get("/echo").with_header("accept", "text/html, application/*;q=0.5")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn resource_formatters_win_over_the_app() -> anyhow::Result<()> {
    let mut text = Formatter::new();
    text.register("text/plain", |v: &Value| Ok(Bytes::from(v.to_string())), true)?;

    let mut app = App::new();
    app.route(
        Resource::new("greeting")
            .read(|_: UrlValues| async { Ok::<_, Error>(json!("hi")) })
            .formatter(text),
        "/greeting",
    )?;

    let res = app.handle(Request::get("/greeting")).await;
    assert_eq!(res.header("content-type"), Some("text/plain"));
    assert_eq!(res.body(), &Bytes::from("\"hi\""));

    let res = app.handle(Request::get("/greeting").with_header("accept", "application/json")).await;
    assert_eq!(res.header("content-type"), Some("application/json"));
    Ok(())
}

#[tokio::test]
async fn unsupported_media_types_are_415() -> anyhow::Result<()> {
    let mut app = App::bare();
    app.parser_mut().register("application/json", rivet::json::deserialize, false)?;
    app.formatter_mut().register("application/json", |v: &Value| rivet::json::serialize(v, None), true)?;
    app.error_handler_mut().register(ErrorKind::Any, |e| rivet::json::error_response(e, None));
    app.route(echo("echo"), "/echo")?;

    let res = app.handle(Request::put("/echo").with_header("content-type", "text/plain").with_body("hello")).await;
    assert_eq!(res.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let res = app.handle(Request::put("/echo").with_header("content-type", "application/json").with_body("{}")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn resource_parsers_are_tried_first() -> anyhow::Result<()> {
    let mut lines = Parser::new();
    lines.register(
        "text/plain",
        |body: &[u8], _: &BTreeMap<String, String>| Ok(json!(String::from_utf8_lossy(body).lines().collect::<Vec<_>>())),
        false,
    )?;

    let mut app = App::new();
    app.route(echo("echo").parser(lines), "/echo")?;
    let res = app.handle(Request::put("/echo").with_header("content-type", "text/plain").with_body("a\nb")).await;
    assert_eq!(res.json_body()?, json!(["a", "b"]));
    Ok(())
}

#[tokio::test]
async fn error_handlers_cascade() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(
        Resource::new("teapot")
            .read(|_: UrlValues| async { Err::<Value, _>(Error::Lookup("no tea".to_owned())) })
            .delete(|_: UrlValues| async { Err::<Value, _>(Error::bad_request("spilled")) })
            .error_handler(ErrorKind::Lookup, |_| {
                Ok(Response::builder().status(StatusCode::IM_A_TEAPOT).text("short and stout"))
            }),
        "/teapot",
    )?;
    app.route(
        Resource::new("broken").read(|_: UrlValues| async { Err::<Value, Error>(anyhow::anyhow!("disk on fire").into()) }),
        "/broken",
    )?;

    let res = app.handle(Request::get("/teapot")).await;
    assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);

    let res = app.handle(Request::delete("/teapot")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(res.json_body()?, json!({"message": "spilled"}));

    let res = app.handle(Request::get("/broken")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.json_body()?, json!({"message": "internal error"}));
    Ok(())
}

#[tokio::test]
async fn bare_apps_answer_unhandled_errors_with_empty_500() -> anyhow::Result<()> {
    let app = App::bare();
    let res = app.handle(Request::get("/")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(res.body().is_empty());
    Ok(())
}

#[tokio::test]
async fn model_replies_set_status_and_headers() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(
        Resource::new("accepted").write(|_: UrlValues, _: Value| async {
            Ok::<_, Error>(
                rivet::Reply::data(json!({"queued": true}))
                    .with_status(StatusCode::ACCEPTED)
                    .with_header("x-queue", "default"),
            )
        }),
        "/jobs",
    )?;
    let res = app.handle(Request::put("/jobs").with_json(&json!({}))).await;
    assert_eq!(res.status_code(), StatusCode::ACCEPTED);
    assert_eq!(res.header("x-queue"), Some("default"));
    Ok(())
}

// ── Hooks and context ─────────────────────────────────────────────────────────

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_enter: bool,
}

#[async_trait]
impl ContextHook for Recorder {
    async fn enter(&self, ctx: &RequestContext) -> rivet::Result<()> {
        self.log.lock().unwrap().push(format!("enter {} {}", self.name, ctx.resource().name()));
        if self.fail_enter {
            return Err(HttpError::new(StatusCode::SERVICE_UNAVAILABLE, "closed").into());
        }
        Ok(())
    }

    async fn exit(&self, _ctx: &RequestContext) -> rivet::Result<()> {
        self.log.lock().unwrap().push(format!("exit {}", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn hooks_nest_and_cleanup_always_runs() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;
    app.context(Recorder { name: "outer", log: Arc::clone(&log), fail_enter: false })
        .context(Recorder { name: "inner", log: Arc::clone(&log), fail_enter: false });
    let cleanup_log = Arc::clone(&log);
    app.cleanup_hook(move || {
        cleanup_log.lock().unwrap().push("cleanup".to_owned());
        Ok(())
    });

    app.handle(Request::get("/echo")).await;
    assert_eq!(
        *log.lock().unwrap(),
        ["enter outer echo", "enter inner echo", "exit inner", "exit outer", "cleanup"]
    );

    log.lock().unwrap().clear();
    app.handle(Request::get("/missing")).await;
    assert_eq!(*log.lock().unwrap(), ["cleanup"]);
    Ok(())
}

#[tokio::test]
async fn failed_enter_skips_the_model_and_later_hooks() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;
    app.context(Recorder { name: "outer", log: Arc::clone(&log), fail_enter: false })
        .context(Recorder { name: "gate", log: Arc::clone(&log), fail_enter: true })
        .context(Recorder { name: "never", log: Arc::clone(&log), fail_enter: false });

    let res = app.handle(Request::get("/echo")).await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(*log.lock().unwrap(), ["enter outer echo", "enter gate echo", "exit outer"]);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_see_their_own_context() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(
        Resource::new("slow").read(|vars: UrlValues| async move {
            let before = context::current().map(|c| c.request().path().to_owned());
            let delay: u64 = vars.parse("ms")?;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let after = context::current().map(|c| c.request().path().to_owned());
            Ok::<_, Error>(json!({ "before": before, "after": after }))
        }),
        "/slow/{ms}",
    )?;
    let app = Arc::new(app);

    let handles: Vec<_> = [40, 10, 25, 0, 30]
        .into_iter()
        .map(|ms| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { (ms, app.handle(Request::get(&format!("/slow/{ms}"))).await) })
        })
        .collect();

    for handle in handles {
        let (ms, res) = handle.await?;
        let path = format!("/slow/{ms}");
        assert_eq!(res.json_body()?, json!({"before": path, "after": path}));
    }
    assert!(context::current().is_none());
    Ok(())
}

#[tokio::test]
async fn pre_processor_sees_parsed_input() -> anyhow::Result<()> {
    let mut app = App::new();
    app.route(echo("echo"), "/echo")?;
    app.pre_processor().push(|mut v: Value| {
        v["stamped"] = json!(true);
        Ok(v)
    });
    let res = app.handle(Request::put("/echo").with_json(&json!({"a": 1}))).await;
    assert_eq!(res.json_body()?, json!({"a": 1, "stamped": true}));
    Ok(())
}
