//! The application: route table, content defaults, hooks and dispatch.
//!
//! # Request pipeline
//!
//! ```text
//! App::handle(request)
//!   ├─ match the path                       no match → 404
//!   ├─ check the method against the route   not allowed → 405 + Allow
//!   ├─ bind the RequestContext (task-local)
//!   │    ├─ ContextHook::enter, in order
//!   │    ├─ PUT/POST: parse body, run the pre-processor pipe
//!   │    ├─ call the model function
//!   │    ├─ collections: Location / member urls
//!   │    ├─ format the reply per Accept
//!   │    └─ ContextHook::exit, in reverse
//!   │  errors: resource error handler → app error handler → empty 500
//!   ├─ cleanup hooks
//!   └─ HEAD: drop the body
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use http::StatusCode;
use serde_json::{Value, json};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::content::{ErrorHandler, Formatter, Parser};
use crate::context::{self, ContextHook, RequestContext};
use crate::datapipe::DataPipe;
use crate::error::{Error, HttpError, Result};
use crate::json;
use crate::method::Method;
use crate::model::{Reply, UrlValues};
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Response;
use crate::router::{Route, Router};
use crate::rule::Rule;
use crate::settings::Settings;

type CleanupFn = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Name of the resource serving the listing at `/`.
pub const AUTOLIST: &str = "rivet.autolist";

/// A REST application.
///
/// ```rust
/// use rivet::{App, Error, Request, Resource, UrlValues};
/// use serde_json::json;
///
/// # async fn demo() -> rivet::Result<()> {
/// let mut app = App::new();
/// app.route(
///     Resource::new("hello").read(|_: UrlValues| async { Ok::<_, Error>(json!({"hello": "world"})) }),
///     "/hello",
/// )?;
///
/// let res = app.handle(Request::get("/hello")).await;
/// assert_eq!(res.json_body()?, json!({"hello": "world"}));
/// # Ok(())
/// # }
/// ```
pub struct App {
    router: Router,
    registered: Vec<Arc<Resource>>,
    parser: Parser,
    formatter: Formatter,
    error_handler: ErrorHandler,
    hooks: Vec<Arc<dyn ContextHook>>,
    cleanup: Vec<CleanupFn>,
    pre_processor: DataPipe,
    catalog: Arc<RwLock<Vec<Value>>>,
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

impl App {
    /// An app that reads and writes `application/json` and reports errors
    /// as JSON.
    pub fn new() -> Self {
        Self::json(None)
    }

    /// A JSON app configured from `settings`: output indentation and the
    /// resource listing.
    pub fn with_settings(settings: &Settings) -> Result<Self> {
        let mut app = Self::json(settings.json_indent);
        if settings.autolist {
            app.autolist()?;
        }
        Ok(app)
    }

    /// An app without any parser, formatter or error handler.
    pub fn bare() -> Self {
        Self {
            router: Router::default(),
            registered: Vec::new(),
            parser: Parser::new(),
            formatter: Formatter::new(),
            error_handler: ErrorHandler::new(),
            hooks: Vec::new(),
            cleanup: Vec::new(),
            pre_processor: DataPipe::new(),
            catalog: Arc::default(),
        }
    }

    fn json(indent: Option<usize>) -> Self {
        let mut app = Self::bare();
        json::install(&mut app.parser, &mut app.formatter, &mut app.error_handler, indent);
        app
    }

    // ── Content ───────────────────────────────────────────────────────────────

    pub fn parser_mut(&mut self) -> &mut Parser { &mut self.parser }
    pub fn formatter_mut(&mut self) -> &mut Formatter { &mut self.formatter }
    pub fn error_handler_mut(&mut self) -> &mut ErrorHandler { &mut self.error_handler }

    /// Applied to parsed input before write and make functions receive it.
    pub fn pre_processor(&mut self) -> &mut DataPipe { &mut self.pre_processor }

    // ── Hooks ─────────────────────────────────────────────────────────────────

    /// Runs `hook` around every routed request.
    pub fn context(&mut self, hook: impl ContextHook) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs `f` after every request, whether it succeeded or not. Errors
    /// are logged and otherwise ignored.
    pub fn cleanup_hook<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.cleanup.push(Box::new(f));
        self
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Binds `resource` to `rule`, serving every method its model supports.
    ///
    /// Returns the shared resource so it can be bound to more rules.
    pub fn route(&mut self, resource: impl Into<Arc<Resource>>, rule: &str) -> Result<Arc<Resource>> {
        self.bind(resource.into(), rule, None)
    }

    /// Like [`route`](Self::route), serving only `methods`. Declared methods
    /// the model can't serve are logged and left out.
    pub fn route_with(
        &mut self,
        resource: impl Into<Arc<Resource>>,
        rule: &str,
        methods: &[Method],
    ) -> Result<Arc<Resource>> {
        self.bind(resource.into(), rule, Some(methods))
    }

    fn bind(&mut self, resource: Arc<Resource>, rule: &str, declared: Option<&[Method]>) -> Result<Arc<Resource>> {
        if let Some(other) = self.find(resource.name()) {
            if !Arc::ptr_eq(other, &resource) {
                return Err(Error::Route {
                    rule: rule.to_owned(),
                    reason: format!("another resource is already named `{}`", resource.name()),
                });
            }
        }

        let rule = Rule::parse(rule)?;
        let supported = resource.supported_methods();
        let methods = match declared {
            None => supported,
            Some(declared) => {
                for m in declared.iter().filter(|m| !supported.contains(m)) {
                    warn!(
                        resource = resource.name(),
                        rule = rule.as_str(),
                        method = m.as_str(),
                        "declared method is not supported by the resource's model"
                    );
                }
                supported.into_iter().filter(|m| declared.contains(m)).collect()
            }
        };

        let route = self.router.insert(rule, Arc::clone(&resource), methods)?;
        debug!(rule = route.rule.as_str(), resource = resource.name(), "route added");
        let entry = describe(route);
        self.catalog.write().unwrap_or_else(PoisonError::into_inner).push(entry);
        Ok(resource)
    }

    /// Keeps track of a resource without routing it.
    pub fn register(&mut self, resource: impl Into<Arc<Resource>>) -> Arc<Resource> {
        let resource = resource.into();
        if !self.registered.iter().any(|r| Arc::ptr_eq(r, &resource)) {
            self.registered.push(Arc::clone(&resource));
        }
        resource
    }

    fn find(&self, name: &str) -> Option<&Arc<Resource>> {
        self.router
            .routes()
            .map(|r| &r.resource)
            .chain(&self.registered)
            .find(|r| r.name() == name)
    }

    /// Every routed resource, once, in the order first routed.
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        let mut seen: Vec<Arc<Resource>> = Vec::new();
        for route in self.router.routes() {
            if !seen.iter().any(|r| Arc::ptr_eq(r, &route.resource)) {
                seen.push(Arc::clone(&route.resource));
            }
        }
        seen
    }

    /// Registered resources that have no route.
    pub fn unrouted_resources(&self) -> Vec<Arc<Resource>> {
        self.registered
            .iter()
            .filter(|r| self.router.rules_for(r.name()).next().is_none())
            .cloned()
            .collect()
    }

    /// The URL of the resource named `name`, from the first of its rules
    /// that `values` can fill.
    pub fn url_for(&self, name: &str, values: &UrlValues) -> Option<String> {
        self.router.rules_for(name).find_map(|rule| rule.build(values))
    }

    /// A descriptor per route: its methods, its URL (or `null` and the
    /// `url_rule` when the rule has variables) and whether it's a collection.
    pub fn iter_resources(&self) -> Vec<Value> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Serves [`iter_resources`](Self::iter_resources) at `/`.
    pub fn autolist(&mut self) -> Result<Arc<Resource>> {
        let catalog = Arc::clone(&self.catalog);
        let lister = Resource::new(AUTOLIST).read(move |_: UrlValues| {
            let listing = catalog.read().unwrap_or_else(PoisonError::into_inner).clone();
            async move { Ok::<_, Error>(Value::Array(listing)) }
        });
        self.route(lister, "/")
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Maps one request to one response. Never fails: errors are rendered
    /// by the error handlers.
    pub async fn handle(&self, request: Request) -> Response {
        self.answer(request, None).await
    }

    /// Answers `request` with `err` without dispatching it. The response
    /// still goes through the app's error handler and cleanup hooks.
    pub(crate) async fn reject(&self, request: Request, err: Error) -> Response {
        self.answer(request, Some(err)).await
    }

    async fn answer(&self, request: Request, rejected: Option<Error>) -> Response {
        let span = info_span!("request", method = %request.method(), path = %request.path());
        async move {
            let head = *request.method() == http::Method::HEAD;
            let response = match rejected {
                Some(err) => self.fail(err, None),
                None => self.dispatch(request).await,
            };
            for f in &self.cleanup {
                if let Err(e) = f() {
                    warn!(error = %e, "cleanup hook failed");
                }
            }
            if head { response.without_body() } else { response }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, request: Request) -> Response {
        let Some((route, url_values)) = self.router.lookup(request.path()) else {
            debug!("no route matches");
            return self.fail(Error::not_found(), None);
        };
        let method = match Method::try_from(request.method()) {
            Ok(m) if route.allows(m) => m,
            _ => {
                let err = HttpError::method_not_allowed(route.allowed()).into();
                return self.fail(err, Some(&route.resource));
            }
        };
        debug!(resource = route.resource.name(), "dispatching");

        let ctx = Arc::new(RequestContext::new(request, Arc::clone(&route.resource), url_values));
        context::scope(Arc::clone(&ctx), async {
            match self.run(&ctx, method).await {
                Ok(res) => res,
                Err(e) => self.fail(e, Some(ctx.resource())),
            }
        })
        .await
    }

    async fn run(&self, ctx: &RequestContext, method: Method) -> Result<Response> {
        let mut entered = 0;
        let mut result = Ok(());
        for hook in &self.hooks {
            if let Err(e) = hook.enter(ctx).await {
                result = Err(e);
                break;
            }
            entered += 1;
        }

        let mut result = match result {
            Ok(()) => self.respond(ctx, method).await,
            Err(e) => Err(e),
        };

        for hook in self.hooks[..entered].iter().rev() {
            if let Err(e) = hook.exit(ctx).await {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    warn!(error = %e, "context hook exit failed");
                }
            }
        }
        result
    }

    async fn respond(&self, ctx: &RequestContext, method: Method) -> Result<Response> {
        let resource = ctx.resource();
        let input = if method.has_input() {
            let data = Parser::resolve(&[&resource.parser, &self.parser], ctx.request())?;
            Some(self.pre_processor.run(data)?)
        } else {
            None
        };

        let mut reply = resource.call(method, ctx.url_values().clone(), input).await?;
        resource.link_members(method, ctx.url_values(), &mut reply, |name, values| self.url_for(name, values));

        match reply {
            Reply::Raw(res) => Ok(res),
            Reply::Data { value, status, headers } => {
                let formatter = Formatter::compose([&resource.formatter, &self.formatter]);
                let (mime, body) = formatter.format(ctx.request().header("accept"), &value)?;
                Ok(Response::builder()
                    .status(status.unwrap_or(StatusCode::OK))
                    .headers(headers)
                    .bytes(&mime, body))
            }
        }
    }

    /// Resource error handler first, then the app's. If neither produces a
    /// response the client gets an empty 500.
    pub(crate) fn fail(&self, err: Error, resource: Option<&Arc<Resource>>) -> Response {
        let handled = match resource {
            Some(r) => r.handle_error(err),
            None => Err(err),
        };
        handled
            .or_else(|e| self.error_handler.handle(e))
            .unwrap_or_else(|e| {
                error!(error = %e, "error handler failed");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            })
    }
}

fn describe(route: &Route) -> Value {
    let mut entry = json!({
        "methods": route.allowed().collect::<Vec<_>>(),
        "is_strict_collection": route.resource.is_collection(),
    });
    if route.rule.has_variables() {
        entry["url"] = Value::Null;
        entry["url_rule"] = Value::String(route.rule.display_template());
    } else {
        entry["url"] = Value::String(route.rule.as_str().to_owned());
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Resource {
        Resource::new("echo")
            .read(|_: UrlValues| async { Ok::<_, Error>(json!({"ok": true})) })
            .write(|_: UrlValues, v: Value| async move { Ok::<_, Error>(v) })
    }

    #[tokio::test]
    async fn head_drops_body() {
        let mut app = App::new();
        app.route(echo(), "/echo").unwrap();
        let res = app.handle(Request::head("/echo")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.body().is_empty());
        assert_eq!(res.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn rejected_requests_still_run_cleanup() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut app = App::new();
        app.route(echo(), "/echo").unwrap();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cleaned);
        app.cleanup_hook(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let res = app.reject(Request::put("/echo"), HttpError::payload_too_large().into()).await;
        assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(res.json_body().unwrap()["message"].is_string());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn declared_methods_are_intersected() {
        let mut app = App::new();
        app.route_with(echo(), "/echo", &[Method::Get, Method::Delete]).unwrap();
        let (route, _) = app.router.lookup("/echo").unwrap();
        assert_eq!(route.methods, vec![Method::Get]);
    }

    #[test]
    fn names_must_be_unique() {
        let mut app = App::new();
        let shared = app.route(echo(), "/a").unwrap();
        app.route(shared, "/b").unwrap();
        assert!(matches!(app.route(echo(), "/c"), Err(Error::Route { .. })));
        assert_eq!(app.resources().len(), 1);
    }

    #[test]
    fn descriptors_show_rules_with_variables() {
        let mut app = App::new();
        app.route(echo(), "/echo/{id}").unwrap();
        assert_eq!(
            app.iter_resources(),
            vec![json!({
                "methods": ["GET", "HEAD", "PUT"],
                "url": null,
                "url_rule": "/echo/:id",
                "is_strict_collection": false,
            })]
        );
    }

    #[test]
    fn unrouted_resources_are_tracked() {
        let mut app = App::new();
        app.register(Resource::new("lonely"));
        let routed = app.register(echo());
        app.route(routed, "/echo").unwrap();
        let names: Vec<_> = app.unrouted_resources().iter().map(|r| r.name().to_owned()).collect();
        assert_eq!(names, vec!["lonely"]);
    }
}
