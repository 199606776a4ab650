//! Request context.
//!
//! While a request is dispatched, its [`RequestContext`] is bound in
//! task-local storage. Anything running inside the request's task (model
//! functions, pipe stages, hooks) can reach it through [`current`] without
//! threading it through every signature. Concurrent requests run in separate
//! tasks and never see each other's context.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use http::Extensions;

use crate::error::Result;
use crate::model::UrlValues;
use crate::request::Request;
use crate::resource::Resource;

tokio::task_local! {
    static CONTEXT: Arc<RequestContext>;
}

/// Per-request state: the request, the resource it was routed to, the URL
/// variables and any values hooks attach along the way.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    resource: Arc<Resource>,
    url_values: UrlValues,
    extensions: Mutex<Extensions>,
}

impl RequestContext {
    pub(crate) fn new(request: Request, resource: Arc<Resource>, url_values: UrlValues) -> Self {
        Self { request, resource, url_values, extensions: Mutex::new(Extensions::new()) }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn resource(&self) -> &Arc<Resource> { &self.resource }
    pub fn url_values(&self) -> &UrlValues { &self.url_values }

    /// Stores a value for the rest of the request, returning the one it
    /// replaces. One value is kept per type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }
}

/// The context of the request being handled by the current task, or `None`
/// outside of a request.
pub fn current() -> Option<Arc<RequestContext>> {
    CONTEXT.try_with(Arc::clone).ok()
}

/// Runs `fut` with `ctx` bound as the current context.
pub(crate) async fn scope<F: Future>(ctx: Arc<RequestContext>, fut: F) -> F::Output {
    CONTEXT.scope(ctx, fut).await
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Code run around every routed request.
///
/// `enter` runs before the request is dispatched, in registration order. An
/// error from `enter` fails the request. `exit` runs after the response is
/// produced, in reverse order, for every hook whose `enter` succeeded.
#[async_trait]
pub trait ContextHook: Send + Sync + 'static {
    async fn enter(&self, ctx: &RequestContext) -> Result<()>;

    async fn exit(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }
}
