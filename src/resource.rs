//! Resources and collections.
//!
//! A [`Resource`] pairs a name with a [`DataModel`] and the content
//! registries used for its requests. The HTTP method picks the model
//! function:
//!
//! | Method | Action | Input |
//! |---|---|---|
//! | GET, HEAD | read | |
//! | PUT | write | parsed body |
//! | DELETE | delete | |
//! | POST | make (collections only) | parsed body |
//!
//! A collection is a resource created with [`Resource::collection`]. It
//! knows which member resource it collects, so it can point at members it
//! creates or lists.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use http::header::{HeaderValue, LOCATION};
use serde_json::{Map, Value};

use crate::content::{ErrorHandler, Formatter, Parser};
use crate::dataset::model::{readonly_set_model, record_model, set_model};
use crate::dataset::{DataSet, Fields, MutableDataSet, MutableRecord};
use crate::error::{Error, ErrorKind, HttpError, Result};
use crate::handler::{InputHandler, ModelCall, ReadHandler};
use crate::method::Method;
use crate::model::{Action, DataModel, Reply, UrlValues};
use crate::response::Response;

#[derive(Clone, Debug)]
struct Collects {
    member: String,
    include_urls: bool,
    /// Record field → URL variable of the member rule.
    bindings: BTreeMap<String, String>,
}

/// A REST resource.
///
/// ```rust
/// use rivet::{Error, Resource, UrlValues};
/// use serde_json::{Value, json};
///
/// let task = Resource::new("task")
///     .read(|vars: UrlValues| async move {
///         let id: u64 = vars.parse("id")?;
///         Ok::<_, Error>(json!({"id": id}))
///     })
///     .write(|_: UrlValues, data: Value| async move { Ok::<_, Error>(data) });
///
/// let tasks = task.collection("tasks").include_urls(true);
/// ```
pub struct Resource {
    name: String,
    model: DataModel,
    pub(crate) parser: Parser,
    pub(crate) formatter: Formatter,
    error_handler: ErrorHandler,
    collects: Option<Collects>,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        let mut error_handler = ErrorHandler::new();
        error_handler.register(ErrorKind::Lookup, |_| Err(Error::not_found()));
        Self {
            name: name.into(),
            model: DataModel::new(),
            parser: Parser::new(),
            formatter: Formatter::new(),
            error_handler,
            collects: None,
        }
    }

    /// A resource with a random unique name.
    pub fn anonymous() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn data_model(&self) -> &DataModel { &self.model }

    // ── Model ─────────────────────────────────────────────────────────────────

    pub fn read(mut self, f: impl ReadHandler) -> Self {
        self.model = self.model.read(f);
        self
    }

    pub fn write(mut self, f: impl InputHandler) -> Self {
        self.model = self.model.write(f);
        self
    }

    pub fn delete(mut self, f: impl ReadHandler) -> Self {
        self.model = self.model.delete(f);
        self
    }

    /// Only collections answer POST, so a make function on a plain resource
    /// is never called.
    pub fn make(mut self, f: impl InputHandler) -> Self {
        self.model = self.model.make(f);
        self
    }

    /// Adds every function of `model`, replacing those already set for the
    /// same actions.
    pub fn model(mut self, model: DataModel) -> Self {
        self.model = model.compose(&self.model);
        self
    }

    /// Backs the resource with a mutable data set produced per request:
    /// GET lists its records, POST adds one. Functions set explicitly win.
    pub fn lazy_set<F, Fut, S>(mut self, source: F) -> Self
    where
        F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<S>>> + Send + 'static,
        S: MutableDataSet + ?Sized + 'static,
    {
        self.model = self.model.compose(&set_model(source));
        self
    }

    /// Like [`lazy_set`](Self::lazy_set), read only.
    pub fn lazy_readonly_set<F, Fut, S>(mut self, source: F) -> Self
    where
        F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<S>>> + Send + 'static,
        S: DataSet + ?Sized + 'static,
    {
        self.model = self.model.compose(&readonly_set_model(source));
        self
    }

    /// Backs the resource with a record looked up per request: GET reads it,
    /// PUT replaces its fields, DELETE removes it.
    pub fn lazy_record<F, Fut, R>(mut self, source: F) -> Self
    where
        F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: MutableRecord + 'static,
    {
        self.model = self.model.compose(&record_model(source));
        self
    }

    // ── Content ───────────────────────────────────────────────────────────────

    /// Parsers tried before the app's.
    pub fn parser(mut self, parser: Parser) -> Self {
        self.parser = parser;
        self
    }

    /// Formatters preferred over the app's.
    pub fn formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Handles errors of `kind` before the app's error handler sees them.
    /// Returning an error hands it on to the app.
    pub fn error_handler<F>(mut self, kind: ErrorKind, f: F) -> Self
    where
        F: Fn(Error) -> Result<Response> + Send + Sync + 'static,
    {
        self.error_handler.register(kind, f);
        self
    }

    pub(crate) fn handle_error(&self, err: Error) -> Result<Response> {
        self.error_handler.handle(err)
    }

    // ── Collections ───────────────────────────────────────────────────────────

    /// A collection of this resource.
    pub fn collection(&self, name: impl Into<String>) -> Resource {
        let mut collection = Resource::new(name);
        collection.collects = Some(Collects {
            member: self.name.clone(),
            include_urls: false,
            bindings: BTreeMap::new(),
        });
        collection
    }

    /// Adds a `url` field to each listed member whose fields are enough to
    /// build its URL. Collections only.
    pub fn include_urls(mut self, include: bool) -> Self {
        if let Some(c) = &mut self.collects {
            c.include_urls = include;
        }
        self
    }

    /// Fills the member rule's `url_var` from the record field `field`.
    /// Collections only.
    pub fn bind(mut self, field: &str, url_var: &str) -> Self {
        if let Some(c) = &mut self.collects {
            c.bindings.insert(field.to_owned(), url_var.to_owned());
        }
        self
    }

    pub fn is_collection(&self) -> bool { self.collects.is_some() }

    /// Name of the member resource, for collections.
    pub fn collects(&self) -> Option<&str> {
        self.collects.as_ref().map(|c| c.member.as_str())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    pub fn supported_methods(&self) -> Vec<Method> {
        let mut methods = vec![Method::Get, Method::Head];
        if self.model.contains(Action::Write) {
            methods.push(Method::Put);
        }
        if self.model.contains(Action::Delete) {
            methods.push(Method::Delete);
        }
        if self.is_collection() && self.model.contains(Action::Make) {
            methods.push(Method::Post);
        }
        methods
    }

    fn not_allowed(&self) -> Error {
        HttpError::method_not_allowed(self.supported_methods().into_iter().map(Method::as_str)).into()
    }

    /// Runs the model function for `method`.
    pub(crate) async fn call(&self, method: Method, vars: UrlValues, input: Option<Value>) -> Result<Reply> {
        let action = match method.action() {
            Some(Action::Make) if !self.is_collection() => return Err(self.not_allowed()),
            Some(action) => action,
            None => return Err(self.not_allowed()),
        };
        let input = method.has_input().then(|| input.unwrap_or_else(|| Value::Object(Map::new())));
        match self.model.get(action) {
            Some(f) => f(ModelCall { vars, input }).await,
            None if action == Action::Read => Ok(Reply::data(Value::Object(Map::new()))),
            None => Err(self.not_allowed()),
        }
    }

    /// Points a collection's reply at its members: a created member becomes
    /// the `Location` of a 201, listed members gain a `url` field.
    pub(crate) fn link_members<U>(&self, method: Method, vars: &UrlValues, reply: &mut Reply, url_for: U)
    where
        U: Fn(&str, &UrlValues) -> Option<String>,
    {
        let Some(c) = &self.collects else { return };
        let member_url = |fields: &Fields| url_for(&c.member, &c.values_for(vars, fields));

        match (method, reply) {
            (Method::Post, Reply::Data { value, status, headers }) => {
                status.get_or_insert(StatusCode::CREATED);
                if headers.contains_key(LOCATION) {
                    return;
                }
                let url = value.as_object().and_then(member_url);
                if let Some(v) = url.and_then(|u| HeaderValue::from_str(&u).ok()) {
                    headers.insert(LOCATION, v);
                }
            }
            (Method::Get | Method::Head, Reply::Data { value: Value::Array(items), .. }) if c.include_urls => {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    if item.contains_key("url") {
                        continue;
                    }
                    if let Some(url) = member_url(item) {
                        item.insert("url".to_owned(), Value::String(url));
                    }
                }
            }
            _ => {}
        }
    }
}

impl Collects {
    /// The request's URL values overlaid with the record's scalar fields,
    /// renamed through the bindings.
    fn values_for(&self, vars: &UrlValues, fields: &Fields) -> UrlValues {
        let mut values = vars.clone();
        for (field, value) in fields {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            let name = self.bindings.get(field).unwrap_or(field);
            values.insert(name.as_str(), value);
        }
        values
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("collects", &self.collects())
            .finish_non_exhaustive()
    }
}
