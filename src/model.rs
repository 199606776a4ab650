//! Data models: which data operations a resource supports and the
//! functions that perform them.
//!
//! A model maps each [`Action`] to a [`ModelFn`]. The HTTP method of a
//! request selects the action: GET and HEAD read, PUT writes, DELETE
//! deletes and POST makes a child on collections.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::handler::{InputHandler, ModelFn, ReadHandler};
use crate::response::Response;

/// A data operation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Action {
    /// Retrieve the resource's data.
    Read,
    /// Replace the resource's data, creating it if needed.
    Write,
    /// Remove the resource.
    Delete,
    /// Create a child resource; returns data identifying the child.
    Make,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Write, Action::Delete, Action::Make];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Make => "make",
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::InvalidSpecification(format!("unsupported action: {s}")))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── UrlValues ─────────────────────────────────────────────────────────────────

/// Variables extracted from the request path by the matched URL rule.
///
/// For a rule `/tasks/{id}` and a request to `/tasks/43`, `get("id")`
/// returns `Some("43")`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UrlValues(BTreeMap<String, String>);

impl UrlValues {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parses a variable. A missing or unparsable variable means the URL does
    /// not name an existing resource, so the error is a 404.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T> {
        self.get(name)
            .and_then(|v| v.parse().ok())
            .ok_or_else(Error::not_found)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What a model function produced.
#[derive(Debug)]
pub enum Reply {
    /// Data for the formatter, plus an optional status and extra headers.
    Data {
        value: Value,
        status: Option<StatusCode>,
        headers: HeaderMap,
    },
    /// A finished response, sent as is.
    Raw(Response),
}

impl Reply {
    pub fn data(value: Value) -> Self {
        Self::Data { value, status: None, headers: HeaderMap::new() }
    }

    /// Sets the status unless the reply is a finished response.
    pub fn with_status(mut self, code: StatusCode) -> Self {
        if let Self::Data { status, .. } = &mut self {
            *status = Some(code);
        }
        self
    }

    /// Adds a header unless the reply is a finished response. Invalid names
    /// or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Self::Data { headers, .. } = &mut self {
            if let (Ok(n), Ok(v)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
                headers.insert(n, v);
            }
        }
        self
    }
}

/// Conversion of a model function's output into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply { Reply::data(self) }
}

impl IntoReply for serde_json::Map<String, Value> {
    fn into_reply(self) -> Reply { Reply::data(Value::Object(self)) }
}

impl IntoReply for Vec<Value> {
    fn into_reply(self) -> Reply { Reply::data(Value::Array(self)) }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply { Reply::Raw(self) }
}

/// Formats as `null`.
impl IntoReply for () {
    fn into_reply(self) -> Reply { Reply::data(Value::Null) }
}

// ── DataModel ─────────────────────────────────────────────────────────────────

/// A mapping of data operations to the functions that perform them.
///
/// ```rust
/// use rivet::{DataModel, Error, UrlValues};
/// use serde_json::{Value, json};
///
/// let model = DataModel::new()
///     .read(|_vars: UrlValues| async { Ok::<_, Error>(json!({"id": 1})) })
///     .write(|_vars: UrlValues, data: Value| async move { Ok::<_, Error>(data) });
/// ```
#[derive(Clone, Default)]
pub struct DataModel {
    fns: HashMap<Action, ModelFn>,
}

impl DataModel {
    pub fn new() -> Self { Self::default() }

    pub fn read(mut self, f: impl ReadHandler) -> Self {
        self.set(Action::Read, f.into_model_fn());
        self
    }

    pub fn write(mut self, f: impl InputHandler) -> Self {
        self.set(Action::Write, f.into_model_fn());
        self
    }

    pub fn delete(mut self, f: impl ReadHandler) -> Self {
        self.set(Action::Delete, f.into_model_fn());
        self
    }

    pub fn make(mut self, f: impl InputHandler) -> Self {
        self.set(Action::Make, f.into_model_fn());
        self
    }

    pub fn set(&mut self, action: Action, f: ModelFn) {
        self.fns.insert(action, f);
    }

    pub fn remove(&mut self, action: Action) -> Option<ModelFn> {
        self.fns.remove(&action)
    }

    pub fn get(&self, action: Action) -> Option<&ModelFn> {
        self.fns.get(&action)
    }

    pub fn contains(&self, action: Action) -> bool {
        self.fns.contains_key(&action)
    }

    /// Supported actions in declaration order of [`Action::ALL`].
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.contains(*a))
    }

    pub fn is_empty(&self) -> bool { self.fns.is_empty() }

    /// A model with every function of `self`, falling back to `other` for
    /// the actions `self` lacks.
    pub fn compose(&self, other: &DataModel) -> DataModel {
        let mut fns = other.fns.clone();
        fns.extend(self.fns.iter().map(|(a, f)| (*a, f.clone())));
        DataModel { fns }
    }
}

impl fmt::Debug for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.actions()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handler::ModelCall;

    #[tokio::test]
    async fn compose_prefers_own_functions() {
        let own = DataModel::new().read(|_: UrlValues| async { Ok::<_, Error>(json!("own")) });
        let other = DataModel::new()
            .read(|_: UrlValues| async { Ok::<_, Error>(json!("other")) })
            .delete(|_: UrlValues| async { Ok::<_, Error>(()) });

        let composed = own.compose(&other);
        assert_eq!(composed.actions().collect::<Vec<_>>(), vec![Action::Read, Action::Delete]);

        let read = composed.get(Action::Read).unwrap();
        match read(ModelCall::default()).await.unwrap() {
            Reply::Data { value, .. } => assert_eq!(value, json!("own")),
            Reply::Raw(_) => panic!("expected data"),
        }
    }

    #[test]
    fn actions_parse_from_names() {
        assert_eq!("make".parse::<Action>().unwrap(), Action::Make);
        assert!("update".parse::<Action>().is_err());
    }

    #[test]
    fn url_values_parse_missing_is_not_found() {
        let vars: UrlValues = [("id", "7")].into_iter().collect();
        assert_eq!(vars.parse::<u64>("id").unwrap(), 7);
        assert_eq!(
            vars.parse::<u64>("other").unwrap_err().kind(),
            crate::ErrorKind::Status(StatusCode::NOT_FOUND)
        );
    }
}
