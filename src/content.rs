//! Content handling registries: parsers, formatters and error handlers.
//!
//! Each registry maps a key (a mime type, or an [`ErrorKind`]) to a function
//! and picks one per request:
//!
//! | Registry | Key | Chosen by |
//! |---|---|---|
//! | [`Parser`] | mime type | the request's `Content-Type` |
//! | [`Formatter`] | mime type | the request's `Accept` |
//! | [`ErrorHandler`] | [`ErrorKind`] | the closest ancestor of the error's kind |
//!
//! Lookup is linear over the registered entries, in registration order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, ErrorKind, HttpError, Result};
use crate::negotiate::{best_match, parse_accept, parse_options_header};
use crate::request::Request;
use crate::response::Response;

/// Turns a request body into data. Receives the content-type parameters.
pub type ParseFn = Arc<dyn Fn(&[u8], &BTreeMap<String, String>) -> Result<Value> + Send + Sync>;

/// Turns data into a response body.
pub type FormatFn = Arc<dyn Fn(&Value) -> Result<Bytes> + Send + Sync>;

/// Turns an error into a response, or into another error.
pub type ErrorFn = Arc<dyn Fn(Error) -> Result<Response> + Send + Sync>;

fn check_mime(mime: &str) -> Result<()> {
    if mime.matches('/').count() == 1 {
        Ok(())
    } else {
        Err(Error::InvalidSpecification(format!("`{mime}` doesn't appear to be a valid mime-type")))
    }
}

/// Inserts or replaces, keeping the original position of a replaced key.
fn upsert<T>(entries: &mut Vec<(String, T)>, key: String, value: T) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parses request bodies according to their `Content-Type`.
#[derive(Clone, Default)]
pub struct Parser {
    handlers: Vec<(String, ParseFn)>,
    default: Option<String>,
}

impl Parser {
    pub fn new() -> Self { Self::default() }

    /// Registers `f` for `mime`. With `default`, `f` also handles requests
    /// whose content type has no handler; the last default set wins.
    pub fn register<F>(&mut self, mime: &str, f: F, default: bool) -> Result<()>
    where
        F: Fn(&[u8], &BTreeMap<String, String>) -> Result<Value> + Send + Sync + 'static,
    {
        check_mime(mime)?;
        self.insert(mime, Arc::new(f), default);
        Ok(())
    }

    pub(crate) fn insert(&mut self, mime: &str, f: ParseFn, default: bool) {
        let mime = mime.to_ascii_lowercase();
        if default {
            self.default = Some(mime.clone());
        }
        upsert(&mut self.handlers, mime, f);
    }

    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    fn get(&self, mime: &str) -> Option<&ParseFn> {
        self.handlers.iter().find(|(m, _)| m == mime).map(|(_, f)| f)
    }

    /// The handler for a request with this `Content-Type`, with the mime type
    /// it was registered under and the header's parameters.
    pub fn choose(&self, content_type: Option<&str>) -> Result<(String, ParseFn, BTreeMap<String, String>)> {
        let (mime, options) = parse_options_header(content_type.unwrap_or_default());
        if let Some(f) = self.get(&mime) {
            return Ok((mime, f.clone(), options));
        }
        match self.default.as_deref().and_then(|d| self.get(d).map(|f| (d, f))) {
            Some((d, f)) => Ok((d.to_owned(), f.clone(), options)),
            None => Err(HttpError::unsupported_media_type().into()),
        }
    }

    pub fn parse(&self, request: &Request) -> Result<Value> {
        let (_, f, options) = self.choose(request.header("content-type"))?;
        f(request.body(), &options)
    }

    /// Parses with the first parser that accepts the request's content type.
    /// The last parser's error is returned when none does.
    pub fn resolve(parsers: &[&Parser], request: &Request) -> Result<Value> {
        let content_type = request.header("content-type");
        let mut last = HttpError::unsupported_media_type().into();
        for parser in parsers {
            match parser.choose(content_type) {
                Ok((_, f, options)) => return f(request.body(), &options),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("mimes", &self.handlers.iter().map(|(m, _)| m).collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

// ── Formatter ─────────────────────────────────────────────────────────────────

/// Serializes response data according to the request's `Accept` header.
#[derive(Clone, Default)]
pub struct Formatter {
    handlers: Vec<(String, FormatFn)>,
    default: Option<String>,
}

impl Formatter {
    pub fn new() -> Self { Self::default() }

    /// Registers `f` for `mime`. With `default`, `f` answers requests without
    /// a preference (`*/*` or no `Accept`); the last default set wins.
    pub fn register<F>(&mut self, mime: &str, f: F, default: bool) -> Result<()>
    where
        F: Fn(&Value) -> Result<Bytes> + Send + Sync + 'static,
    {
        check_mime(mime)?;
        self.insert(mime, Arc::new(f), default);
        Ok(())
    }

    pub(crate) fn insert(&mut self, mime: &str, f: FormatFn, default: bool) {
        let mime = mime.to_ascii_lowercase();
        if default {
            self.default = Some(mime.clone());
        }
        upsert(&mut self.handlers, mime, f);
    }

    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    pub fn mimes(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(m, _)| m.as_str())
    }

    fn get(&self, mime: &str) -> Option<&FormatFn> {
        self.handlers.iter().find(|(m, _)| m == mime).map(|(_, f)| f)
    }

    /// The mime type and handler that best satisfy `accept`.
    pub fn choose(&self, accept: Option<&str>) -> Result<(String, FormatFn)> {
        match accept.map(str::trim) {
            None | Some("") | Some("*/*") => {
                let chosen = self
                    .default
                    .as_deref()
                    .and_then(|d| self.get(d).map(|f| (d, f)))
                    .or_else(|| self.handlers.first().map(|(m, f)| (m.as_str(), f)));
                chosen
                    .map(|(m, f)| (m.to_owned(), f.clone()))
                    .ok_or_else(|| anyhow::anyhow!("no handlers have been registered for this formatter").into())
            }
            Some(header) => {
                let ranges = parse_accept(header);
                best_match(&ranges, self.mimes())
                    .and_then(|m| self.get(m).map(|f| (m.to_owned(), f.clone())))
                    .ok_or_else(|| HttpError::not_acceptable().into())
            }
        }
    }

    pub fn format(&self, accept: Option<&str>, data: &Value) -> Result<(String, Bytes)> {
        let (mime, f) = self.choose(accept)?;
        Ok((mime, f(data)?))
    }

    /// Merges formatters. Handlers of earlier formatters replace those of
    /// later ones for the same mime type, and the earliest default wins.
    pub fn compose<'a>(formatters: impl IntoIterator<Item = &'a Formatter>) -> Formatter {
        let formatters: Vec<_> = formatters.into_iter().collect();
        let mut merged = Formatter::new();
        for inst in formatters.into_iter().rev() {
            for (mime, f) in &inst.handlers {
                upsert(&mut merged.handlers, mime.clone(), f.clone());
            }
            if inst.default.is_some() {
                merged.default = inst.default.clone();
            }
        }
        merged
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatter")
            .field("mimes", &self.mimes().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

// ── ErrorHandler ──────────────────────────────────────────────────────────────

/// Maps errors to responses.
///
/// The handler used is the one registered for the closest ancestor of the
/// error's kind. Without one the error is handed back unchanged, so an
/// enclosing handler can have a go.
#[derive(Clone, Default)]
pub struct ErrorHandler {
    handlers: HashMap<ErrorKind, ErrorFn>,
}

impl ErrorHandler {
    pub fn new() -> Self { Self::default() }

    pub fn register<F>(&mut self, kind: ErrorKind, f: F)
    where
        F: Fn(Error) -> Result<Response> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(f));
    }

    pub fn choose(&self, kind: ErrorKind) -> Option<&ErrorFn> {
        kind.lineage().find_map(|k| self.handlers.get(&k))
    }

    pub fn handle(&self, err: Error) -> Result<Response> {
        match self.choose(err.kind()) {
            Some(f) => f(err),
            None => Err(err),
        }
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use super::*;

    fn text_formatter() -> Formatter {
        let mut f = Formatter::new();
        f.register("text/plain", |v: &Value| Ok(Bytes::from(v.to_string())), false).unwrap();
        f
    }

    #[test]
    fn rejects_malformed_mime() {
        let mut p = Parser::new();
        let err = p.register("json", |_: &[u8], _: &BTreeMap<String, String>| Ok(Value::Null), false);
        assert!(matches!(err, Err(Error::InvalidSpecification(_))));
    }

    #[test]
    fn formatter_defaults_to_first_without_preference() {
        let f = text_formatter();
        let (mime, body) = f.format(None, &json!(1)).unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(body, Bytes::from("1"));
    }

    #[test]
    fn formatter_not_acceptable() {
        let err = text_formatter().choose(Some("application/json")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Status(StatusCode::NOT_ACCEPTABLE));
    }

    #[test]
    fn empty_formatter_is_internal_error() {
        let err = Formatter::new().choose(None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn compose_prefers_earlier() {
        let mut first = Formatter::new();
        first.register("text/plain", |_: &Value| Ok(Bytes::from("first")), false).unwrap();
        let mut second = text_formatter();
        second.register("application/json", |v: &Value| Ok(Bytes::from(v.to_string())), true).unwrap();

        let merged = Formatter::compose([&first, &second]);
        let (_, body) = merged.format(Some("text/plain"), &json!(1)).unwrap();
        assert_eq!(body, Bytes::from("first"));
        let (mime, _) = merged.format(None, &json!(1)).unwrap();
        assert_eq!(mime, "application/json");
    }

    #[test]
    fn parser_falls_back_to_default() {
        let mut p = Parser::new();
        p.register("application/json", |_: &[u8], _: &BTreeMap<String, String>| Ok(json!("json")), true)
            .unwrap();
        let (mime, _, _) = p.choose(Some("text/csv")).unwrap();
        assert_eq!(mime, "application/json");

        let strict = {
            let mut p = Parser::new();
            p.register("text/csv", |_: &[u8], _: &BTreeMap<String, String>| Ok(Value::Null), false)
                .unwrap();
            p
        };
        let err = strict.choose(Some("application/json")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    #[test]
    fn error_handler_uses_closest_ancestor() {
        let mut h = ErrorHandler::new();
        h.register(ErrorKind::Any, |_| Ok(Response::text("any")));
        h.register(ErrorKind::Status(StatusCode::BAD_REQUEST), |_| Ok(Response::text("bad")));

        let res = h.handle(Error::ValidationFailed { fields: vec!["id".into()] }).unwrap();
        assert_eq!(res.body(), &Bytes::from("bad"));
        let res = h.handle(Error::Lookup("x".into())).unwrap();
        assert_eq!(res.body(), &Bytes::from("any"));
    }

    #[test]
    fn error_handler_reraises_without_match() {
        let mut h = ErrorHandler::new();
        h.register(ErrorKind::Lookup, |_| Err(Error::not_found()));
        let err = h.handle(Error::bad_request("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status(StatusCode::BAD_REQUEST));
        let err = h.handle(Error::Lookup("x".into())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status(StatusCode::NOT_FOUND));
    }
}
