//! JSON content handling.
//!
//! [`App::new`](crate::App::new) installs these as the app's default parser,
//! formatter and error handler, so a plain app speaks `application/json`
//! in both directions and reports failures as `{"message": …}` objects.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Value, json};
use tracing::error;

use crate::content::{ErrorHandler, Formatter, Parser};
use crate::error::{Error, ErrorKind, HttpError, Result};
use crate::response::Response;

pub const MIME: &str = "application/json";

/// Serializes `value`, pretty-printed with `indent` spaces when given.
pub fn serialize(value: &Value, indent: Option<usize>) -> Result<Bytes> {
    let Some(width) = indent else {
        return Ok(serde_json::to_vec(value)?.into());
    };
    let pad = " ".repeat(width);
    let mut out = Vec::new();
    let mut ser = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(pad.as_bytes()));
    value.serialize(&mut ser)?;
    Ok(out.into())
}

/// Parses a request body. An empty body reads as an empty object.
///
/// Only UTF-8 is accepted; a body in another declared charset, or one that
/// isn't valid UTF-8, is a 400.
pub fn deserialize(body: &[u8], options: &BTreeMap<String, String>) -> Result<Value> {
    let charset_ok = options
        .get("charset")
        .is_none_or(|c| c.eq_ignore_ascii_case("utf-8") || c.eq_ignore_ascii_case("utf8"));
    let text = match std::str::from_utf8(body) {
        Ok(text) if charset_ok => text,
        _ => return Err(Error::bad_request("Cannot decode request data")),
    };
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(text).map_err(|e| Error::bad_request(format!("Can't parse request data {e}")))
}

/// Renders an error as a JSON response.
///
/// Errors with an HTTP rendition keep their status and headers; the rest are
/// logged and reported as a bare 500.
pub fn error_response(err: Error, indent: Option<usize>) -> Result<Response> {
    let (status, headers, message) = match err.to_http() {
        Some(HttpError { status, description, headers }) => (status, headers, description),
        None => {
            error!(error = %err, "unhandled error");
            (StatusCode::INTERNAL_SERVER_ERROR, Default::default(), "internal error".to_owned())
        }
    };
    Ok(Response::builder()
        .status(status)
        .headers(headers)
        .bytes(MIME, serialize(&json!({ "message": message }), indent)?))
}

/// Registers the JSON parser and formatter as defaults, and the JSON error
/// responder for every error kind.
pub(crate) fn install(
    parser: &mut Parser,
    formatter: &mut Formatter,
    errors: &mut ErrorHandler,
    indent: Option<usize>,
) {
    parser.insert(MIME, Arc::new(deserialize), true);
    formatter.insert(MIME, Arc::new(move |v: &Value| serialize(v, indent)), true);
    errors.register(ErrorKind::Any, move |e| error_response(e, indent));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_opts() -> BTreeMap<String, String> { BTreeMap::new() }

    #[test]
    fn empty_body_is_empty_object() {
        assert_eq!(deserialize(b"", &no_opts()).unwrap(), json!({}));
        assert_eq!(deserialize(b"  \n", &no_opts()).unwrap(), json!({}));
    }

    #[test]
    fn bad_json_is_bad_request() {
        let err = deserialize(b"{nope", &no_opts()).unwrap_err();
        let http = err.to_http().unwrap();
        assert_eq!(http.status, StatusCode::BAD_REQUEST);
        assert!(http.description.starts_with("Can't parse request data"));
    }

    #[test]
    fn foreign_charset_cannot_be_decoded() {
        let opts = BTreeMap::from([("charset".to_owned(), "latin-1".to_owned())]);
        let err = deserialize(b"{}", &opts).unwrap_err();
        assert_eq!(err.to_http().unwrap().description, "Cannot decode request data");
        assert!(deserialize(&[0xff, 0xfe], &no_opts()).is_err());
    }

    #[test]
    fn indent_pretty_prints() {
        let out = serialize(&json!({"a": 1}), Some(2)).unwrap();
        assert_eq!(out, Bytes::from("{\n  \"a\": 1\n}"));
        assert_eq!(serialize(&json!({"a": 1}), None).unwrap(), Bytes::from("{\"a\":1}"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let res = error_response(anyhow::anyhow!("db exploded").into(), None).unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.json_body().unwrap(), json!({"message": "internal error"}));
    }

    #[test]
    fn http_errors_keep_headers() {
        let res = error_response(HttpError::method_not_allowed(["GET"]).into(), None).unwrap();
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.header("allow"), Some("GET"));
        assert_eq!(res.header("content-type"), Some(MIME));
    }
}
