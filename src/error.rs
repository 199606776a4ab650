//! Unified error type.
//!
//! Errors flow out of model functions, context hooks and the input pipe and
//! are turned into responses by an [`ErrorHandler`](crate::ErrorHandler).
//! Handlers are looked up by [`ErrorKind`], walking from the most specific
//! kind up to [`ErrorKind::Any`].

use http::header::{ALLOW, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};

/// Shorthand used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by rivet's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error with a definite HTTP status.
    #[error("{0}")]
    Http(#[from] HttpError),

    /// A lookup for a record or item came up empty. Resources map this to 404.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// One or more input fields failed validation.
    #[error("validation failed for fields: {}", .fields.join(", "))]
    ValidationFailed { fields: Vec<String> },

    /// The request's grant does not satisfy any guard on the resource.
    #[error("insufficient scope")]
    InsufficientScope { guards: Vec<Vec<String>> },

    /// A validator or converter specification could not be understood.
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    /// A scope item does not follow `name[+permissions]`.
    #[error("invalid scope item: {0}")]
    InvalidScope(String),

    /// A URL rule could not be registered.
    #[error("invalid route `{rule}`: {reason}")]
    Route { rule: String, reason: String },

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The kind used to pick an error handler.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(e) => ErrorKind::Status(e.status),
            Self::Lookup(_) => ErrorKind::Lookup,
            Self::ValidationFailed { .. } => ErrorKind::Validation,
            Self::InsufficientScope { .. } => ErrorKind::InsufficientScope,
            _ => ErrorKind::Internal,
        }
    }

    /// The HTTP rendition of this error, if it has one.
    ///
    /// Lookup and internal errors have none: a handler has to decide what
    /// they mean.
    pub fn to_http(&self) -> Option<HttpError> {
        match self {
            Self::Http(e) => Some(e.clone()),
            Self::ValidationFailed { fields } => Some(HttpError::new(
                StatusCode::BAD_REQUEST,
                format!("Failed to validate fields: {}", fields.join(", ")),
            )),
            Self::InsufficientScope { .. } => Some(HttpError::new(
                StatusCode::FORBIDDEN,
                "The request's authorization does not grant access to this resource.",
            )),
            _ => None,
        }
    }

    pub fn not_found() -> Self {
        HttpError::not_found().into()
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        HttpError::bad_request(description).into()
    }
}

/// Handler lookup key.
///
/// Kinds form a tree rooted at [`ErrorKind::Any`]; an error handler
/// registered for a kind also handles every kind below it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Any,
    /// Any error with an HTTP status.
    Http,
    /// An HTTP error with this exact status.
    Status(StatusCode),
    Lookup,
    Validation,
    InsufficientScope,
    Internal,
}

impl ErrorKind {
    pub fn parent(self) -> Option<ErrorKind> {
        match self {
            Self::Any => None,
            Self::Http | Self::Lookup | Self::Internal => Some(Self::Any),
            Self::Status(_) => Some(Self::Http),
            Self::Validation => Some(Self::Status(StatusCode::BAD_REQUEST)),
            Self::InsufficientScope => Some(Self::Status(StatusCode::FORBIDDEN)),
        }
    }

    /// This kind followed by each of its ancestors, most specific first.
    pub fn lineage(self) -> impl Iterator<Item = ErrorKind> {
        std::iter::successors(Some(self), |k| k.parent())
    }
}

/// An error that maps directly onto an HTTP response.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{status}: {description}")]
pub struct HttpError {
    pub status: StatusCode,
    pub description: String,
    pub headers: HeaderMap,
}

impl HttpError {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self { status, description: description.into(), headers: HeaderMap::new() }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, description)
    }

    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "The requested URL was not found on the server.",
        )
    }

    /// 405 carrying the `Allow` header.
    pub fn method_not_allowed<'a>(allowed: impl IntoIterator<Item = &'a str>) -> Self {
        let allow = allowed.into_iter().collect::<Vec<_>>().join(", ");
        let err = Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "The method is not allowed for the requested URL.",
        );
        match HeaderValue::from_str(&allow) {
            Ok(v) => err.with_header(ALLOW, v),
            Err(_) => err,
        }
    }

    pub fn not_acceptable() -> Self {
        Self::new(
            StatusCode::NOT_ACCEPTABLE,
            "The resource cannot produce a response in any format the client accepts.",
        )
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "The server does not support the media type transmitted in the request.",
        )
    }

    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "The request body is too large.")
    }

    /// 401 with a `WWW-Authenticate` challenge.
    pub fn unauthorized(challenge: &str) -> Self {
        let err = Self::new(
            StatusCode::UNAUTHORIZED,
            "The server could not verify that you are authorized to access the URL requested.",
        );
        match HeaderValue::from_str(challenge) {
            Ok(v) if !challenge.is_empty() => err.with_header(WWW_AUTHENTICATE, v),
            _ => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kind_descends_from_bad_request() {
        let lineage: Vec<_> = ErrorKind::Validation.lineage().collect();
        assert_eq!(
            lineage,
            vec![
                ErrorKind::Validation,
                ErrorKind::Status(StatusCode::BAD_REQUEST),
                ErrorKind::Http,
                ErrorKind::Any,
            ]
        );
    }

    #[test]
    fn lookup_has_no_http_rendition() {
        assert!(Error::Lookup("task".into()).to_http().is_none());
        assert_eq!(Error::not_found().kind(), ErrorKind::Status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn method_not_allowed_lists_methods() {
        let err = HttpError::method_not_allowed(["GET", "HEAD"]);
        assert_eq!(err.headers.get(ALLOW).unwrap(), "GET, HEAD");
    }
}
