//! Scope-based authorization.
//!
//! A [`Protector`] guards resources. For a request to a guarded resource it
//! asks its [`GateKeeper`] who is calling and which scopes they hold, then
//! checks those scopes against the resource's guards with the permission
//! the request method needs:
//!
//! | method         | permission |
//! |----------------|------------|
//! | GET, HEAD      | `r`        |
//! | POST           | `c`        |
//! | PATCH          | `cu`       |
//! | DELETE         | `d`        |
//! | anything else  | `crud`     |
//!
//! Requests to unguarded resources are let through untouched.

pub mod scope;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{debug, warn};

use crate::app::App;
use crate::context::{self, ContextHook, RequestContext};
use crate::error::{Error, HttpError, Result};
use crate::request::Request;
use crate::resource::Resource;

use self::scope::{ANY, find_granting_scope, normalize_scope_items};

// ── Gatekeepers ───────────────────────────────────────────────────────────────

/// What a gatekeeper learned about the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Grant {
    pub user: String,
    pub scopes: Vec<String>,
    pub client: Option<String>,
}

impl Grant {
    /// A grant for `user` with unlimited scope.
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into(), scopes: vec![ANY.to_owned()], client: None }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }
}

/// Authenticates requests.
///
/// Failing authentication should be an [`HttpError`] with status 401.
#[async_trait]
pub trait GateKeeper: Send + Sync + 'static {
    async fn check_auth(&self, request: &Request) -> Result<Grant>;
}

/// Rejects every request. Used until a real gatekeeper is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl GateKeeper for DenyAll {
    async fn check_auth(&self, _request: &Request) -> Result<Grant> {
        warn!("guarded resource uses the deny-all gatekeeper; configure the protector with another one");
        Err(HttpError::unauthorized("").into())
    }
}

type AuthFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// HTTP Basic authentication.
///
/// Credentials are checked with the given function. Grants carry the user
/// name and unlimited scope.
#[derive(Clone)]
pub struct BasicAuth {
    realm: String,
    auth: AuthFn,
}

impl BasicAuth {
    pub fn new<F>(realm: impl Into<String>, auth: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        Self { realm: realm.into(), auth: Arc::new(auth) }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth").field("realm", &self.realm).finish()
    }
}

#[async_trait]
impl GateKeeper for BasicAuth {
    async fn check_auth(&self, request: &Request) -> Result<Grant> {
        match basic_credentials(request) {
            Some((user, password)) if (self.auth)(&user, &password) => Ok(Grant::new(user)),
            _ => Err(HttpError::unauthorized(&format!("Basic realm=\"{}\"", self.realm)).into()),
        }
    }
}

fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let (scheme, encoded) = request.header("authorization")?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(BASE64.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

// ── Protector ─────────────────────────────────────────────────────────────────

/// The authenticated caller of the current request, stored in the request
/// context once a guarded resource admits the request.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthInfo {
    pub user: String,
    pub scopes: Vec<String>,
    pub client: Option<String>,
}

impl AuthInfo {
    /// The caller of the request being handled, if it was authenticated.
    pub fn current() -> Option<AuthInfo> {
        context::current().and_then(|ctx| ctx.get::<AuthInfo>())
    }
}

impl From<Grant> for AuthInfo {
    fn from(grant: Grant) -> Self {
        Self { user: grant.user, scopes: grant.scopes, client: grant.client }
    }
}

/// Guards resources against callers without the right scopes.
///
/// ```rust
/// use rivet::{App, Error, Resource, UrlValues};
/// use rivet::tools::protector::{BasicAuth, Protector};
/// use serde_json::json;
///
/// # fn demo() -> rivet::Result<()> {
/// let mut app = App::new();
/// let secret = app.route(
///     Resource::new("secret").read(|_: UrlValues| async { Ok::<_, Error>(json!("xyzzy")) }),
///     "/secret",
/// )?;
///
/// let protector = Protector::new(BasicAuth::new("vault", |user, pass| user == "ann" && pass == "hunter2"));
/// protector.guard(&secret, &["vault"])?;
/// protector.attach_to(&mut app);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Protector {
    gatekeeper: Arc<dyn GateKeeper>,
    separator: String,
    guards: Arc<RwLock<BTreeMap<String, Vec<Vec<String>>>>>,
}

impl Default for Protector {
    fn default() -> Self { Self::new(DenyAll) }
}

impl Protector {
    pub fn new(gatekeeper: impl GateKeeper) -> Self {
        Self { gatekeeper: Arc::new(gatekeeper), separator: "/".to_owned(), guards: Arc::default() }
    }

    /// Separates a scope from its sub-scopes. Defaults to `/`.
    pub fn subscope_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Checks every request to a guarded resource of `app`.
    pub fn attach_to(&self, app: &mut App) {
        app.context(self.clone());
    }

    /// Requires callers of `resource` to hold every scope in `scopes`.
    ///
    /// Each call adds an alternative: a request is admitted if any one of
    /// the guards is satisfied. An empty list admits any authenticated
    /// caller. Scopes are bare names; the permission comes from the
    /// request method.
    pub fn guard(&self, resource: &Resource, scopes: &[&str]) -> Result<&Self> {
        if let Some(bad) = scopes.iter().find(|s| s.contains('+')) {
            return Err(Error::InvalidScope((*bad).to_owned()));
        }
        normalize_scope_items(scopes, true)?;
        self.guards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(resource.name().to_owned())
            .or_default()
            .push(scopes.iter().map(|s| (*s).to_owned()).collect());
        Ok(self)
    }

    pub fn is_guarded(&self, resource: &Resource) -> bool {
        self.guards.read().unwrap_or_else(PoisonError::into_inner).contains_key(resource.name())
    }

    fn admits(&self, guards: &[Vec<String>], grant: &Grant, permissions: &str) -> bool {
        guards.iter().any(|guard| {
            guard.iter().all(|scope| {
                let required = format!("{scope}+{permissions}");
                find_granting_scope(&required, &grant.scopes, &self.separator).is_some()
            })
        })
    }
}

/// The permission a request method needs.
pub fn required_permissions(method: &http::Method) -> &'static str {
    match method.as_str() {
        "GET" | "HEAD" => "r",
        "POST" => "c",
        "PATCH" => "cu",
        "DELETE" => "d",
        _ => "crud",
    }
}

#[async_trait]
impl ContextHook for Protector {
    async fn enter(&self, ctx: &RequestContext) -> Result<()> {
        let guards = self
            .guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ctx.resource().name())
            .cloned();
        let Some(guards) = guards else { return Ok(()) };

        let grant = self.gatekeeper.check_auth(ctx.request()).await?;
        let permissions = required_permissions(ctx.request().method());
        if !self.admits(&guards, &grant, permissions) {
            debug!(user = %grant.user, resource = ctx.resource().name(), "insufficient scope");
            return Err(Error::InsufficientScope { guards });
        }

        debug!(user = %grant.user, resource = ctx.resource().name(), "request authorized");
        ctx.insert(AuthInfo::from(grant));
        Ok(())
    }
}

impl fmt::Debug for Protector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protector")
            .field("separator", &self.separator)
            .field("guards", &*self.guards.read().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}
