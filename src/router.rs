//! Radix-tree route table.
//!
//! A single `matchit` tree maps each URL rule to a route; the route knows
//! its resource and the methods it serves. Lookup is O(path-length) and the
//! method check happens after the match, so a known path with the wrong
//! method is a 405 rather than a 404.

use std::sync::Arc;

use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};
use crate::method::Method;
use crate::model::UrlValues;
use crate::resource::Resource;
use crate::rule::Rule;

/// A URL rule bound to a resource.
#[derive(Debug)]
pub struct Route {
    pub rule: Rule,
    pub resource: Arc<Resource>,
    pub methods: Vec<Method>,
}

impl Route {
    /// HEAD is served wherever GET is.
    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method) || (method == Method::Head && self.methods.contains(&Method::Get))
    }

    /// The `Allow` header values for this route.
    pub fn allowed(&self) -> impl Iterator<Item = &'static str> + '_ {
        let implied_head = self.methods.contains(&Method::Get) && !self.methods.contains(&Method::Head);
        self.methods
            .iter()
            .map(|m| m.as_str())
            .chain(implied_head.then_some(Method::Head.as_str()))
    }
}

/// The app's route table. Build it at startup; lookups never allocate
/// beyond the extracted URL values.
#[derive(Default)]
pub(crate) struct Router {
    tree: MatchitRouter<usize>,
    routes: Vec<Route>,
}

impl Router {
    pub fn insert(&mut self, rule: Rule, resource: Arc<Resource>, methods: Vec<Method>) -> Result<&Route> {
        let index = self.routes.len();
        self.tree.insert(rule.as_str(), index).map_err(|e| Error::Route {
            rule: rule.as_str().to_owned(),
            reason: e.to_string(),
        })?;
        self.routes.push(Route { rule, resource, methods });
        Ok(&self.routes[index])
    }

    /// The route matching `path` and its decoded URL values. A value that
    /// does not decode to UTF-8 matches nothing.
    pub fn lookup(&self, path: &str) -> Option<(&Route, UrlValues)> {
        let matched = self.tree.at(path).ok()?;
        let route = self.routes.get(*matched.value)?;
        let values = matched
            .params
            .iter()
            .map(|(name, raw)| percent_decode_str(raw).decode_utf8().map(|v| (name, v.into_owned())))
            .collect::<Result<UrlValues, _>>()
            .ok()?;
        Some((route, values))
    }

    /// Routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Rules bound to the resource named `name`, in registration order.
    pub fn rules_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rule> {
        self.routes
            .iter()
            .filter(move |r| r.resource.name() == name)
            .map(|r| &r.rule)
    }
}
