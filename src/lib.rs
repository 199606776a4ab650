//! # rivet
//!
//! A small framework for RESTful JSON APIs.
//!
//! You declare *resources*, give each one a data model (read, write, delete
//! and, for collections, make) and bind it to URL rules. rivet does the
//! rest of the HTTP work around them.
//!
//! ## What rivet does for you
//!
//! - Picks the model function from the HTTP method, with 405 and `Allow`
//!   for the rest
//! - Parses request bodies by `Content-Type` and formats replies by
//!   `Accept`, with per-resource overrides of the app-wide registries
//! - Maps errors to responses through error handlers looked up by kind
//! - Binds a [`RequestContext`] per request, reachable from any code in the
//!   request's task via [`context::current`]
//! - Serves resources backed by [data sets](dataset) with no model code
//! - Optional [tools]: hit counters, input validators and scope guards
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rivet::dataset::MemorySet;
//! use rivet::{App, Error, Resource, Server, Settings, UrlValues};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rivet::Result<()> {
//!     let settings = Settings::load()?;
//!     let mut app = App::with_settings(&settings)?;
//!     let store = MemorySet::new();
//!
//!     let task = app.route(
//!         Resource::new("task").lazy_record({
//!             let store = store.clone();
//!             move |vars: UrlValues| {
//!                 let store = store.clone();
//!                 async move { Ok::<_, Error>(store.record(vars.parse("id")?)) }
//!             }
//!         }),
//!         "/tasks/{id}",
//!     )?;
//!
//!     let tasks = task.collection("tasks").include_urls(true).lazy_set(move |_: UrlValues| {
//!         let store = Arc::new(store.clone());
//!         async move { Ok::<_, Error>(store) }
//!     });
//!     app.route(tasks, "/tasks")?;
//!
//!     Server::from_settings(&settings)?.serve(app).await
//! }
//! ```

mod app;
mod content;
pub mod context;
mod datapipe;
pub mod dataset;
mod error;
mod handler;
pub mod json;
mod method;
mod model;
mod negotiate;
mod request;
mod resource;
mod response;
mod router;
mod rule;
mod server;
mod settings;
pub mod tools;

pub use crate::app::{AUTOLIST, App};
pub use crate::content::{ErrorHandler, Formatter, Parser};
pub use crate::context::{ContextHook, RequestContext};
pub use crate::datapipe::DataPipe;
pub use crate::error::{Error, ErrorKind, HttpError, Result};
pub use crate::handler::{InputHandler, ModelCall, ReadHandler};
pub use crate::method::Method;
pub use crate::model::{Action, DataModel, IntoReply, Reply, UrlValues};
pub use crate::request::Request;
pub use crate::resource::Resource;
pub use crate::response::{Response, ResponseBuilder};
pub use crate::router::Route;
pub use crate::rule::Rule;
pub use crate::server::Server;
pub use crate::settings::Settings;
