//! Model function traits and type erasure.
//!
//! # How model functions are stored
//!
//! A [`DataModel`](crate::DataModel) holds functions of *different* types in
//! a single map. They are hidden behind one trait object signature:
//!
//! ```text
//! async fn read_task(vars: UrlValues) -> Result<Value> { … }  ← user writes this
//!        ↓ Resource::new("task").read(read_task)
//! read_task.into_model_fn()                                 ← ReadHandler blanket impl
//!        ↓
//! Arc::new(move |call| Box::pin(async { … }))               ← ModelFn
//!        ↓  stored under Action::Read
//! model_fn(ModelCall { vars, input })  at request time      ← one vtable dispatch
//! ```
//!
//! Read and delete functions take the URL values only. Write and make
//! functions also receive the parsed request input.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::model::{IntoReply, Reply, UrlValues};

/// A heap-allocated, type-erased future.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Arguments handed to a model function.
#[derive(Clone, Debug, Default)]
pub struct ModelCall {
    pub vars: UrlValues,
    /// Parsed request input; `None` for read and delete.
    pub input: Option<Value>,
}

/// A type-erased model function shared across concurrent requests.
pub type ModelFn = Arc<dyn Fn(ModelCall) -> BoxFuture<Result<Reply>> + Send + Sync + 'static>;

/// Implemented for every function usable as `read` or `delete`:
///
/// ```text
/// async fn name(vars: UrlValues) -> Result<impl IntoReply>
/// ```
pub trait ReadHandler: private::Sealed<private::NoInput> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_model_fn(self) -> ModelFn;
}

/// Implemented for every function usable as `write` or `make`:
///
/// ```text
/// async fn name(vars: UrlValues, input: Value) -> Result<impl IntoReply>
/// ```
pub trait InputHandler: private::Sealed<private::WithInput> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_model_fn(self) -> ModelFn;
}

/// Only the blanket impls below can satisfy the handler traits.
mod private {
    pub trait Sealed<M> {}
    pub struct NoInput;
    pub struct WithInput;
}

impl<F, Fut, R> private::Sealed<private::NoInput> for F
where
    F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> ReadHandler for F
where
    F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_model_fn(self) -> ModelFn {
        Arc::new(move |call: ModelCall| {
            let fut = (self)(call.vars);
            Box::pin(async move { fut.await.map(IntoReply::into_reply) })
        })
    }
}

impl<F, Fut, R> private::Sealed<private::WithInput> for F
where
    F: Fn(UrlValues, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> InputHandler for F
where
    F: Fn(UrlValues, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_model_fn(self) -> ModelFn {
        Arc::new(move |call: ModelCall| {
            // Write and make are only ever dispatched with input; an absent
            // body has already been parsed into an empty object.
            let fut = (self)(call.vars, call.input.unwrap_or(Value::Null));
            Box::pin(async move { fut.await.map(IntoReply::into_reply) })
        })
    }
}
