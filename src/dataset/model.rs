//! Data models derived from data sets and records.
//!
//! | Source | read | make | write | delete |
//! |---|---|---|---|---|
//! | [`DataSet`] | all records | | | |
//! | [`MutableDataSet`] | all records | [`add`](MutableDataSet::add) | | |
//! | [`MutableRecord`] | fields | | [`patch`](MutableRecord::patch) replacing | [`delete`](MutableRecord::delete) |
//!
//! Each source is produced per request from the URL values, so a single
//! resource can serve any record of a set.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::{DataSet, Fields, MutableDataSet, MutableRecord};
use crate::error::{Error, Result};
use crate::model::{DataModel, UrlValues};

/// Input for make and write must be an object.
pub fn into_fields(input: Value) -> Result<Fields> {
    match input {
        Value::Object(fields) => Ok(fields),
        _ => Err(Error::bad_request("Expected an object")),
    }
}

/// Read only.
pub fn readonly_set_model<F, Fut, S>(source: F) -> DataModel
where
    F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<S>>> + Send + 'static,
    S: DataSet + ?Sized + 'static,
{
    DataModel::new().read(move |vars: UrlValues| {
        let set = source(vars);
        async move { set.await?.read_all().await }
    })
}

/// Read and make.
pub fn set_model<F, Fut, S>(source: F) -> DataModel
where
    F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<S>>> + Send + 'static,
    S: MutableDataSet + ?Sized + 'static,
{
    let source = Arc::new(source);
    let for_make = Arc::clone(&source);
    DataModel::new()
        .read(move |vars: UrlValues| {
            let set = source(vars);
            async move { set.await?.read_all().await }
        })
        .make(move |vars: UrlValues, input: Value| {
            let set = for_make(vars);
            async move {
                let fields = into_fields(input)?;
                Ok(Value::Object(set.await?.add(fields).await?))
            }
        })
}

/// Read, write and delete. Write replaces the record and answers with its
/// new fields.
pub fn record_model<F, Fut, R>(source: F) -> DataModel
where
    F: Fn(UrlValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: MutableRecord + 'static,
{
    let source = Arc::new(source);
    let for_write = Arc::clone(&source);
    let for_delete = Arc::clone(&source);
    DataModel::new()
        .read(move |vars: UrlValues| {
            let record = source(vars);
            async move { Ok(Value::Object(record.await?.read().await?)) }
        })
        .write(move |vars: UrlValues, input: Value| {
            let record = for_write(vars);
            async move {
                let fields = into_fields(input)?;
                let record = record.await?;
                record.patch(fields, &[], true).await?;
                Ok(Value::Object(record.read().await?))
            }
        })
        .delete(move |vars: UrlValues| {
            let record = for_delete(vars);
            async move { record.await?.delete().await }
        })
}
