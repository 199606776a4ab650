//! Data sets: collections of records a resource can be backed by.
//!
//! A [`DataSet`] yields the fields of its records; views such as
//! [`DataSet::filtered`], [`DataSet::limit`] and [`DataSet::sorted`] wrap a
//! set without touching the backend until the view itself is read.
//! [`MutableDataSet`] adds records and hands out [`MutableRecord`] handles.
//!
//! Resources derive their data model from a data set through
//! [`Resource::lazy_set`](crate::Resource::lazy_set) and friends; see
//! [`model`] for the mapping.

mod memory;
pub mod model;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

pub use memory::{MemoryRecord, MemorySet};

/// The fields of one record.
pub type Fields = serde_json::Map<String, Value>;

fn no_match() -> Error {
    Error::Lookup("No matching item found.".to_owned())
}

// ── Filter ────────────────────────────────────────────────────────────────────

type Predicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

#[derive(Clone)]
enum Condition {
    Eq(Value),
    Pred(Predicate),
}

/// A search specification: every condition must hold for a record to match.
///
/// ```rust
/// use rivet::dataset::Filter;
/// use serde_json::json;
///
/// let adults_named_ann = Filter::new()
///     .eq("name", "Ann")
///     .matches("age", |age| age.and_then(|a| a.as_u64()).is_some_and(|a| a >= 18));
/// assert!(adults_named_ann.check(json!({"name": "Ann", "age": 30}).as_object().unwrap()));
/// ```
#[derive(Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self { Self::default() }

    /// The field must equal `value`. A missing field never matches.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_owned(), Condition::Eq(value.into())));
        self
    }

    /// The field must satisfy `pred`, which sees `None` when the record
    /// lacks the field.
    pub fn matches<F>(mut self, field: &str, pred: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.conditions.push((field.to_owned(), Condition::Pred(Arc::new(pred))));
        self
    }

    pub fn check(&self, record: &Fields) -> bool {
        self.conditions.iter().all(|(field, cond)| {
            let value = record.get(field);
            match cond {
                Condition::Eq(expected) => value == Some(expected),
                Condition::Pred(pred) => pred(value),
            }
        })
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (field, cond) in &self.conditions {
            match cond {
                Condition::Eq(v) => map.entry(field, v),
                Condition::Pred(_) => map.entry(field, &"<predicate>"),
            };
        }
        map.finish()
    }
}

// ── Sorting ───────────────────────────────────────────────────────────────────

/// How a sorted view orders its records.
#[derive(Clone)]
pub enum SortSpec {
    /// Compare field by field. A record missing a field sorts after every
    /// record that has it.
    Fields(Vec<String>),
    /// Compare the values a key function computes for each record.
    Key(Arc<dyn Fn(&Fields) -> Value + Send + Sync>),
}

impl SortSpec {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(fields.into_iter().map(Into::into).collect())
    }

    pub fn key<F>(f: F) -> Self
    where
        F: Fn(&Fields) -> Value + Send + Sync + 'static,
    {
        Self::Key(Arc::new(f))
    }

    fn compare(&self, a: &Fields, b: &Fields) -> Ordering {
        match self {
            Self::Key(key) => compare_values(&key(a), &key(b)),
            Self::Fields(fields) => fields
                .iter()
                .map(|f| match (a.get(f), b.get(f)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Debug for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Self::Key(_) => f.write_str("Key(<fn>)"),
        }
    }
}

/// Total order over JSON values: null, booleans, numbers, strings, arrays,
/// objects. Values of the same type compare naturally.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// A collection of records.
#[async_trait]
pub trait DataSet: Send + Sync {
    /// The fields of every record, in the set's order.
    async fn records(&self) -> Result<Vec<Fields>>;

    /// The first record matching `filter`, or [`Error::Lookup`].
    async fn fetch(&self, filter: &Filter) -> Result<Fields> {
        self.records()
            .await?
            .into_iter()
            .find(|r| filter.check(r))
            .ok_or_else(no_match)
    }

    /// Every record as a JSON array of objects.
    async fn read_all(&self) -> Result<Value> {
        Ok(Value::Array(self.records().await?.into_iter().map(Value::Object).collect()))
    }

    fn filtered(self, filter: Filter) -> Filtered<Self>
    where
        Self: Sized,
    {
        Filtered { inner: self, filter }
    }

    /// At most `count` records, skipping the first `offset`.
    fn limit(self, count: usize, offset: usize) -> Slice<Self>
    where
        Self: Sized,
    {
        Slice { inner: self, count, offset }
    }

    /// Records in order. Sorting is stable, in both directions.
    fn sorted(self, spec: SortSpec, descending: bool) -> Ordered<Self>
    where
        Self: Sized,
    {
        Ordered { inner: self, spec, descending }
    }
}

/// A data set that can grow.
#[async_trait]
pub trait MutableDataSet: DataSet {
    /// Adds a record and returns the fields that identify it, e.g.
    /// `{"id": 4}`. Collections use these to build the `Location` of the
    /// new member.
    async fn add(&self, fields: Fields) -> Result<Fields>;

    /// A handle on the first record matching `filter`.
    async fn fetch_mut(&self, filter: &Filter) -> Result<Box<dyn MutableRecord>>;
}

/// A single item of a data set.
#[async_trait]
pub trait Record: Send + Sync {
    async fn read(&self) -> Result<Fields>;
}

/// A record that can change or remove itself.
#[async_trait]
pub trait MutableRecord: Record {
    /// Sets the fields in `add` and drops those named in `remove`. With
    /// `replace`, every existing field is dropped first.
    async fn patch(&self, add: Fields, remove: &[String], replace: bool) -> Result<()>;

    async fn delete(&self) -> Result<()>;

    async fn update(&self, fields: Fields) -> Result<()> {
        self.patch(fields, &[], false).await
    }

    async fn set_field(&self, name: &str, value: Value) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert(name.to_owned(), value);
        self.patch(fields, &[], false).await
    }

    async fn remove_field(&self, name: &str) -> Result<()> {
        self.patch(Fields::new(), &[name.to_owned()], false).await
    }
}

/// A fixed record.
#[async_trait]
impl Record for Fields {
    async fn read(&self) -> Result<Fields> {
        Ok(self.clone())
    }
}

#[async_trait]
impl<T: DataSet + ?Sized> DataSet for Arc<T> {
    async fn records(&self) -> Result<Vec<Fields>> {
        (**self).records().await
    }
}

#[async_trait]
impl<T: MutableDataSet + ?Sized> MutableDataSet for Arc<T> {
    async fn add(&self, fields: Fields) -> Result<Fields> {
        (**self).add(fields).await
    }

    async fn fetch_mut(&self, filter: &Filter) -> Result<Box<dyn MutableRecord>> {
        (**self).fetch_mut(filter).await
    }
}

#[async_trait]
impl<T: Record + ?Sized> Record for Box<T> {
    async fn read(&self) -> Result<Fields> {
        (**self).read().await
    }
}

#[async_trait]
impl<T: MutableRecord + ?Sized> MutableRecord for Box<T> {
    async fn patch(&self, add: Fields, remove: &[String], replace: bool) -> Result<()> {
        (**self).patch(add, remove, replace).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// See [`DataSet::filtered`].
#[derive(Debug)]
pub struct Filtered<S> {
    inner: S,
    filter: Filter,
}

#[async_trait]
impl<S: DataSet> DataSet for Filtered<S> {
    async fn records(&self) -> Result<Vec<Fields>> {
        let mut records = self.inner.records().await?;
        records.retain(|r| self.filter.check(r));
        Ok(records)
    }
}

/// See [`DataSet::limit`].
#[derive(Debug)]
pub struct Slice<S> {
    inner: S,
    count: usize,
    offset: usize,
}

#[async_trait]
impl<S: DataSet> DataSet for Slice<S> {
    async fn records(&self) -> Result<Vec<Fields>> {
        Ok(self
            .inner
            .records()
            .await?
            .into_iter()
            .skip(self.offset)
            .take(self.count)
            .collect())
    }
}

/// See [`DataSet::sorted`].
#[derive(Debug)]
pub struct Ordered<S> {
    inner: S,
    spec: SortSpec,
    descending: bool,
}

#[async_trait]
impl<S: DataSet> DataSet for Ordered<S> {
    async fn records(&self) -> Result<Vec<Fields>> {
        let mut records = self.inner.records().await?;
        if self.descending {
            records.sort_by(|a, b| self.spec.compare(b, a));
        } else {
            records.sort_by(|a, b| self.spec.compare(a, b));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct People(Vec<Fields>);

    #[async_trait]
    impl DataSet for People {
        async fn records(&self) -> Result<Vec<Fields>> {
            Ok(self.0.clone())
        }
    }

    fn people() -> People {
        let rows = [
            (1, "Te-jé Rodgers", 25),
            (2, "John Smith", 34),
            (3, "Terrance Riverdarb", 16),
            (4, "Anna Harris", 74),
            (5, "Jen Brathwaithe", 32),
            (6, "Glen Posner", 52),
            (7, "Harriet Peters", 21),
            (8, "Anthony Simm", 32),
        ];
        People(
            rows.into_iter()
                .map(|(id, name, age)| {
                    json!({"id": id, "name": name, "age": age})
                        .as_object()
                        .cloned()
                        .unwrap_or_default()
                })
                .collect(),
        )
    }

    async fn ids(set: impl DataSet) -> Vec<i64> {
        set.records()
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn fetch_returns_first_match() {
        let set = people();
        let ann = set.fetch(&Filter::new().eq("id", 3)).await.unwrap();
        assert_eq!(ann["name"], "Terrance Riverdarb");

        let over_30 = Filter::new().matches("age", |a| a.and_then(Value::as_i64).is_some_and(|a| a > 30));
        assert_eq!(set.fetch(&over_30).await.unwrap()["id"], 2);

        let err = set.fetch(&Filter::new().eq("name", "Glen")).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[tokio::test]
    async fn filtered_view() {
        assert_eq!(ids(people().filtered(Filter::new().eq("age", 32))).await, vec![5, 8]);
        assert!(ids(people().filtered(Filter::new().eq("age", 40))).await.is_empty());
        let t_names = Filter::new().matches("name", |n| n.and_then(Value::as_str).is_some_and(|n| n.starts_with('T')));
        assert_eq!(ids(people().filtered(t_names)).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn limit_with_offset() {
        assert_eq!(ids(people().limit(4, 0)).await, vec![1, 2, 3, 4]);
        assert_eq!(ids(people().limit(4, 2)).await, vec![3, 4, 5, 6]);
        assert_eq!(ids(people().limit(100, 0)).await.len(), 8);
    }

    #[tokio::test]
    async fn sorted_by_fields() {
        assert_eq!(
            ids(people().sorted(SortSpec::fields(["name"]), false)).await,
            vec![4, 8, 6, 7, 5, 2, 1, 3]
        );
        assert_eq!(
            ids(people().sorted(SortSpec::fields(["age"]), true)).await,
            vec![4, 6, 2, 5, 8, 1, 7, 3]
        );
        assert_eq!(
            ids(people().sorted(SortSpec::fields(["age", "name"]), false)).await,
            vec![3, 7, 1, 8, 5, 2, 6, 4]
        );
    }

    #[tokio::test]
    async fn sorted_by_key() {
        let by_neg_id = SortSpec::key(|r| json!(-r["id"].as_i64().unwrap_or_default()));
        assert_eq!(ids(people().sorted(by_neg_id, false)).await, vec![8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn missing_fields_sort_last() {
        let mut set = people();
        set.0[0].remove("age");
        let sorted = ids(set.sorted(SortSpec::fields(["age"]), false)).await;
        assert_eq!(sorted.last(), Some(&1));
    }
}
