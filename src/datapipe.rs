//! Data pipes: fold a value through a list of stages.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

type Stage = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// An ordered list of transformations.
///
/// Running a pipe with stages `[f1, f2, …, fn]` on `data` computes
/// `fn(…f2(f1(data)))`, stopping at the first error. The app runs its
/// pre-processor pipe on parsed input before write and make functions see it.
///
/// ```rust
/// use rivet::DataPipe;
/// use serde_json::{Value, json};
///
/// let pipe = DataPipe::new()
///     .stage(|mut v: Value| { v["seen"] = json!(true); Ok(v) });
/// assert_eq!(pipe.run(json!({})).unwrap(), json!({"seen": true}));
/// ```
#[derive(Clone, Default)]
pub struct DataPipe {
    stages: Vec<Stage>,
}

impl DataPipe {
    pub fn new() -> Self { Self::default() }

    /// Appends a stage.
    pub fn stage<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(f);
        self
    }

    pub fn push<F>(&mut self, f: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.stages.push(Arc::new(f));
    }

    /// Appends every stage of `other`. The result is one flat pipe.
    pub fn then(mut self, other: &DataPipe) -> Self {
        self.stages.extend(other.stages.iter().cloned());
        self
    }

    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    pub fn run(&self, data: Value) -> Result<Value> {
        self.stages.iter().try_fold(data, |data, f| f(data))
    }
}

impl fmt::Debug for DataPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPipe").field("stages", &self.stages.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Error;

    fn add(n: i64) -> impl Fn(Value) -> Result<Value> + Send + Sync + 'static {
        move |v: Value| Ok(json!(v.as_i64().unwrap_or_default() + n))
    }

    #[test]
    fn folds_in_order() {
        let pipe = DataPipe::new()
            .stage(add(1))
            .stage(|v: Value| Ok(json!(v.as_i64().unwrap_or_default() * 10)));
        assert_eq!(pipe.run(json!(1)).unwrap(), json!(20));
    }

    #[test]
    fn composed_pipes_flatten() {
        let inner = DataPipe::new().stage(add(1)).stage(add(2));
        let pipe = DataPipe::new().stage(add(3)).then(&inner);
        assert_eq!(pipe.len(), 3);
        assert_eq!(pipe.run(json!(0)).unwrap(), json!(6));
    }

    #[test]
    fn stops_at_first_error() {
        let pipe = DataPipe::new()
            .stage(|_: Value| Err::<Value, _>(Error::bad_request("stop")))
            .stage(|_: Value| panic!("unreachable"));
        assert!(pipe.run(json!(null)).is_err());
        assert_eq!(DataPipe::new().run(json!("x")).unwrap(), json!("x"));
    }
}
