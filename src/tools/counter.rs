//! Hit counting.
//!
//! A [`Counter`] logs a hit for every request it sees, per resource, and
//! fires callbacks when hit counts reach given marks. Hits can be split into
//! groups by *partitions*: named functions of the request, such as the
//! caller's address or the request method.
//!
//! ```rust
//! use rivet::App;
//! use rivet::tools::counter::{Counter, Group, Trigger};
//!
//! # fn demo() -> rivet::Result<()> {
//! let mut app = App::new();
//! let counter = Counter::new(None);
//! counter.partition("method", |req| req.method().to_string());
//! counter.every(100, Trigger::new().group("method", Group::Any), |groups| {
//!     tracing::info!(?groups, "another hundred");
//!     Ok(())
//! })?;
//! counter.attach_to(&mut app);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::app::App;
use crate::context::{ContextHook, RequestContext};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::resource::Resource;

/// Partition name to the request's value for it.
pub type Partitions = BTreeMap<String, String>;

type PartitionFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;
type CallbackFn = Arc<dyn Fn(&Partitions) -> Result<()> + Send + Sync>;
type StoreFn = Arc<dyn Fn(Option<TimeDelta>) -> Arc<dyn HitLog> + Send + Sync>;

// ── Hit logs ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
    pub time: DateTime<Utc>,
    pub partitions: Partitions,
}

/// Storage for one resource's hits.
///
/// A log given a duration forgets hits older than that.
pub trait HitLog: Send + Sync {
    fn track(&self, partitions: Partitions);

    /// Hits whose partitions include every entry of `spec`. An empty spec
    /// counts every hit.
    fn count(&self, spec: &Partitions) -> usize;

    /// Every hit, oldest first.
    fn hits(&self) -> Vec<Hit>;
}

type CountKey = Vec<(String, String)>;

#[derive(Default)]
struct LogState {
    hits: VecDeque<Hit>,
    counts: HashMap<CountKey, usize>,
}

/// An in-memory [`HitLog`].
///
/// Counts are indexed by every subset of each hit's partitions, so counting
/// is a lookup.
#[derive(Default)]
pub struct MemoryHitLog {
    duration: Option<TimeDelta>,
    state: Mutex<LogState>,
}

impl MemoryHitLog {
    pub fn new(duration: Option<TimeDelta>) -> Self {
        Self { duration, state: Mutex::default() }
    }

    fn prune(&self, state: &mut LogState) {
        let Some(duration) = self.duration else { return };
        let now = Utc::now();
        while state.hits.front().is_some_and(|hit| now - hit.time > duration) {
            let Some(hit) = state.hits.pop_front() else { break };
            for key in count_keys(&hit.partitions) {
                if let Some(n) = state.counts.get_mut(&key) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        state.counts.remove(&key);
                    }
                }
            }
        }
    }
}

/// Every non-empty subset of `partitions`, each sorted by name.
fn count_keys(partitions: &Partitions) -> Vec<CountKey> {
    let entries: Vec<(&String, &String)> = partitions.iter().collect();
    (1..1usize << entries.len())
        .map(|mask| {
            entries
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, (k, v))| ((*k).clone(), (*v).clone()))
                .collect()
        })
        .collect()
}

impl HitLog for MemoryHitLog {
    fn track(&self, partitions: Partitions) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for key in count_keys(&partitions) {
            *state.counts.entry(key).or_default() += 1;
        }
        state.hits.push_back(Hit { time: Utc::now(), partitions });
    }

    fn count(&self, spec: &Partitions) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut state);
        if spec.is_empty() {
            return state.hits.len();
        }
        let key: CountKey = spec.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        state.counts.get(&key).copied().unwrap_or(0)
    }

    fn hits(&self) -> Vec<Hit> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut state);
        state.hits.iter().cloned().collect()
    }
}

/// A read-only view over one or more hit logs.
pub struct Hits {
    logs: Vec<Arc<dyn HitLog>>,
}

impl Hits {
    pub fn count(&self, spec: &Partitions) -> usize {
        self.logs.iter().map(|log| log.count(spec)).sum()
    }

    pub fn len(&self) -> usize { self.count(&Partitions::new()) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Every hit, oldest first.
    pub fn to_vec(&self) -> Vec<Hit> {
        let mut hits: Vec<Hit> = self.logs.iter().flat_map(|log| log.hits()).collect();
        hits.sort_by_key(|hit| hit.time);
        hits
    }
}

impl fmt::Debug for Hits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hits({})", self.len())
    }
}

// ── Triggers ──────────────────────────────────────────────────────────────────

/// Which requests of a partition a callback listens to.
#[derive(Clone, Debug, PartialEq)]
pub enum Group {
    /// Requests with this value for the partition.
    Is(String),
    /// Every request, counted separately per value of the partition.
    Any,
}

/// When a callback fires.
///
/// By default a callback counts hits to every resource, from the first hit
/// on and without limit.
#[derive(Clone, Debug, Default)]
pub struct Trigger {
    resource: Option<String>,
    after: Option<usize>,
    until: Option<usize>,
    groups: BTreeMap<String, Group>,
}

impl Trigger {
    pub fn new() -> Self { Self::default() }

    /// Counts hits to `resource` only.
    pub fn resource(mut self, resource: &Resource) -> Self {
        self.resource = Some(resource.name().to_owned());
        self
    }

    /// Ignores the first `n` hits.
    pub fn after(mut self, n: usize) -> Self {
        self.after = Some(n);
        self
    }

    /// Stops firing once more than `n` hits were counted.
    pub fn until(mut self, n: usize) -> Self {
        self.until = Some(n);
        self
    }

    /// Counts hits per value of the partition `name`.
    pub fn group(mut self, name: impl Into<String>, group: Group) -> Self {
        self.groups.insert(name.into(), group);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum When {
    Before,
    After,
}

struct Callback {
    when: When,
    every: usize,
    trigger: Trigger,
    f: CallbackFn,
}

// ── Counter ───────────────────────────────────────────────────────────────────

/// Counts hits and fires callbacks on them.
///
/// Cloning a counter gives another handle to the same logs and callbacks.
#[derive(Clone)]
pub struct Counter {
    duration: Option<TimeDelta>,
    store: StoreFn,
    logs: Arc<Mutex<BTreeMap<String, Arc<dyn HitLog>>>>,
    partitioners: Arc<RwLock<BTreeMap<String, PartitionFn>>>,
    callbacks: Arc<RwLock<Vec<Arc<Callback>>>>,
}

impl Default for Counter {
    fn default() -> Self { Self::new(None) }
}

impl Counter {
    /// A counter remembering hits for `duration`, or forever with `None`.
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            duration: duration.and_then(|d| TimeDelta::from_std(d).ok()),
            store: Arc::new(|duration: Option<TimeDelta>| -> Arc<dyn HitLog> {
                Arc::new(MemoryHitLog::new(duration))
            }),
            logs: Arc::default(),
            partitioners: Arc::default(),
            callbacks: Arc::default(),
        }
    }

    /// Stores hits in logs made by `store` instead of in memory.
    pub fn with_store<F>(mut self, store: F) -> Self
    where
        F: Fn(Option<TimeDelta>) -> Arc<dyn HitLog> + Send + Sync + 'static,
    {
        self.store = Arc::new(store);
        self
    }

    /// Counts every request `app` handles.
    pub fn attach_to(&self, app: &mut App) {
        app.context(self.clone());
    }

    /// Adds a partition: `f` maps each request to its group.
    pub fn partition<F>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.partitioners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(f));
        self
    }

    /// Calls `callback` on every `n`th hit, before the request is handled.
    /// An error from the callback fails the request.
    ///
    /// The callback receives the request's values for the trigger's
    /// partitions.
    pub fn every<F>(&self, n: usize, trigger: Trigger, callback: F) -> Result<&Self>
    where
        F: Fn(&Partitions) -> Result<()> + Send + Sync + 'static,
    {
        self.register(When::Before, n, trigger, Arc::new(callback))
    }

    /// Like [`every`](Self::every), after the request is handled. Errors
    /// are logged.
    pub fn after_every<F>(&self, n: usize, trigger: Trigger, callback: F) -> Result<&Self>
    where
        F: Fn(&Partitions) -> Result<()> + Send + Sync + 'static,
    {
        self.register(When::After, n, trigger, Arc::new(callback))
    }

    /// Calls `callback` once, on the `n`th hit, before the request is
    /// handled.
    pub fn at<F>(&self, n: usize, trigger: Trigger, callback: F) -> Result<&Self>
    where
        F: Fn(&Partitions) -> Result<()> + Send + Sync + 'static,
    {
        self.every(1, trigger.after(n.saturating_sub(1)).until(n), callback)
    }

    /// Calls `callback` once, on the `n`th hit, after the request is handled.
    pub fn after<F>(&self, n: usize, trigger: Trigger, callback: F) -> Result<&Self>
    where
        F: Fn(&Partitions) -> Result<()> + Send + Sync + 'static,
    {
        self.after_every(1, trigger.after(n.saturating_sub(1)).until(n), callback)
    }

    fn register(&self, when: When, every: usize, trigger: Trigger, f: CallbackFn) -> Result<&Self> {
        if every == 0 {
            return Err(Error::InvalidSpecification("callbacks fire every n hits, with n > 0".to_owned()));
        }
        let partitioners = self.partitioners.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(unknown) = trigger.groups.keys().find(|p| !partitioners.contains_key(*p)) {
            return Err(Error::InvalidSpecification(format!("unknown partition `{unknown}`")));
        }
        drop(partitioners);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Callback { when, every, trigger, f }));
        Ok(self)
    }

    /// The hits to `resource`, or to every resource with `None`.
    pub fn hits(&self, resource: Option<&Resource>) -> Hits {
        let logs = match resource {
            Some(r) => vec![self.log(r.name())],
            None => self.logs.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect(),
        };
        Hits { logs }
    }

    fn log(&self, resource: &str) -> Arc<dyn HitLog> {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(logs.entry(resource.to_owned()).or_insert_with(|| (self.store)(self.duration)))
    }

    fn partitions(&self, request: &Request) -> Partitions {
        self.partitioners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, f)| (name.clone(), f(request)))
            .collect()
    }

    fn fire(&self, when: When, resource: &str, partitions: &Partitions) -> Result<()> {
        let callbacks: Vec<Arc<Callback>> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|cb| cb.when == when && cb.trigger.resource.as_deref().is_none_or(|r| r == resource))
            .cloned()
            .collect();

        for cb in callbacks {
            let matches = cb.trigger.groups.iter().all(|(name, group)| match group {
                Group::Any => true,
                Group::Is(value) => partitions.get(name) == Some(value),
            });
            if !matches {
                continue;
            }

            let values: Partitions = cb
                .trigger
                .groups
                .keys()
                .filter_map(|name| partitions.get(name).map(|v| (name.clone(), v.clone())))
                .collect();
            let count = match cb.trigger.resource {
                Some(_) => self.log(resource).count(&values),
                None => self.hits(None).count(&values),
            };

            if cb.trigger.until.is_some_and(|until| until < count) {
                continue;
            }
            let after = cb.trigger.after.unwrap_or(0);
            if count <= after {
                continue;
            }
            if (count - after - 1) % cb.every == 0 {
                (cb.f)(&values)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContextHook for Counter {
    async fn enter(&self, ctx: &RequestContext) -> Result<()> {
        let resource = ctx.resource().name();
        let partitions = self.partitions(ctx.request());
        self.log(resource).track(partitions.clone());
        self.fire(When::Before, resource, &partitions)
    }

    async fn exit(&self, ctx: &RequestContext) -> Result<()> {
        let resource = ctx.resource().name();
        let partitions = self.partitions(ctx.request());
        if let Err(e) = self.fire(When::After, resource, &partitions) {
            warn!(resource, error = %e, "counter callback failed");
        }
        Ok(())
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("duration", &self.duration)
            .field("logs", &self.logs.lock().unwrap_or_else(PoisonError::into_inner).keys().collect::<Vec<_>>())
            .finish()
    }
}
