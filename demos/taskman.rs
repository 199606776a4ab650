//! Task manager over an in-memory store.
//!
//! Run with:
//!   RUST_LOG=rivet=debug cargo run --example taskman
//!
//! Try:
//!   curl -u admin:hunter2 -X POST http://localhost:5000/tasks \
//!        -H 'content-type: application/json' \
//!        -d '{"title":"ship it","priority":"2"}'
//!   curl -u admin:hunter2 http://localhost:5000/tasks
//!   curl -u admin:hunter2 http://localhost:5000/tasks/1
//!   curl -u admin:hunter2 -X DELETE http://localhost:5000/tasks/1
//!   curl http://localhost:5000/stats

use std::sync::Arc;

use rivet::dataset::MemorySet;
use rivet::tools::counter::Counter;
use rivet::tools::protector::{BasicAuth, Protector};
use rivet::tools::validator::{Converter, Validator};
use rivet::{App, Error, Resource, Server, Settings, UrlValues};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;
    let mut app = App::with_settings(&settings)?;
    let store = MemorySet::new();

    let records = store.clone();
    let task = app.route(
        Resource::new("task").lazy_record(move |vars: UrlValues| {
            let records = records.clone();
            async move { Ok::<_, Error>(records.record(vars.parse("id")?)) }
        }),
        "/tasks/{id}",
    )?;
    let tasks = app.route(
        task.collection("tasks").include_urls(true).lazy_set(move |_: UrlValues| {
            let set = Arc::new(store.clone());
            async move { Ok::<_, Error>(set) }
        }),
        "/tasks",
    )?;

    let counter = Counter::new(None);
    counter.attach_to(&mut app);
    let hits = counter.clone();
    app.route(
        Resource::new("stats").read(move |_: UrlValues| {
            let total = hits.hits(None).len();
            async move { Ok::<_, Error>(json!({ "hits": total })) }
        }),
        "/stats",
    )?;

    let validator = Validator::new();
    for resource in [&task, &tasks] {
        validator
            .enforce(resource, "title", Converter::spec("string(maxlength=120)")?)
            .enforce(resource, "priority", Converter::spec("int(min=1, max=5)")?)
            .restrict(resource, &["*title", "priority", "done"], false);
    }
    validator.attach_to(&mut app);

    let protector = Protector::new(BasicAuth::new("taskman", |user, password| {
        user == "admin" && password == "hunter2"
    }));
    protector.guard(&task, &["tasks"])?.guard(&tasks, &["tasks"])?;
    protector.attach_to(&mut app);

    info!(resources = app.resources().len(), "taskman ready");
    Server::from_settings(&settings)?.serve(app).await?;
    Ok(())
}
