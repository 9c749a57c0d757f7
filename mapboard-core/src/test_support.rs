//! Test doubles for the coordinator seams, used by unit and behaviour tests.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    ClientError, ClientFactory, ProjectClient, ProjectKey, ProjectParams, ProjectResolver,
    RebuildError, ResolveError, TopologyRebuild,
};

/// Parameters for `schema` in `database`, following the naming the
/// project tooling uses.
#[must_use]
pub fn project_params(database: &str, schema: &str) -> ProjectParams {
    ProjectParams::new(database, schema, format!("{schema}_topology"), 4326, 1e-5)
}

/// Drive `future` to completion on a fresh current-thread runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
pub fn block_on_for_tests<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("failed to build test runtime: {err}"));
    runtime.block_on(future)
}

/// In-memory project registry.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    projects: HashMap<String, ProjectParams>,
    slugs: HashMap<String, String>,
    lookups: AtomicUsize,
}

impl MemoryResolver {
    /// Register `params` under `slug`.
    #[must_use]
    pub fn with_project(mut self, slug: &str, params: ProjectParams) -> Self {
        self.slugs.insert(slug.to_owned(), params.data_schema.clone());
        self.projects.insert(params.data_schema.clone(), params);
        self
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectResolver for MemoryResolver {
    async fn resolve(&self, key: &ProjectKey) -> Result<ProjectParams, ResolveError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let data_schema = match key {
            ProjectKey::DataSchema(schema) => Some(schema),
            ProjectKey::Slug(slug) => self.slugs.get(slug),
        };
        data_schema
            .and_then(|schema| self.projects.get(schema))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound { key: key.clone() })
    }
}

/// Builds handles pointing at a local, credential-free URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticClientFactory;

impl ClientFactory for StaticClientFactory {
    fn build(&self, params: ProjectParams) -> Result<ProjectClient, ClientError> {
        let url = format!("postgresql://localhost/{}", params.database);
        Ok(ProjectClient::new(url, params))
    }
}

/// Rebuild routine that records its calls and tracks concurrency.
#[derive(Debug, Default)]
pub struct RecordingRebuild {
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
}

impl RecordingRebuild {
    /// Sleep for `delay` in every call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep for `delay` when rebuilding `schema`.
    #[must_use]
    pub fn with_schema_delay(mut self, schema: &str, delay: Duration) -> Self {
        self.delays.insert(schema.to_owned(), delay);
        self
    }

    /// Fail every rebuild of `schema`.
    #[must_use]
    pub fn failing_for(mut self, schema: &str) -> Self {
        self.failing.insert(schema.to_owned());
        self
    }

    /// Panic in every rebuild of `schema`.
    #[must_use]
    pub fn panicking_for(mut self, schema: &str) -> Self {
        self.panicking.insert(schema.to_owned());
        self
    }

    /// Schemas rebuilt so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls made for `schema`.
    #[must_use]
    pub fn calls_for(&self, schema: &str) -> usize {
        self.calls().iter().filter(|call| *call == schema).count()
    }

    /// Highest number of calls observed running at once.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

fn simulated_panic(schema: &str) -> ! {
    panic!("simulated panic while rebuilding {schema}");
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TopologyRebuild for RecordingRebuild {
    fn rebuild(&self, client: &ProjectClient) -> Result<(), RebuildError> {
        let schema = client.data_schema().to_owned();
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveCall(&self.active);
        self.max_active.fetch_max(running, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(schema.clone());

        let delay = self.delays.get(&schema).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.panicking.contains(&schema) {
            simulated_panic(&schema);
        }
        if self.failing.contains(&schema) {
            return Err(RebuildError::Failed {
                schema,
                reason: "simulated failure".to_owned(),
            });
        }
        Ok(())
    }
}
