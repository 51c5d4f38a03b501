//! Bounded worker pool and the three passes that run on it
//!
//! Each file is one task: a semaphore permit bounds concurrency, the work runs
//! on tokio's blocking pool, and a per-file timeout or the run's cancellation
//! token ends the wait for it. Results come back in input order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::error::CoreError;
use crate::core::model::Edge;
use crate::core::parser::{CodeParser, SourceFile};
use crate::core::plugins::{PluginRegistry, ProjectContext};
use crate::core::resolver::{resolve_file, FileResolution, ResolveScope, SketchIndex};
use crate::core::sketch::FileSketches;
use crate::core::table::{SymbolTable, TableSnapshot};

/// How one file task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(CoreError),
    TimedOut,
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `work` once per keyed item
    pub async fn run<I, T, F>(&self, items: Vec<(String, I)>, work: F) -> Vec<(String, TaskOutcome<T>)>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();
        let total = items.len();

        for (index, (key, item)) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let path = key.clone();
            let cancel = self.cancel.clone();
            let work = Arc::clone(&work);
            let timeout = self.timeout;

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TaskOutcome::Cancelled,
                    permit = permits.acquire_owned() => match permit {
                        Err(_) => TaskOutcome::Cancelled,
                        Ok(_) if cancel.is_cancelled() => TaskOutcome::Cancelled,
                        Ok(permit) => {
                            // A timed-out file holds its permit until its thread finishes
                            let handle = tokio::task::spawn_blocking(move || {
                                let _permit = permit;
                                work(item)
                            });
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => TaskOutcome::Cancelled,
                                joined = tokio::time::timeout(timeout, handle) => match joined {
                                    Ok(Ok(Ok(value))) => TaskOutcome::Done(value),
                                    Ok(Ok(Err(e))) => TaskOutcome::Failed(CoreError::from_task(&path, e)),
                                    Ok(Err(e)) => TaskOutcome::Failed(CoreError::TaskPanicked {
                                        path,
                                        message: e.to_string(),
                                    }),
                                    Err(_) => TaskOutcome::TimedOut,
                                },
                            }
                        }
                    },
                };
                (index, key, outcome)
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Worker task aborted: {}", e),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, key, outcome)| (key, outcome))
            .collect()
    }
}

/// Pass 1: collect sketches for every source, in parallel
pub async fn collect_sources(
    pool: &WorkerPool,
    parser: &CodeParser,
    sources: Vec<SourceFile>,
) -> Vec<(String, TaskOutcome<FileSketches>)> {
    let parser = parser.clone();
    let items = sources
        .into_iter()
        .map(|source| (source.path.clone(), source))
        .collect();
    pool.run(items, move |source: SourceFile| parser.parse_file(&source))
        .await
}

/// Pass 2: resolve each file against a frozen snapshot
pub async fn resolve_files(
    pool: &WorkerPool,
    table: &Arc<SymbolTable>,
    snapshot: &Arc<TableSnapshot>,
    sketches: &Arc<SketchIndex>,
    files: Vec<Arc<FileSketches>>,
) -> Vec<(String, TaskOutcome<FileResolution>)> {
    let table = Arc::clone(table);
    let snapshot = Arc::clone(snapshot);
    let sketches = Arc::clone(sketches);
    let items = files.into_iter().map(|f| (f.path.clone(), f)).collect();

    pool.run(items, move |file: Arc<FileSketches>| {
        let scope = ResolveScope::new(&snapshot, &table, &sketches);
        Ok(resolve_file(&file, &scope))
    })
    .await
}

/// Pass 3: run the active plugins over each file
pub async fn enrich_files(
    pool: &WorkerPool,
    plugins: &Arc<PluginRegistry>,
    project: &Arc<ProjectContext>,
    table: &Arc<SymbolTable>,
    snapshot: &Arc<TableSnapshot>,
    sketches: &Arc<SketchIndex>,
    files: Vec<Arc<FileSketches>>,
) -> Vec<(String, TaskOutcome<Vec<Edge>>)> {
    let plugins = Arc::clone(plugins);
    let project = Arc::clone(project);
    let table = Arc::clone(table);
    let snapshot = Arc::clone(snapshot);
    let sketches = Arc::clone(sketches);
    let items = files.into_iter().map(|f| (f.path.clone(), f)).collect();

    pool.run(items, move |file: Arc<FileSketches>| {
        let scope = ResolveScope::new(&snapshot, &table, &sketches);
        let mut edges = Vec::new();
        for plugin in plugins.active(&project) {
            edges.extend(plugin.analyze_file(&file, &scope, &project));
        }
        Ok(edges)
    })
    .await
}
