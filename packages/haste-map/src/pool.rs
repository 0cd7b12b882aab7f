//! The processor pool: dispatches [`crate::worker::process`] across a
//! bounded parallel pool over the changed-file set, gathering results with
//! backpressure.
//!
//! Built on `rayon`'s thread pool with results handed back over a bounded
//! `flume` channel, the same shape [`crate::fs::Index::recursive_sync`]
//! uses for its own directory walk. `concurrency <= 1` (or
//! [`PoolOptions::force_in_band`]) degrades to calling the worker directly
//! on the orchestrating thread with no pool at all — the ordering
//! difference is observable only by timing, never by the committed result.

use std::sync::Arc;

use camino::Utf8Path;
use color_eyre::Result;
use futures::StreamExt;
use relative_path::RelativePathBuf;
use tokio::runtime::Handle;
use tracing::{instrument, trace};

use crate::worker::{self, WorkerFlags, WorkerMetadata};

/// Configuration for one [`ProcessorPool::run`] call.
#[derive(Clone)]
pub struct PoolOptions {
    /// Upper bound on parallel worker tasks. Values `<= 1` force in-band
    /// execution regardless of [`PoolOptions::force_in_band`].
    pub max_workers: usize,
    /// Force synchronous, in-band execution even if `max_workers > 1`.
    /// Useful for tests that want deterministic completion order.
    pub force_in_band: bool,
}

impl PoolOptions {
    fn effective_in_band(&self) -> bool {
        self.force_in_band || self.max_workers <= 1
    }
}

/// One task: a single changed file plus the flags to process it with.
#[derive(Clone)]
pub struct Task {
    /// The file's path, relative to `root_dir`.
    pub relative_path: RelativePathBuf,
    /// A fingerprint the crawler already has for this file, if any — the
    /// worker reuses it instead of re-hashing.
    pub fingerprint: Option<crate::fingerprint::Fingerprint>,
}

/// One task's outcome.
pub struct TaskResult {
    /// Which file this result is for.
    pub relative_path: RelativePathBuf,
    /// The worker's outcome: metadata, or the error it failed with.
    pub outcome: Result<WorkerMetadata>,
}

/// Dispatches [`worker::process`] across a bounded pool.
pub struct ProcessorPool {
    options: PoolOptions,
}

impl ProcessorPool {
    /// Construct a pool with the given options.
    pub fn new(options: PoolOptions) -> Self {
        Self { options }
    }

    /// Run every task, returning results as a `Vec` once all have
    /// completed. Results carry no ordering guarantee relative to `tasks`;
    /// the reconciler must be commutative with respect to application
    /// order, which is exactly what makes this acceptable.
    #[instrument(skip(self, tasks, flags), fields(tasks = tasks.len(), max_workers = self.options.max_workers))]
    pub async fn run(
        &self,
        root_dir: &Utf8Path,
        tasks: Vec<Task>,
        flags: Arc<WorkerFlags>,
    ) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        if self.options.effective_in_band() {
            trace!("running processor pool in-band");
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                let outcome =
                    worker::process(root_dir, &task.relative_path, &flags, task.fingerprint).await;
                results.push(TaskResult {
                    relative_path: task.relative_path,
                    outcome,
                });
            }
            return results;
        }

        trace!("running processor pool across worker threads");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_workers)
            .build()
            .expect("build rayon thread pool");

        let (tx, rx) = flume::bounded::<TaskResult>(tasks.len());
        let runtime = Handle::current();
        let root_dir = root_dir.to_owned();

        pool.spawn(move || {
            use rayon::iter::{IntoParallelIterator, ParallelIterator};

            tasks.into_par_iter().for_each(|task| {
                let _guard = runtime.enter();
                let outcome = runtime.block_on(worker::process(
                    &root_dir,
                    &task.relative_path,
                    &flags,
                    task.fingerprint,
                ));
                let result = TaskResult {
                    relative_path: task.relative_path,
                    outcome,
                };
                // The receiver is held by the awaiting caller below and is
                // never dropped before every task finishes.
                let _ = tx.send(result);
            });
        });

        rx.into_stream()
            .collect::<Vec<_>>()
            .await
    }
}
