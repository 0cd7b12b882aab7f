//! The top-level orchestrator: load cache → crawl → process → reconcile →
//! persist → emit `ready`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    cache::CacheStore,
    config::HasteMapConfig,
    crawler::{Crawler, CrawlerOptions},
    error::BuildError,
    model::HasteIndex,
    pool::{PoolOptions, ProcessorPool, Task},
    reconciler::HasteReconciler,
    watch::WatchSource,
    worker::WorkerFlags,
};

/// Single-shot orchestrator for one haste map build.
///
/// `build()` is idempotent: once a build has succeeded, subsequent calls
/// return the same resolved index without re-crawling. A failed build is
/// not memoized — the next call retries from scratch, since the design
/// gives no contract for a build whose first attempt never persisted
/// anything.
pub struct HasteMapBuilder {
    config: HasteMapConfig,
    watch_source: Arc<dyn WatchSource>,
    resolved: Mutex<Option<Arc<HasteIndex>>>,
}

impl HasteMapBuilder {
    /// Construct a builder over the given configuration and watch source.
    pub fn new(config: HasteMapConfig, watch_source: Arc<dyn WatchSource>) -> Self {
        Self {
            config,
            watch_source,
            resolved: Mutex::new(None),
        }
    }

    /// Run (or return the memoized result of) one build.
    #[instrument(skip(self), fields(id = %self.config.id))]
    pub async fn build(&self) -> Result<Arc<HasteIndex>> {
        let mut resolved = self.resolved.lock().await;
        if let Some(index) = resolved.as_ref() {
            return Ok(Arc::clone(index));
        }

        let index = self.build_once().await?;
        let index = Arc::new(index);
        *resolved = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn build_once(&self) -> Result<HasteIndex> {
        let roots = self.config.normalized_roots();
        let cache_dir = self.config.resolved_cache_directory();
        let mut extra: Vec<String> = vec![self.config.root_dir.to_string()];
        extra.extend(roots.iter().map(ToString::to_string));
        let cache_path = CacheStore::cache_path(&cache_dir, &self.config.id, &extra);

        let previous = if self.config.reset_cache {
            HasteIndex::empty()
        } else {
            CacheStore::load(&cache_path).await
        };

        let crawler = Crawler::new(self.watch_source.as_ref());
        let crawl_options = CrawlerOptions {
            root_dir: self.config.root_dir.clone(),
            roots,
            extensions: self.config.extensions.clone(),
            compute_fingerprint: self.config.compute_fingerprint,
            ignore_pattern: self.config.ignore_pattern.clone(),
        };
        let crawl = crawler.crawl(&previous, &crawl_options).await?;

        let should_persist = !crawl.changed.is_empty() || !crawl.removed.is_empty();
        if !should_persist {
            info!("no changes since last build, returning prior index");
            let mut index = previous;
            index.clocks = crawl.clocks;
            return Ok(index);
        }

        let mut index = HasteIndex {
            clocks: crawl.clocks,
            files: crawl.files,
            map: previous.map.clone(),
            duplicates: previous.duplicates.clone(),
            mocks: previous.mocks.clone(),
        };

        let reconciler = HasteReconciler;
        let full_reprocess = HasteReconciler::needs_full_reprocess(false, crawl.removed.len());
        if full_reprocess {
            reconciler.reset_for_full_reprocess(&mut index);
        }

        let removed_with_ids: std::collections::BTreeMap<_, _> = crawl
            .removed
            .iter()
            .filter_map(|path| previous.files.get(path).map(|meta| (path.clone(), meta.haste_id.clone())))
            .collect();
        reconciler.apply_removals(&mut index, &removed_with_ids);

        let to_process = reconciler.select_for_processing(&index, &crawl.changed, full_reprocess);
        let tasks = to_process
            .iter()
            .map(|path| Task {
                relative_path: path.clone(),
                fingerprint: index.files.get(path).and_then(|meta| meta.fingerprint),
            })
            .collect();

        let flags = Arc::new(WorkerFlags {
            compute_dependencies: true,
            compute_fingerprint: self.config.compute_fingerprint,
            haste_impl: self.config.haste_impl.clone(),
            dependency_extractor: self.config.dependency_extractor.clone(),
            retain_all_files: self.config.retain_all_files,
        });

        let pool = ProcessorPool::new(PoolOptions {
            max_workers: self.config.max_workers,
            force_in_band: self.config.force_in_band,
        });
        let results = pool.run(&self.config.root_dir, tasks, flags).await;

        for result in &results {
            if let Err(err) = &result.outcome {
                if let Some(build_err) = err.downcast_ref::<BuildError>() {
                    match build_err {
                        BuildError::InvalidPackageJson { .. } => return Err(color_eyre::eyre::eyre!("{build_err}")),
                        BuildError::FileUnreadable { path, code } => {
                            warn!(%path, ?code, "file unreadable, dropping from index");
                            index.files.remove(&result.relative_path);
                            continue;
                        }
                        _ => return Err(color_eyre::eyre::eyre!("{build_err}")),
                    }
                }
            }
        }

        reconciler.commit_all(&mut index, &results);
        CacheStore::store(&cache_path, &index).await?;
        info!(files = index.files.len(), "build ready");
        Ok(index)
    }

    /// The configured root directory, for callers that need it without
    /// holding on to the full configuration.
    pub fn root_dir(&self) -> &Utf8PathBuf {
        &self.config.root_dir
    }
}
