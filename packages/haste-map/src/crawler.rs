//! The crawler: merges a [`crate::watch::WatchSource`] delta into the
//! previous [`HasteIndex::files`] map.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use color_eyre::Result;
use relative_path::RelativePathBuf;
use tracing::{debug, instrument, warn};

use crate::{
    clock::ClockSpec,
    error::BuildError,
    model::{FileMetaData, HasteIndex},
    watch::{QueryExpression, WatchSource},
};

/// Inputs the crawler needs beyond the previous index and the watch
/// source itself.
#[derive(Clone, Debug)]
pub struct CrawlerOptions {
    /// Absolute base path every stored path is relative to.
    pub root_dir: Utf8PathBuf,
    /// Subtrees to index, each absolute and under `root_dir`.
    pub roots: Vec<Utf8PathBuf>,
    /// File extensions to index, without the leading dot.
    pub extensions: Vec<String>,
    /// If true, fold the source's reported fingerprint (if any) into the
    /// committed metadata instead of leaving it for the file worker.
    pub compute_fingerprint: bool,
    /// Paths matching this pattern are excluded from the crawl outright,
    /// per [`crate::config::HasteMapConfig::ignore_pattern`].
    pub ignore_pattern: lazy_regex::regex::Regex,
}

/// The result of one crawl: the merged index plus the sets the reconciler
/// needs to decide what to (re)process.
#[derive(Clone, Debug)]
pub struct CrawlResult {
    /// The merged file map, ready to become the new `HasteIndex.files`.
    pub files: std::collections::BTreeMap<RelativePathBuf, FileMetaData>,
    /// Files that are new or whose content may have changed: these need a
    /// worker dispatched.
    pub changed: BTreeSet<RelativePathBuf>,
    /// Files present before this crawl and absent now.
    pub removed: BTreeSet<RelativePathBuf>,
    /// Whether any watch root reported a fresh-instance (non-incremental)
    /// response.
    pub is_fresh: bool,
    /// Updated clocks, one per watch root relative to `root_dir`.
    pub clocks: std::collections::BTreeMap<RelativePathBuf, ClockSpec>,
}

/// Crawls configured roots via a [`WatchSource`] and merges the result into
/// the previous index.
pub struct Crawler<'a> {
    source: &'a dyn WatchSource,
}

impl<'a> Crawler<'a> {
    /// Construct a crawler over the given watch source.
    pub fn new(source: &'a dyn WatchSource) -> Self {
        Self { source }
    }

    /// Run one crawl.
    ///
    /// If any root's query fails, the entire crawl fails with
    /// [`BuildError::CrawlFailed`] and no partial merge is kept.
    #[instrument(skip(self, previous))]
    pub async fn crawl(&self, previous: &HasteIndex, options: &CrawlerOptions) -> Result<CrawlResult> {
        let resolved = self.source.roots(&options.roots).await?;
        let capabilities = self.source.capabilities();

        let mut is_fresh = false;
        let mut clocks = previous.clocks.clone();
        let mut responses = Vec::new();

        for (watch_root, relative_paths) in &resolved {
            let relative_root = crate::fs::normalize_relative(&options.root_dir, watch_root)
                .unwrap_or_else(|_| RelativePathBuf::new());
            let since = clocks.get(&relative_root).cloned();
            let expression = QueryExpression {
                extensions: options.extensions.clone(),
                under: relative_paths.clone(),
                include_dotfiles: since.is_none(),
            };

            let response = self
                .source
                .query(watch_root, since.as_ref(), &expression, capabilities)
                .await
                .map_err(|cause| BuildError::CrawlFailed {
                    watch_root: watch_root.clone(),
                    cause: cause.to_string(),
                })?;

            if !response.clock.is_scm() && response.is_fresh_instance {
                is_fresh = true;
            }
            clocks.insert(relative_root.clone(), response.clock.clone().into_persisted());
            responses.push((watch_root.clone(), response));
        }

        let mut files = if is_fresh {
            std::collections::BTreeMap::new()
        } else {
            previous.files.clone()
        };
        let mut removed: BTreeSet<RelativePathBuf> = if is_fresh {
            previous.files.keys().cloned().collect()
        } else {
            BTreeSet::new()
        };
        let mut changed = BTreeSet::new();

        for (watch_root, response) in &responses {
            for file in &response.files {
                let rel_path = crate::watch::resolve_relative(
                    options.root_dir.as_std_path(),
                    watch_root.as_std_path(),
                    &file.name,
                )?;

                if options.ignore_pattern.is_match(rel_path.as_str()) {
                    if previous.files.contains_key(&rel_path) {
                        files.remove(&rel_path);
                        if !is_fresh {
                            removed.insert(rel_path);
                        }
                    }
                    continue;
                }

                if !file.exists {
                    if previous.files.contains_key(&rel_path) {
                        files.remove(&rel_path);
                    }
                    if !is_fresh {
                        removed.insert(rel_path);
                    }
                    continue;
                }

                removed.remove(&rel_path);

                let prev = previous.files.get(&rel_path);
                let mtime = crate::clock::normalize_mtime_ms(file.mtime_ms);
                let fingerprint = options.compute_fingerprint.then_some(file.fingerprint).flatten();

                let entry = match prev {
                    Some(prev) if prev.mtime_ms == mtime => prev.clone(),
                    Some(prev) if matches!((prev.fingerprint, fingerprint), (Some(a), Some(b)) if a == b) => {
                        let mut reused = prev.clone();
                        reused.mtime_ms = mtime;
                        reused
                    }
                    _ => {
                        changed.insert(rel_path.clone());
                        FileMetaData::pristine(mtime, file.size, fingerprint)
                    }
                };

                files.insert(rel_path, entry);
            }
        }

        debug!(
            files = files.len(),
            changed = changed.len(),
            removed = removed.len(),
            is_fresh,
            "crawl complete"
        );

        if !removed.is_empty() {
            warn!(count = removed.len(), "files removed since last build");
        }

        Ok(CrawlResult {
            files,
            changed,
            removed,
            is_fresh,
            clocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        fingerprint::Fingerprint,
        watch::{LocalWatchSource, WatchCapabilities, WatchedFile},
    };

    struct StaticSource {
        files: Vec<WatchedFile>,
        fresh: bool,
    }

    impl WatchSource for StaticSource {
        fn roots<'b>(
            &'b self,
            root_paths: &'b [Utf8PathBuf],
        ) -> futures::future::BoxFuture<'b, Result<Vec<(Utf8PathBuf, Vec<RelativePathBuf>)>>> {
            Box::pin(async move {
                Ok(root_paths.iter().map(|r| (r.clone(), Vec::new())).collect())
            })
        }

        fn query<'b>(
            &'b self,
            _watch_root: &'b camino::Utf8Path,
            _since: Option<&'b ClockSpec>,
            _expression: &'b QueryExpression,
            _capabilities: WatchCapabilities,
        ) -> futures::future::BoxFuture<'b, Result<crate::watch::QueryResponse>> {
            Box::pin(async move {
                Ok(crate::watch::QueryResponse {
                    clock: ClockSpec::Local("c:1".to_string()),
                    is_fresh_instance: self.fresh,
                    files: self.files.clone(),
                })
            })
        }

        fn capabilities(&self) -> WatchCapabilities {
            WatchCapabilities { suffix_set: true }
        }
    }

    fn options(root: &str) -> CrawlerOptions {
        CrawlerOptions {
            root_dir: Utf8PathBuf::from(root),
            roots: vec![Utf8PathBuf::from(root)],
            extensions: vec!["js".to_string()],
            compute_fingerprint: false,
            ignore_pattern: crate::config::default_ignore_pattern().clone(),
        }
    }

    #[tokio::test]
    async fn pristine_entries_are_marked_changed() {
        let source = StaticSource {
            files: vec![WatchedFile {
                name: RelativePathBuf::from("a.js"),
                exists: true,
                mtime_ms: 100,
                size: 10,
                fingerprint: None,
            }],
            fresh: true,
        };
        let crawler = Crawler::new(&source);
        let result = crawler
            .crawl(&HasteIndex::empty(), &options("/r"))
            .await
            .expect("crawl");

        assert!(result.changed.contains(&RelativePathBuf::from("a.js")));
        assert!(result.files.contains_key(&RelativePathBuf::from("a.js")));
    }

    #[tokio::test]
    async fn unchanged_mtime_is_reused_without_marking_changed() {
        let mut previous = HasteIndex::empty();
        previous.files.insert(
            RelativePathBuf::from("a.js"),
            FileMetaData {
                haste_id: "Foo".to_string(),
                mtime_ms: 100,
                size: 10,
                visited: true,
                dependencies: vec![],
                fingerprint: None,
            },
        );

        let source = StaticSource {
            files: vec![WatchedFile {
                name: RelativePathBuf::from("a.js"),
                exists: true,
                mtime_ms: 100,
                size: 10,
                fingerprint: None,
            }],
            fresh: false,
        };
        let crawler = Crawler::new(&source);
        let result = crawler.crawl(&previous, &options("/r")).await.expect("crawl");

        assert!(!result.changed.contains(&RelativePathBuf::from("a.js")));
        assert_eq!(
            result.files[&RelativePathBuf::from("a.js")].haste_id,
            "Foo".to_string()
        );
    }

    #[tokio::test]
    async fn fresh_instance_without_a_file_marks_it_removed() {
        let mut previous = HasteIndex::empty();
        previous.files.insert(
            RelativePathBuf::from("gone.js"),
            FileMetaData::pristine(1, 1, None),
        );

        let source = StaticSource { files: vec![], fresh: true };
        let crawler = Crawler::new(&source);
        let result = crawler.crawl(&previous, &options("/r")).await.expect("crawl");

        assert!(result.removed.contains(&RelativePathBuf::from("gone.js")));
        assert!(!result.files.contains_key(&RelativePathBuf::from("gone.js")));
    }

    #[tokio::test]
    async fn ignored_paths_are_excluded_from_the_crawl() {
        let source = StaticSource {
            files: vec![
                WatchedFile {
                    name: RelativePathBuf::from(".git/HEAD"),
                    exists: true,
                    mtime_ms: 1,
                    size: 1,
                    fingerprint: None,
                },
                WatchedFile {
                    name: RelativePathBuf::from("a.js"),
                    exists: true,
                    mtime_ms: 1,
                    size: 1,
                    fingerprint: None,
                },
            ],
            fresh: true,
        };
        let crawler = Crawler::new(&source);
        let result = crawler
            .crawl(&HasteIndex::empty(), &options("/r"))
            .await
            .expect("crawl");

        assert!(!result.files.contains_key(&RelativePathBuf::from(".git/HEAD")));
        assert!(result.files.contains_key(&RelativePathBuf::from("a.js")));
    }

    #[tokio::test]
    async fn local_watch_source_drives_a_real_crawl() {
        let dir = tempfile::tempdir().expect("create temp dir");
        tokio::fs::write(dir.path().join("a.js"), b"module.exports = 1;")
            .await
            .expect("write file");

        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf8 path");
        let source = LocalWatchSource::new();
        let crawler = Crawler::new(&source);
        let opts = CrawlerOptions {
            root_dir: root.clone(),
            roots: vec![root],
            extensions: vec!["js".to_string()],
            compute_fingerprint: true,
            ignore_pattern: crate::config::default_ignore_pattern().clone(),
        };
        let result = crawler.crawl(&HasteIndex::empty(), &opts).await.expect("crawl");

        assert_eq!(result.files.len(), 1);
        let entry = &result.files[&RelativePathBuf::from("a.js")];
        assert!(entry.fingerprint.is_some());
        assert_eq!(entry.fingerprint, Some(Fingerprint::from_bytes(b"module.exports = 1;")));
    }
}
