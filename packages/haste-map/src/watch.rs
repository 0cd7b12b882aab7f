//! The `WatchSource` capability: the crawler's only dependency on an actual
//! filesystem-watch daemon.
//!
//! The core never interprets a daemon's wire protocol directly. An
//! implementation wrapping a real daemon (e.g. one speaking the Watchman
//! protocol) can be dropped in behind this trait without the crawler
//! changing at all. [`LocalWatchSource`] is the reference adapter: instead
//! of awaiting a daemon socket, it performs a full-tree walk every time and
//! always reports itself a fresh instance, which is a faithful (if
//! watch-free) implementation of the same contract.

use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{Result, eyre::Context};
use futures::future::BoxFuture;
use relative_path::RelativePathBuf;

use crate::{clock::ClockSpec, fingerprint::Fingerprint, fs};

/// A single file entry in a [`QueryResponse`].
#[derive(Clone, Debug)]
pub struct WatchedFile {
    /// The file's path, relative to the watch root that produced it.
    pub name: RelativePathBuf,
    /// Whether the file still exists. `false` means it was removed since
    /// the clock the query was issued against.
    pub exists: bool,
    /// Last-modified time, milliseconds since the Unix epoch.
    pub mtime_ms: i64,
    /// File size in bytes.
    pub size: u64,
    /// A content fingerprint, present only if the query requested it and
    /// the source can supply it without a separate read.
    pub fingerprint: Option<Fingerprint>,
}

/// The reply to a [`WatchSource::query`] call.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    /// The clock to persist for this watch root, to be used as `since` on
    /// the next incremental query.
    pub clock: ClockSpec,
    /// Whether this response should be treated as a full snapshot rather
    /// than a delta: the watch service's history was reset (or this is the
    /// very first query against this root).
    pub is_fresh_instance: bool,
    /// The files matching the query.
    pub files: Vec<WatchedFile>,
}

/// What a watch source can do without the core constructing a fallback
/// query shape. `suffix_set` means the source accepts a single `["suffix",
/// [ext...]]` term rather than needing `["anyof", ["suffix", ext1], ...]`
/// spelled out one extension at a time; the two forms are required to be
/// semantically identical, so which one the core builds is purely a
/// negotiation with the source, never a behavior change.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct WatchCapabilities {
    /// Whether the source accepts a combined suffix-set expression term.
    pub suffix_set: bool,
}

/// The expression the crawler asks a [`WatchSource`] to match files
/// against. The core builds one of two equivalent forms depending on
/// [`WatchCapabilities::suffix_set`]; this type captures the inputs to that
/// decision, not the daemon-specific wire encoding.
#[derive(Clone, Debug)]
pub struct QueryExpression {
    /// File extensions to match, without the leading dot.
    pub extensions: Vec<String>,
    /// Directory prefixes (relative to the watch root) to constrain the
    /// match to; empty means the whole tree.
    pub under: Vec<RelativePathBuf>,
    /// Whether to include dotfiles. The crawler sets this to `true` only
    /// when no `since` clock is supplied (a full, not incremental, query).
    pub include_dotfiles: bool,
}

/// The capability the crawler depends on to learn what changed in a
/// source tree.
pub trait WatchSource: Send + Sync {
    /// For each requested root, return the `(watchRoot, relativePaths)`
    /// pairs the source will track. A watch root that has ever been
    /// returned with an empty relative path is "watched whole"; further
    /// relative-path requests under it are ignored by the caller.
    fn roots<'a>(
        &'a self,
        root_paths: &'a [Utf8PathBuf],
    ) -> BoxFuture<'a, Result<Vec<(Utf8PathBuf, Vec<RelativePathBuf>)>>>;

    /// Query files under `watch_root` matching `expression`. `since`, when
    /// present, restricts the reply to changes after that clock.
    fn query<'a>(
        &'a self,
        watch_root: &'a Utf8Path,
        since: Option<&'a ClockSpec>,
        expression: &'a QueryExpression,
        capabilities: WatchCapabilities,
    ) -> BoxFuture<'a, Result<QueryResponse>>;

    /// The capabilities this source advertises. Used to pick the query
    /// expression shape and whether a content fingerprint can be requested
    /// directly from the source instead of computed by the file worker.
    fn capabilities(&self) -> WatchCapabilities;
}

/// The reference [`WatchSource`]: a plain recursive directory walk,
/// performed fresh on every query. Used when no real watch daemon is
/// available, mirroring the crawl-the-node-way fallback a real haste map
/// implementation takes when its preferred watch service is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalWatchSource;

impl LocalWatchSource {
    /// Construct a new local watch source.
    pub fn new() -> Self {
        Self
    }
}

impl WatchSource for LocalWatchSource {
    fn roots<'a>(
        &'a self,
        root_paths: &'a [Utf8PathBuf],
    ) -> BoxFuture<'a, Result<Vec<(Utf8PathBuf, Vec<RelativePathBuf>)>>> {
        Box::pin(async move {
            Ok(root_paths
                .iter()
                .map(|root| (root.clone(), Vec::new()))
                .collect())
        })
    }

    fn query<'a>(
        &'a self,
        watch_root: &'a Utf8Path,
        _since: Option<&'a ClockSpec>,
        expression: &'a QueryExpression,
        _capabilities: WatchCapabilities,
    ) -> BoxFuture<'a, Result<QueryResponse>> {
        Box::pin(async move {
            let index = fs::Index::recursive(watch_root.as_std_path())
                .await
                .with_context(|| format!("crawl watch root {watch_root}"))?;

            let files = index
                .files
                .into_iter()
                .filter(|(path, _)| matches_expression(path.as_ref(), expression))
                .map(|(path, entry)| WatchedFile {
                    name: path,
                    exists: true,
                    mtime_ms: entry.mtime_ms,
                    size: entry.size,
                    fingerprint: Some(entry.fingerprint),
                })
                .collect();

            Ok(QueryResponse {
                clock: ClockSpec::Local(local_instance_clock(watch_root)),
                is_fresh_instance: true,
                files,
            })
        })
    }

    fn capabilities(&self) -> WatchCapabilities {
        WatchCapabilities { suffix_set: true }
    }
}

fn is_dotfile_component(component: relative_path::Component<'_>) -> bool {
    match component {
        relative_path::Component::Normal(name) => name.starts_with('.'),
        _ => false,
    }
}

fn matches_expression(path: &relative_path::RelativePath, expression: &QueryExpression) -> bool {
    let has_ext = expression.extensions.is_empty()
        || path
            .extension()
            .is_some_and(|ext| expression.extensions.iter().any(|e| e == ext));
    if !has_ext {
        return false;
    }
    if !expression.include_dotfiles && path.components().any(is_dotfile_component) {
        return false;
    }
    expression.under.is_empty()
        || expression
            .under
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

/// Since the local source has no real persistent history, its clock is
/// just a marker: every query is a fresh, full snapshot, so the exact
/// string value is never consulted for incremental semantics. We still
/// derive it from the watch root so distinct roots don't collide if a
/// caller inspects clocks for debugging.
fn local_instance_clock(watch_root: &Utf8Path) -> String {
    format!("local-instance:{watch_root}")
}

#[allow(dead_code)]
fn _assert_object_safe(_: &dyn WatchSource) {}

/// Helper used by [`crate::crawler::Crawler`] to make a path relative to a
/// watch root's relative-path base.
pub fn resolve_relative(root: &Path, watch_root: &Path, name: &relative_path::RelativePath) -> Result<RelativePathBuf> {
    let absolute = watch_root.join(name.to_path(""));
    fs::normalize_relative(root, absolute)
}
