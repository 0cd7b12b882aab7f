//! Builder configuration: every option from the external interface,
//! gathered into one `bon`-built struct, mirroring the `#[derive(Builder)]`
//! usage this codebase's lineage already applies to its own configuration
//! structs.

use std::sync::Arc;

use camino::Utf8PathBuf;
use lazy_regex::regex;
use relative_path::RelativePathBuf;

use crate::worker::{DependencyExtractor, HasteImpl};

/// The regex applied to normalized paths to decide what the crawler should
/// never even report. Matches VCS metadata directories.
pub fn default_ignore_pattern() -> &'static lazy_regex::regex::Regex {
    regex!(r"\.git/|\.hg/|\.sl/")
}

/// Builder construction options, covering every entry in the external
/// interface table.
#[derive(bon::Builder)]
#[builder(on(String, into))]
pub struct HasteMapConfig {
    /// Absolute base path; all stored paths are relative to this.
    pub root_dir: Utf8PathBuf,

    /// Subtrees to index, each absolute and under `root_dir`. Duplicates
    /// are removed preserving first-occurrence order by
    /// [`HasteMapConfig::normalized_roots`].
    #[builder(default)]
    pub roots: Vec<Utf8PathBuf>,

    /// File extensions to index, without the leading dot.
    #[builder(default)]
    pub extensions: Vec<String>,

    /// Reserved: platforms accepted and stored but not specialized on by
    /// this core.
    #[builder(default)]
    pub platforms: Vec<String>,

    /// Upper bound on parallel worker tasks. Defaults to the logical CPU
    /// count when absent.
    #[builder(default = num_cpus::get())]
    pub max_workers: usize,

    /// If true, every tracked file carries a content fingerprint.
    #[builder(default = false)]
    pub compute_fingerprint: bool,

    /// Namespace component for the cache path.
    pub id: String,

    /// Directory the cache file lives in; defaults to the OS temp
    /// directory when absent.
    pub cache_directory: Option<Utf8PathBuf>,

    /// If true, ignore any existing cache file.
    #[builder(default = false)]
    pub reset_cache: bool,

    /// Opaque reference to an externally supplied haste-name plugin.
    pub haste_impl: Option<Arc<dyn HasteImpl>>,

    /// Opaque reference to an externally supplied dependency-extraction
    /// plugin.
    pub dependency_extractor: Option<Arc<dyn DependencyExtractor>>,

    /// Regex applied to normalized paths; matching paths are never
    /// reported by the crawler. Defaults to VCS directories.
    #[builder(default = default_ignore_pattern().clone())]
    pub ignore_pattern: lazy_regex::regex::Regex,

    /// Force synchronous, in-band worker execution regardless of
    /// `max_workers`.
    #[builder(default = false)]
    pub force_in_band: bool,

    /// Retain `node_modules` files fully rather than skipping worker
    /// dispatch for them.
    #[builder(default = false)]
    pub retain_all_files: bool,
}

impl HasteMapConfig {
    /// `roots`, deduplicated, preserving first-occurrence order.
    pub fn normalized_roots(&self) -> Vec<Utf8PathBuf> {
        let mut seen = std::collections::BTreeSet::new();
        self.roots
            .iter()
            .filter(|root| seen.insert((*root).clone()))
            .cloned()
            .collect()
    }

    /// Whether `relative_path` should be ignored outright, per
    /// [`HasteMapConfig::ignore_pattern`].
    pub fn is_ignored(&self, relative_path: &RelativePathBuf) -> bool {
        self.ignore_pattern.is_match(relative_path.as_str())
    }

    /// The directory the cache file lives in, resolved to a concrete path
    /// (the configured directory, or the OS temp directory).
    pub fn resolved_cache_directory(&self) -> Utf8PathBuf {
        self.cache_directory.clone().unwrap_or_else(|| {
            Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("."))
        })
    }
}
