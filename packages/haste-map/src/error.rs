//! The builder's error taxonomy.
//!
//! Fallible functions throughout this crate return `color_eyre::Result`, the
//! same convention used elsewhere in this codebase's lineage. [`BuildError`]
//! is the subset of failures a caller might want to branch on; it implements
//! `std::error::Error` by hand (no `thiserror`) and is attached to the
//! `eyre::Report` chain, so callers that don't care can just propagate with
//! `?` and callers that do care can `report.downcast_ref::<BuildError>()`.
//!
//! `CollisionWarning` is deliberately not a variant here: per the design,
//! a name collision is a diagnostic, not an error, and is only ever
//! surfaced via a `tracing::warn!` event plus the `duplicates` side table.

use std::fmt;

use relative_path::RelativePathBuf;

/// Errors a caller of [`crate::builder::HasteMapBuilder`] may need to
/// branch on.
#[derive(Debug)]
pub enum BuildError {
    /// The persisted cache file could not be decoded. This is always
    /// recovered internally (treated as an empty index); it is exposed here
    /// only so a caller inspecting a build's diagnostics can tell the
    /// difference between "cold cache" and "warm cache".
    CacheUnreadable {
        /// The cache file that could not be read.
        path: camino::Utf8PathBuf,
    },
    /// A [`crate::watch::WatchSource`] query failed. The entire crawl fails
    /// with this error; no partial merge is kept and no cache is written.
    CrawlFailed {
        /// The watch root whose query failed.
        watch_root: camino::Utf8PathBuf,
        /// The underlying cause.
        cause: String,
    },
    /// A `package.json` could not be parsed as an object. This halts the
    /// build; unlike most per-file faults, it is not recovered.
    InvalidPackageJson {
        /// The path to the unparsable `package.json`.
        path: RelativePathBuf,
    },
    /// A tracked file could not be read for a reason other than "it
    /// disappeared" or "permission denied" (those two are recovered by
    /// dropping the file from `files` with a warning).
    FileUnreadable {
        /// The file that could not be read.
        path: RelativePathBuf,
        /// The underlying I/O error code, if available.
        code: Option<i32>,
    },
    /// A [`crate::worker::HasteImpl`] or [`crate::worker::DependencyExtractor`]
    /// plugin failed.
    PluginFailure {
        /// Which plugin failed.
        plugin: &'static str,
        /// The underlying cause.
        cause: String,
    },
    /// The build was cancelled. No cache is written for a cancelled build.
    Cancelled,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheUnreadable { path } => write!(f, "cache file unreadable: {path}"),
            Self::CrawlFailed { watch_root, cause } => {
                write!(f, "crawl failed for watch root {watch_root}: {cause}")
            }
            Self::InvalidPackageJson { path } => {
                write!(f, "invalid package.json: {path}")
            }
            Self::FileUnreadable { path, code } => match code {
                Some(code) => write!(f, "file unreadable: {path} (errno {code})"),
                None => write!(f, "file unreadable: {path}"),
            },
            Self::PluginFailure { plugin, cause } => {
                write!(f, "plugin {plugin} failed: {cause}")
            }
            Self::Cancelled => write!(f, "build cancelled"),
        }
    }
}

impl std::error::Error for BuildError {}
