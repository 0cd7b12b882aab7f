//! Filesystem operations tailored to `haste-map`.
//!
//! Inside this module, we refer to `std::fs` or `tokio::fs` by its fully
//! qualified path to make it maximally clear what we are using.

use std::{
    collections::BTreeMap,
    fmt::Debug as StdDebug,
    path::{Path, PathBuf},
    time::SystemTime,
};

use camino::Utf8PathBuf;
use color_eyre::{Result, eyre::Context};
use derive_more::Debug;
use rayon::iter::{ParallelBridge, ParallelIterator};
use relative_path::RelativePathBuf;
use tap::{Pipe, Tap, TapFallible, TryConv};
use tokio::{fs::File, runtime::Handle, task::spawn_blocking};
use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

use crate::{ext::then_context, fingerprint::Fingerprint};

/// A full recursive scan of a directory, used by [`crate::watch::LocalWatchSource`]
/// (and directly by tests/benches) as the non-daemon stand-in for "ask a
/// filesystem-watch service for everything".
#[derive(Clone, Debug)]
pub struct Index {
    /// The root directory of the index.
    #[allow(dead_code)]
    pub root: Utf8PathBuf,

    /// Stores the index. Keys relative to `root`.
    #[debug("{}", files.len())]
    pub files: BTreeMap<RelativePathBuf, IndexEntry>,
}

impl Index {
    /// Index the provided path recursively.
    #[instrument(name = "Index::recursive")]
    pub async fn recursive(root: impl AsRef<Path> + StdDebug) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        spawn_blocking(move || Self::recursive_sync(root))
            .await
            .context("join task")?
    }

    /// Index the provided path recursively, blocking the current thread.
    #[instrument(name = "Index::recursive_sync")]
    fn recursive_sync(root: impl AsRef<Path> + StdDebug) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let root = Utf8PathBuf::try_from(root).context("path as utf8")?;

        // The `rayon` instance runs in its own threadpool, but its overall
        // operation is still blocking, so we run it in a background thread
        // that just waits for rayon to complete.
        let (tx, rx) = flume::bounded::<(RelativePathBuf, IndexEntry)>(0);
        let runtime = Handle::current();
        let walker = std::thread::spawn({
            let root = root.clone();
            let runtime = runtime.clone();
            move || {
                WalkDir::new(&root).into_iter().par_bridge().try_for_each(
                    move |entry| -> Result<()> {
                        let _guard = runtime.enter();
                        let entry = entry.context("walk files")?;
                        let path = entry.path();
                        if !entry.file_type().is_file() {
                            trace!(?path, "skipped entry: not a file");
                            return Ok(());
                        }

                        trace!(?path, "walked entry");
                        let path = path
                            .strip_prefix(&root)
                            .with_context(|| format!("make {path:?} relative to {root:?}"))?
                            .to_path_buf()
                            .pipe(RelativePathBuf::from_path)
                            .context("read path as utf8")?;
                        let entry = runtime
                            .block_on(IndexEntry::from_file(entry.path()))
                            .context("index entry")?;

                        // Only errors if the channel receivers have been
                        // dropped, which should never happen but we'll
                        // handle it just in case.
                        tx.send((path, entry)).context("send entry to main thread")
                    },
                )
            }
        });

        // When the directory walk finishes, the senders all drop.
        // This causes the receiver channel to close, terminating the
        // iterator.
        let files = rx
            .into_iter()
            .inspect(|(path, entry)| trace!(?path, ?entry, "indexed file"))
            .collect();

        // Joining a fallible operation from a background thread has two
        // levels of errors: the thread could have panicked, or the
        // operation could have completed fallibly. The `expect` call here
        // is for the former case: if the thread panics, a broken invariant
        // or partially corrupt state is the only reasonable explanation.
        walker
            .join()
            .expect("join thread")
            .context("walk directory")?;

        debug!("indexed directory");
        Ok(Self { root, files })
    }
}

/// An entry for a file that was indexed in [`Index`].
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct IndexEntry {
    /// The fingerprint of the file's contents.
    pub fingerprint: Fingerprint,

    /// The last-modified time of the file, in milliseconds since the epoch.
    pub mtime_ms: i64,

    /// The size of the file, in bytes.
    pub size: u64,
}

impl IndexEntry {
    /// Construct the entry from the provided file on disk.
    #[instrument(name = "IndexEntry::from_file")]
    pub async fn from_file(path: impl AsRef<Path> + StdDebug) -> Result<Self> {
        let path = path.as_ref();
        let (fingerprint, meta) = tokio::try_join!(
            Fingerprint::from_file(path).then_context("hash file"),
            tokio::fs::metadata(path).then_context("stat file"),
        )?;
        Ok(Self {
            fingerprint,
            mtime_ms: mtime_to_millis(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            size: meta.len(),
        })
    }
}

/// Convert a [`SystemTime`] into milliseconds since the Unix epoch, saturating
/// to `0` for times before the epoch. This is the boundary at which the
/// heterogeneous "number or object with `toNumber()`" representation a
/// watch daemon might use is normalized into a single 64-bit integer.
pub fn mtime_to_millis(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Determine the canonical cache directory for the current user, if possible.
///
/// This can fail if the user has no home directory, or if the home
/// directory cannot be accessed.
#[instrument]
pub async fn user_global_cache_dir() -> Result<Utf8PathBuf> {
    homedir::my_home()
        .context("get user home directory")?
        .ok_or_else(|| color_eyre::eyre::eyre!("user has no home directory"))?
        .try_conv::<Utf8PathBuf>()
        .context("user home directory is not utf8")?
        .join(".cache")
        .join("haste-map")
        .tap(|dir| trace!(?dir, "read user global cache dir"))
        .pipe(Ok)
}

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: impl AsRef<Path> + StdDebug) -> Result<()> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .tap_ok(|_| trace!(?dir, "create directory"))
}

/// Buffer the file content from disk.
#[instrument]
pub async fn read_buffered(path: impl AsRef<Path> + StdDebug) -> Result<Option<Vec<u8>>> {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Write the provided file content to disk, creating parent directories as
/// needed. Used by [`crate::cache::CacheStore`] to persist the index.
#[instrument(skip(content))]
pub async fn write(path: impl AsRef<Path> + StdDebug, content: impl AsRef<[u8]>) -> Result<()> {
    let (path, content) = (path.as_ref(), content.as_ref());
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .await
            .context("create parent directory")?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("write file: {path:?}"))
        .tap_ok(|_| trace!(?path, bytes = content.len(), "write file"))
}

/// Open a file for reading.
#[instrument]
pub async fn open_file(path: impl AsRef<Path> + StdDebug) -> Result<File> {
    let path = path.as_ref();
    File::open(path)
        .await
        .with_context(|| format!("open file: {path:?}"))
        .tap_ok(|_| trace!(?path, "open file"))
}

/// Get the metadata for a file, if it exists.
pub async fn metadata(path: impl AsRef<Path> + StdDebug) -> Result<Option<std::fs::Metadata>> {
    let path = path.as_ref();
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            trace!(?path, ?metadata, "read metadata");
            Ok(Some(metadata))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("stat file: {path:?}")),
    }
}

/// Report whether a path exists and is a regular file.
///
/// Never errors; any I/O failure (including "not found") reports `false`,
/// matching [`crate::path::TypedPath::exists`]'s race-prone-by-nature
/// contract.
pub async fn is_file(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path.as_ref())
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Report whether a path exists and is a directory.
pub async fn is_dir(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path.as_ref())
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Remove the directory and all its contents. A no-op if it does not exist.
pub async fn remove_dir_all(path: impl AsRef<Path> + StdDebug) -> Result<()> {
    let path = path.as_ref();
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            trace!(?path, "removed directory");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!(?path, "removed directory (already removed)");
            Ok(())
        }
        Err(err) => Err(err).context(format!("remove directory: {path:?}")),
    }
}

/// Normalize a path's separators to the host convention and make it
/// `/`-delimited internally, matching the `PathNorm` component of the
/// design: callers hand us whatever `std::path::Path` gives them (which
/// varies by platform) and get back a stable, comparable relative path.
pub fn normalize_relative(base: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<RelativePathBuf> {
    let (base, path) = (base.as_ref(), path.as_ref());
    let stripped = path
        .strip_prefix(base)
        .with_context(|| format!("make {path:?} relative to {base:?}"))?;
    RelativePathBuf::from_path(stripped).context("read path as utf8")
}
