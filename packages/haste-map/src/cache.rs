//! The cache store: persists and restores a [`HasteIndex`] across builds
//! via a versioned, atomically-written file on disk.
//!
//! Format is `serde_json`: human-inspectable, which matters when a build
//! drops a stale cache and someone needs to see why. Atomicity is a
//! write-to-temp-then-rename via [`tempfile::NamedTempFile`], so a reader
//! never observes a partially written cache file.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

use crate::model::HasteIndex;

/// The on-disk envelope version. Bumped whenever [`HasteIndex`]'s shape
/// changes in a way that would make an old cache file misleading rather
/// than merely empty.
pub const CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    index: HasteIndex,
}

/// Persists and restores a [`HasteIndex`] at a deterministic path derived
/// from `(rootDir, id, roots)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStore;

impl CacheStore {
    /// Compute the deterministic cache path: `{dir}/{sanitize(id)}-{fingerprint[0:32]}`,
    /// where `sanitize` replaces every non-word character with `-` and the
    /// fingerprint is computed over `extra` (typically `rootDir` followed
    /// by the sorted `roots`).
    pub fn cache_path(dir: &Utf8Path, id: &str, extra: &[impl AsRef<str>]) -> Utf8PathBuf {
        let sanitized = sanitize(id);
        let joined: String = extra.iter().map(AsRef::as_ref).collect();
        let digest = crate::fingerprint::Fingerprint::from_bytes(joined.as_bytes()).to_string();
        let suffix = &digest[..digest.len().min(32)];
        dir.join(format!("{sanitized}-{suffix}"))
    }

    /// Load a previously persisted index. Any decode failure — missing
    /// file, corrupt content, version mismatch — returns a freshly
    /// constructed empty index rather than an error; the caller decides
    /// whether to log (this function does, at `warn` level, for anything
    /// beyond a simple missing file).
    #[instrument]
    pub async fn load(path: &Utf8Path) -> HasteIndex {
        match crate::fs::read_buffered(path.as_std_path()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<CacheEnvelope>(&bytes) {
                Ok(envelope) if envelope.version == CACHE_VERSION => {
                    trace!(%path, "loaded cache");
                    envelope.index
                }
                Ok(envelope) => {
                    warn!(%path, found = envelope.version, expected = CACHE_VERSION, "cache version mismatch, ignoring");
                    HasteIndex::empty()
                }
                Err(err) => {
                    warn!(%path, error = %err, "cache corrupt, ignoring");
                    HasteIndex::empty()
                }
            },
            Ok(None) => {
                trace!(%path, "no cache present");
                HasteIndex::empty()
            }
            Err(err) => {
                warn!(%path, error = %err, "cache unreadable, ignoring");
                HasteIndex::empty()
            }
        }
    }

    /// Persist `index` to `path`, atomically: write to a temp file in the
    /// same directory, flush, then rename over the destination so a
    /// concurrent reader never observes a partial write.
    #[instrument(skip(index))]
    pub async fn store(path: &Utf8Path, index: &HasteIndex) -> Result<()> {
        let envelope = CacheEnvelope {
            version: CACHE_VERSION,
            index: index.retain_visited(),
        };
        let bytes = serde_json::to_vec(&envelope).context("serialize cache")?;

        let dir = path
            .parent()
            .ok_or_else(|| color_eyre::eyre::eyre!("cache path has no parent: {path}"))?;
        crate::fs::create_dir_all(dir.as_std_path())
            .await
            .context("create cache directory")?;

        let path = path.to_owned();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(dir_of(&path))
                .context("create temp cache file")?;
            temp.write_all(&bytes).context("write temp cache file")?;
            temp.flush().context("flush temp cache file")?;
            temp.persist(&path).context("persist cache file")?;
            Ok(())
        })
        .await
        .context("join cache write task")??;

        trace!(%path, bytes = bytes.len(), "stored cache");
        Ok(())
    }
}

fn dir_of(path: &Utf8Path) -> &Utf8Path {
    path.parent().unwrap_or(path)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sanitize_replaces_non_word_characters() {
        assert_eq!(sanitize("my/pkg@1.0"), "my-pkg-1-0");
        assert_eq!(sanitize("plain_id"), "plain_id");
    }

    #[test]
    fn cache_path_is_deterministic() {
        let dir = Utf8Path::new("/tmp/cache");
        let a = CacheStore::cache_path(dir, "id", &["/root", "src"]);
        let b = CacheStore::cache_path(dir, "id", &["/root", "src"]);
        assert_eq!(a, b);

        let different = CacheStore::cache_path(dir, "id", &["/root", "lib"]);
        assert_ne!(a, different);
    }

    /// P6: round-trip.
    #[tokio::test]
    async fn round_trips_an_index_through_store_and_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("cache.json")).expect("utf8 path");

        let mut index = HasteIndex::empty();
        let mut meta = crate::model::FileMetaData::pristine(1, 2, None);
        meta.visited = true;
        index.files.insert(relative_path::RelativePathBuf::from("a.js"), meta);

        CacheStore::store(&path, &index).await.expect("store");
        let loaded = CacheStore::load(&path).await;

        assert_eq!(loaded.files, index.files);
    }

    /// Unvisited files never reach the persisted cache.
    #[tokio::test]
    async fn store_drops_unvisited_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("cache.json")).expect("utf8 path");

        let mut index = HasteIndex::empty();
        index.files.insert(
            relative_path::RelativePathBuf::from("unvisited.js"),
            crate::model::FileMetaData::pristine(1, 2, None),
        );

        CacheStore::store(&path, &index).await.expect("store");
        let loaded = CacheStore::load(&path).await;

        assert!(loaded.files.is_empty());
    }

    #[tokio::test]
    async fn missing_cache_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("missing.json")).expect("utf8 path");
        let loaded = CacheStore::load(&path).await;
        assert!(loaded.files.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("corrupt.json")).expect("utf8 path");
        tokio::fs::write(&path, b"not json").await.expect("write file");
        let loaded = CacheStore::load(&path).await;
        assert!(loaded.files.is_empty());
    }

    #[tokio::test]
    async fn version_mismatch_loads_as_empty() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("old.json")).expect("utf8 path");
        let stale = serde_json::json!({"version": CACHE_VERSION + 1, "index": HasteIndex::empty()});
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap())
            .await
            .expect("write file");
        let loaded = CacheStore::load(&path).await;
        assert!(loaded.files.is_empty());
    }
}
