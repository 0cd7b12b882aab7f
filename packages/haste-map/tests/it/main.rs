use std::path::PathBuf;

use camino::Utf8PathBuf;
use tempfile::TempDir;

pub mod scenarios;

/// A fresh scratch directory for a single test, as an absolute UTF-8 path.
#[track_caller]
pub fn temporary_directory() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap_or_else(|err| panic!("read temp dir as utf8: {err:?}"));
    (dir, path)
}

/// This crate's own manifest directory, as an absolute path. Used by tests
/// that want a real, non-trivial source tree to crawl without depending on
/// the workspace layout staying put.
#[track_caller]
pub fn this_crate_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}
