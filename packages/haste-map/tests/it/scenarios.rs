//! End-to-end scenarios driven through a real [`haste_map::HasteMapBuilder`]
//! over a real temporary directory tree, rather than through the unit-level
//! reconciler tests in `src/reconciler.rs`.
//!
//! Builds a fresh [`HasteMapBuilder`] per step, mirroring how a real
//! incremental consumer would call `build()` again after editing the tree
//! on disk between calls (there is no live watch in this core; one crawl
//! per `build()`).

use std::sync::Arc;

use camino::Utf8Path;
use haste_map::{
    builder::HasteMapBuilder,
    config::HasteMapConfig,
    model::PlatformTag,
    watch::LocalWatchSource,
};
use relative_path::RelativePathBuf;

use crate::temporary_directory;

fn config_for(root: &Utf8Path, cache_dir: &Utf8Path, id: &str) -> HasteMapConfig {
    HasteMapConfig::builder()
        .root_dir(root.to_owned())
        .roots(vec![root.to_owned()])
        .extensions(vec!["js".to_string(), "json".to_string()])
        .id(id)
        .cache_directory(cache_dir.to_owned())
        .build()
}

/// Reads a `@providesModule <Name>` marker comment out of the file content,
/// standing in for a real haste-name plugin without depending on filenames.
struct ProvidesModuleHasteImpl;

impl haste_map::worker::HasteImpl for ProvidesModuleHasteImpl {
    fn get_haste_name(&self, _path: &Utf8Path, content: &[u8]) -> color_eyre::Result<Option<String>> {
        let text = String::from_utf8_lossy(content);
        Ok(text
            .split("@providesModule")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string))
    }
}

fn config_with_plugin(root: &Utf8Path, cache_dir: &Utf8Path, id: &str) -> HasteMapConfig {
    HasteMapConfig::builder()
        .root_dir(root.to_owned())
        .roots(vec![root.to_owned()])
        .extensions(vec!["js".to_string()])
        .id(id)
        .cache_directory(cache_dir.to_owned())
        .haste_impl(Arc::new(ProvidesModuleHasteImpl) as Arc<dyn haste_map::worker::HasteImpl>)
        .build()
}

/// S1/S2/S3: a file claims a haste name uniquely, a second file claims the
/// same name and collides, then deleting the second file recovers the
/// original unique claim.
#[tokio::test]
async fn s1_s2_s3_collision_then_recovery_across_incremental_builds() {
    let (_root_guard, root) = temporary_directory();
    let (_cache_guard, cache_dir) = temporary_directory();

    tokio::fs::write(root.join("a.js"), b"/** @providesModule Foo */\nmodule.exports = 1;")
        .await
        .unwrap();
    tokio::fs::write(root.join("b.js"), b"module.exports = 2;").await.unwrap();

    let config = config_with_plugin(&root, &cache_dir, "s1s2s3");
    let index = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("initial build");
    assert_eq!(
        index.map["Foo"][&PlatformTag::generic()].relative_path,
        RelativePathBuf::from("a.js")
    );
    assert!(index.duplicates.is_empty());
    assert!(index.files.values().all(|f| f.visited));

    tokio::fs::write(root.join("c.js"), b"/** @providesModule Foo */\nmodule.exports = 3;")
        .await
        .unwrap();
    let config = config_with_plugin(&root, &cache_dir, "s1s2s3");
    let index = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("build after adding a colliding file");

    assert!(!index.map.contains_key("Foo"));
    let dups = &index.duplicates["Foo"][&PlatformTag::generic()];
    assert_eq!(dups.len(), 2);
    assert!(dups.contains_key(&RelativePathBuf::from("a.js")));
    assert!(dups.contains_key(&RelativePathBuf::from("c.js")));

    tokio::fs::remove_file(root.join("c.js")).await.unwrap();
    let config = config_with_plugin(&root, &cache_dir, "s1s2s3");
    let index = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("build after deleting the colliding file");

    assert_eq!(
        index.map["Foo"][&PlatformTag::generic()].relative_path,
        RelativePathBuf::from("a.js")
    );
    assert!(!index.duplicates.contains_key("Foo"));
}

/// S4: a `package.json` with a `name` field claims a package module.
#[tokio::test]
async fn s4_package_json_claims_a_package_module() {
    let (_root_guard, root) = temporary_directory();
    let (_cache_guard, cache_dir) = temporary_directory();

    tokio::fs::write(root.join("package.json"), br#"{"name":"pkg"}"#)
        .await
        .unwrap();

    let config = config_for(&root, &cache_dir, "s4");
    let builder = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()));
    let index = builder.build().await.expect("build");

    assert_eq!(
        index.map["pkg"][&PlatformTag::generic()].relative_path,
        RelativePathBuf::from("package.json")
    );
}

/// An unchanged tree across two builds should be a cheap no-op: the second
/// build returns without re-crawling claims from scratch, matching the
/// cache round-trip property (P6).
#[tokio::test]
async fn unchanged_tree_reuses_cache_across_separate_builder_instances() {
    let (_root_guard, root) = temporary_directory();
    let (_cache_guard, cache_dir) = temporary_directory();

    tokio::fs::write(root.join("a.js"), b"module.exports = 1;").await.unwrap();

    let config = config_for(&root, &cache_dir, "noop");
    let first_index = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("first build");

    let config = config_for(&root, &cache_dir, "noop");
    let second_index = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("second build");

    assert_eq!(first_index.files, second_index.files);
    assert_eq!(first_index.map, second_index.map);
}

/// Files under `node_modules` are retained but never dispatched to a
/// worker unless `retain_all_files` is set.
#[tokio::test]
async fn s5_node_modules_files_are_retained_but_not_claimed() {
    let (_root_guard, root) = temporary_directory();
    let (_cache_guard, cache_dir) = temporary_directory();

    tokio::fs::create_dir_all(root.join("node_modules/x")).await.unwrap();
    tokio::fs::write(root.join("node_modules/x/index.js"), b"module.exports = 1;")
        .await
        .unwrap();

    let config = config_for(&root, &cache_dir, "s5");
    let builder = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()));
    let index = builder.build().await.expect("build");

    let entry = &index.files[&RelativePathBuf::from("node_modules/x/index.js")];
    assert!(entry.visited);
    assert_eq!(entry.haste_id, "");
}

/// P5: incremental equivalence. A tree built up over several incremental
/// `build()` calls (including one that forces a full reprocess, via a
/// deletion) ends up in the same resolved state as building the same final
/// tree from scratch in one shot.
#[tokio::test]
async fn p5_incremental_build_matches_a_from_scratch_rebuild() {
    let (_root_guard, root) = temporary_directory();
    let (_incremental_cache_guard, incremental_cache_dir) = temporary_directory();
    let (_scratch_cache_guard, scratch_cache_dir) = temporary_directory();

    tokio::fs::write(root.join("a.js"), b"/** @providesModule Foo */\nmodule.exports = 1;")
        .await
        .unwrap();
    let config = config_with_plugin(&root, &incremental_cache_dir, "p5");
    HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("step 1: initial build");

    tokio::fs::write(root.join("b.js"), b"module.exports = 2;").await.unwrap();
    let config = config_with_plugin(&root, &incremental_cache_dir, "p5");
    HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("step 2: add a plain file");

    tokio::fs::write(root.join("c.js"), b"/** @providesModule Foo */\nmodule.exports = 3;")
        .await
        .unwrap();
    let config = config_with_plugin(&root, &incremental_cache_dir, "p5");
    HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("step 3: add a colliding file");

    tokio::fs::remove_file(root.join("c.js")).await.unwrap();
    let config = config_with_plugin(&root, &incremental_cache_dir, "p5");
    let incremental = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("step 4: remove the colliding file");

    let config = config_with_plugin(&root, &scratch_cache_dir, "p5-scratch");
    let from_scratch = HasteMapBuilder::new(config, Arc::new(LocalWatchSource::new()))
        .build()
        .await
        .expect("from-scratch build of the final tree");

    assert_eq!(incremental.files, from_scratch.files);
    assert_eq!(incremental.map, from_scratch.map);
    assert_eq!(incremental.duplicates, from_scratch.duplicates);
}
