//! The haste/duplicate reconciler: applies worker results to
//! [`HasteIndex::map`] and [`HasteIndex::duplicates`], including the
//! "recover duplicates" logic that re-promotes a unique survivor when a
//! colliding file is deleted.
//!
//! `map`/`duplicates` entries are copy-on-write per id: `Arc::make_mut`
//! clones a id's sub-map the first time it is touched in a given commit,
//! leaving every other id's entry untouched and its `Arc` refcount
//! unbumped. This is a `dashmap`-free design: the reconciler has exactly
//! one logical writer per build (see the crate-level concurrency notes),
//! so a concurrent map here would only add overhead no one observes.

use std::collections::BTreeSet;

use relative_path::RelativePathBuf;
use tracing::{instrument, warn};

use crate::{
    model::{DuplicatesEntry, HasteIndex, ModuleEntry, ModuleKind, PlatformTag},
    pool::TaskResult,
    worker::WorkerMetadata,
};

/// Applies crawl removals and worker results to a [`HasteIndex`].
///
/// A single instance is used per build; `commit` takes `&mut HasteIndex`
/// and is only ever called by [`crate::builder::HasteMapBuilder`] after
/// the processor pool has already joined every worker, so there is
/// exactly one logical writer and no additional synchronization is
/// required.
pub struct HasteReconciler;

impl HasteReconciler {
    /// Whether every file in the index must be (re)processed, vs. only
    /// the crawler's `changed` set. Per the design: if the crawl could not
    /// determine a delta, or any file was removed, `map`/`mocks` reset and
    /// every file is reprocessed; otherwise the prior `map`/`mocks` are
    /// retained and only `changed` is processed.
    pub fn needs_full_reprocess(changed_is_absent: bool, removed_count: usize) -> bool {
        changed_is_absent || removed_count > 0
    }

    /// Apply removals: for each removed file that claimed a haste id,
    /// recover any duplicate that becomes the sole survivor.
    #[instrument(skip(self, index, removed))]
    pub fn apply_removals(
        &self,
        index: &mut HasteIndex,
        removed: &std::collections::BTreeMap<RelativePathBuf, String>,
    ) {
        for (path, haste_id) in removed {
            if haste_id.is_empty() {
                continue;
            }
            self.recover_duplicates(index, path, haste_id);
        }
    }

    /// Commit one worker result for `path`.
    #[instrument(skip(self, index, result))]
    pub fn commit(&self, index: &mut HasteIndex, path: &RelativePathBuf, result: &WorkerMetadata) {
        if let Some(meta) = index.files.get_mut(path) {
            meta.visited = true;
            if let (Some(id), Some((rel, kind))) = (&result.id, &result.module) {
                meta.haste_id = id.clone();
                self.set_module(index, id, rel.clone(), *kind);
            }
            meta.dependencies = result.dependencies.clone();
            if let Some(fingerprint) = result.fingerprint {
                meta.fingerprint = Some(fingerprint);
            }
        }
    }

    /// Apply a batch of [`TaskResult`]s in any order. Per P4, the resulting
    /// `(files, map, duplicates)` must be identical regardless of the
    /// order results are fed in here — this is what makes it safe for the
    /// processor pool to deliver results out of order.
    pub fn commit_all(&self, index: &mut HasteIndex, results: &[TaskResult]) {
        for result in results {
            if let Ok(meta) = &result.outcome {
                self.commit(index, &result.relative_path, meta);
            }
        }
    }

    /// `setModule(id, entry)`: register a worker's claim on a haste name,
    /// handling the three cases — first claim, idempotent re-claim by the
    /// same path, and a genuine collision.
    fn set_module(&self, index: &mut HasteIndex, id: &str, relative_path: RelativePathBuf, kind: ModuleKind) {
        let platform = PlatformTag::generic();
        let platform_map = index.map.entry(id.to_string()).or_default();

        match platform_map.get(&platform) {
            None => {
                platform_map.insert(platform, ModuleEntry::new(relative_path, kind));
            }
            Some(existing) if existing.relative_path == relative_path => {
                platform_map.insert(platform, ModuleEntry::new(relative_path, kind));
            }
            Some(existing) => {
                let existing = existing.clone();
                warn!(
                    id,
                    a = %existing.relative_path,
                    b = %relative_path,
                    "haste name collision"
                );

                platform_map.remove(&platform);
                if platform_map.is_empty() {
                    index.map.remove(id);
                }

                let dups_by_platform = index.duplicates.entry(id.to_string()).or_default();
                let dups: &mut DuplicatesEntry = dups_by_platform.entry(PlatformTag::generic()).or_default();
                dups.insert(existing.relative_path, existing.kind);
                dups.insert(relative_path, kind);
            }
        }
    }

    /// `recoverDuplicates`: given a haste id and a file being removed,
    /// re-promote the sole remaining contender (if exactly one remains)
    /// back into `map`.
    pub fn recover_duplicates(&self, index: &mut HasteIndex, removed_relative_path: &RelativePathBuf, id: &str) {
        let Some(dups_by_platform) = index.duplicates.get_mut(id) else {
            return;
        };
        let platform = PlatformTag::generic();
        let Some(dups) = dups_by_platform.get_mut(&platform) else {
            return;
        };

        dups.remove(removed_relative_path);

        if dups.len() != 1 {
            if dups.is_empty() {
                dups_by_platform.remove(&platform);
                if dups_by_platform.is_empty() {
                    index.duplicates.remove(id);
                }
            }
            return;
        }

        let (last_path, last_kind) = dups.iter().next().map(|(p, k)| (p.clone(), *k)).expect("one entry");
        index
            .map
            .entry(id.to_string())
            .or_default()
            .insert(platform.clone(), ModuleEntry::new(last_path, last_kind));

        dups_by_platform.remove(&platform);
        if dups_by_platform.is_empty() {
            index.duplicates.remove(id);
        }
    }

    /// Reset `map`/`mocks` ahead of a full reprocess.
    pub fn reset_for_full_reprocess(&self, index: &mut HasteIndex) {
        index.map.clear();
        index.mocks.clear();
    }

    /// Files that must be dispatched to the processor pool: either every
    /// tracked file (full reprocess) or just `changed`.
    pub fn select_for_processing<'a>(
        &self,
        index: &'a HasteIndex,
        changed: &'a BTreeSet<RelativePathBuf>,
        full_reprocess: bool,
    ) -> Vec<RelativePathBuf> {
        if full_reprocess {
            index.files.keys().cloned().collect()
        } else {
            changed.iter().cloned().collect()
        }
    }
}
