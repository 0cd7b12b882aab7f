//! The persisted data model: [`HasteIndex`] and the value types nested
//! inside it.
//!
//! Every collection here is a `BTreeMap` rather than a hash map, so that
//! iterating `files`/`map`/`duplicates` is always in `relativePath`/id order.
//! That determinism is load-bearing: tests compare whole indexes for
//! equality regardless of the order results arrived from the worker pool.

use std::collections::BTreeMap;

use derive_more::Display;
use relative_path::RelativePathBuf;
use serde::{Deserialize, Serialize};

use crate::{clock::ClockSpec, fingerprint::Fingerprint};

/// The reserved generic platform tag. Every module this core processes is
/// recorded under this platform; per-platform specialization is parsed
/// (see [`PlatformTag`]) but never populated beyond it.
pub const GENERIC_PLATFORM: &str = "g";

/// The reserved native platform tag, kept for forward compatibility with
/// platform-specific suffix handling the core does not implement.
pub const NATIVE_PLATFORM: &str = "native";

/// A short platform discriminator, e.g. `"g"` for generic or `"ios"` for a
/// `foo.ios.js`-style suffix.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformTag(String);

impl PlatformTag {
    /// The generic platform tag, used for every module the core records.
    pub fn generic() -> Self {
        Self(GENERIC_PLATFORM.to_string())
    }

    /// The native platform tag.
    pub fn native() -> Self {
        Self(NATIVE_PLATFORM.to_string())
    }

    /// Construct an arbitrary platform tag, e.g. parsed from a filename
    /// suffix. Reserved: this core never populates a map with anything but
    /// [`PlatformTag::generic`].
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Borrow the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a [`ModuleEntry`] names a plain module file or a package root
/// (a directory's `package.json`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ModuleKind {
    /// An ordinary source file claiming a haste name.
    Module = 0,
    /// A `package.json` claiming a haste name via its `name` field.
    Package = 1,
}

impl From<ModuleKind> for u8 {
    fn from(value: ModuleKind) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for ModuleKind {
    type Error = color_eyre::eyre::Report;

    fn try_from(value: u8) -> color_eyre::Result<Self> {
        match value {
            0 => Ok(Self::Module),
            1 => Ok(Self::Package),
            other => Err(color_eyre::eyre::eyre!("invalid module kind: {other}")),
        }
    }
}

/// A single claim on a haste name: which file claims it, and what kind of
/// file it is.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// The path of the claiming file, relative to `rootDir`.
    pub relative_path: RelativePathBuf,
    /// Whether the claiming file is a module or a package root.
    pub kind: ModuleKind,
}

impl ModuleEntry {
    /// Construct a new entry.
    pub fn new(relative_path: RelativePathBuf, kind: ModuleKind) -> Self {
        Self { relative_path, kind }
    }
}

/// Per-platform module claims for a single haste id.
pub type PlatformMap = BTreeMap<PlatformTag, ModuleEntry>;

/// `hasteId -> PlatformMap`.
pub type ModuleMap = BTreeMap<String, PlatformMap>;

/// The set of contenders for a single `(hasteId, platform)` pair that lost
/// the race to claim it uniquely.
pub type DuplicatesEntry = BTreeMap<RelativePathBuf, ModuleKind>;

/// `hasteId -> platform -> DuplicatesEntry`.
pub type DuplicatesIndex = BTreeMap<String, BTreeMap<PlatformTag, DuplicatesEntry>>;

/// `relativeRoot -> ClockSpec`, one entry per watch root the builder has
/// ever crawled.
pub type ClockMap = BTreeMap<RelativePathBuf, ClockSpec>;

/// Metadata recorded for a single tracked file. Immutable once committed
/// for a given version of the file's content.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileMetaData {
    /// The haste name this file claims, or empty if it claims none.
    #[serde(default)]
    pub haste_id: String,
    /// Last-modified time, milliseconds since the Unix epoch.
    pub mtime_ms: i64,
    /// File size in bytes.
    pub size: u64,
    /// Whether this file was visited (processed or deliberately skipped)
    /// during the most recent build that touched it.
    pub visited: bool,
    /// The ordered, de-duplicated list of module specifiers this file
    /// depends on, as extracted by a [`crate::worker::DependencyExtractor`].
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The content fingerprint, present only when fingerprinting was
    /// requested and the crawl did not already supply an equivalent digest.
    pub fingerprint: Option<Fingerprint>,
}

impl FileMetaData {
    /// Construct a pristine entry: no haste name, not yet visited, no
    /// dependencies recorded. This is what the crawler emits for any file
    /// whose content may have changed and must be (re)processed.
    pub fn pristine(mtime_ms: i64, size: u64, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            haste_id: String::new(),
            mtime_ms,
            size,
            visited: false,
            dependencies: Vec::new(),
            fingerprint,
        }
    }

    /// Whether this entry currently claims a haste name.
    pub fn has_haste_id(&self) -> bool {
        !self.haste_id.is_empty()
    }
}

/// The top-level persisted artifact: everything [`crate::builder::HasteMapBuilder`]
/// produces and [`crate::cache::CacheStore`] round-trips.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct HasteIndex {
    /// The last-seen clock per watch root, relative to `rootDir`.
    #[serde(default)]
    pub clocks: ClockMap,
    /// Metadata for every tracked file, relative to `rootDir`.
    #[serde(default)]
    pub files: BTreeMap<RelativePathBuf, FileMetaData>,
    /// The haste name resolution table.
    #[serde(default)]
    pub map: ModuleMap,
    /// Unresolved haste name collisions.
    #[serde(default)]
    pub duplicates: DuplicatesIndex,
    /// Reserved: mock-module resolution table. Never populated by this
    /// core; see the open question in the design notes.
    #[serde(default)]
    pub mocks: BTreeMap<String, RelativePathBuf>,
}

impl HasteIndex {
    /// An index with no clocks, no files, nothing resolved: the starting
    /// point for a fresh build or a cache miss.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A copy of this index with every unvisited file, and every
    /// `map`/`duplicates` entry that points at one, dropped.
    ///
    /// A file is unvisited when the most recent build never finished
    /// processing it (its worker task errored and was recovered rather
    /// than committed). The cache is only authoritative for files the
    /// build actually observed; persisting an unvisited entry would let a
    /// later incremental build believe a file was already handled when it
    /// never was.
    pub fn retain_visited(&self) -> Self {
        let files: BTreeMap<RelativePathBuf, FileMetaData> = self
            .files
            .iter()
            .filter(|(_, meta)| meta.visited)
            .map(|(path, meta)| (path.clone(), meta.clone()))
            .collect();

        let map: ModuleMap = self
            .map
            .iter()
            .filter_map(|(id, platforms)| {
                let platforms: PlatformMap = platforms
                    .iter()
                    .filter(|(_, entry)| files.contains_key(&entry.relative_path))
                    .map(|(platform, entry)| (platform.clone(), entry.clone()))
                    .collect();
                (!platforms.is_empty()).then_some((id.clone(), platforms))
            })
            .collect();

        let duplicates: DuplicatesIndex = self
            .duplicates
            .iter()
            .filter_map(|(id, by_platform)| {
                let by_platform: BTreeMap<PlatformTag, DuplicatesEntry> = by_platform
                    .iter()
                    .filter_map(|(platform, entries)| {
                        let entries: DuplicatesEntry = entries
                            .iter()
                            .filter(|(path, _)| files.contains_key(*path))
                            .map(|(path, kind)| (path.clone(), *kind))
                            .collect();
                        (!entries.is_empty()).then_some((platform.clone(), entries))
                    })
                    .collect();
                (!by_platform.is_empty()).then_some((id.clone(), by_platform))
            })
            .collect();

        Self {
            clocks: self.clocks.clone(),
            files,
            map,
            duplicates,
            mocks: self.mocks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn module_kind_round_trips_through_its_wire_integer() {
        assert_eq!(u8::from(ModuleKind::Module), 0);
        assert_eq!(u8::from(ModuleKind::Package), 1);
        assert_eq!(ModuleKind::try_from(0).unwrap(), ModuleKind::Module);
        assert_eq!(ModuleKind::try_from(1).unwrap(), ModuleKind::Package);
        assert!(ModuleKind::try_from(2).is_err());
    }

    #[test]
    fn platform_tag_constants_match_the_wire_strings() {
        assert_eq!(PlatformTag::generic().as_str(), "g");
        assert_eq!(PlatformTag::native().as_str(), "native");
    }

    #[test]
    fn clock_spec_as_str_unwraps_both_variants() {
        let local = ClockSpec::Local("c:123".to_string());
        assert_eq!(local.as_str(), "c:123");
        assert!(!local.is_scm());

        let scm = ClockSpec::Scm {
            mergebase_with: "main".to_string(),
            mergebase: "abcdef".to_string(),
            clock: "c:456".to_string(),
        };
        assert_eq!(scm.as_str(), "c:456");
        assert!(scm.is_scm());
    }

    #[test]
    fn pristine_file_metadata_has_no_haste_id() {
        let meta = FileMetaData::pristine(0, 0, None);
        assert!(!meta.has_haste_id());
        assert!(!meta.visited);
        assert!(meta.dependencies.is_empty());
    }

    #[test]
    fn retain_visited_drops_unvisited_files_and_their_claims() {
        let mut index = HasteIndex::empty();
        index.files.insert(RelativePathBuf::from("a.js"), {
            let mut meta = FileMetaData::pristine(0, 0, None);
            meta.visited = true;
            meta.haste_id = "Foo".to_string();
            meta
        });
        index
            .files
            .insert(RelativePathBuf::from("b.js"), FileMetaData::pristine(0, 0, None));
        index.map.insert(
            "Foo".to_string(),
            BTreeMap::from([(
                PlatformTag::generic(),
                ModuleEntry::new(RelativePathBuf::from("a.js"), ModuleKind::Module),
            )]),
        );
        index.duplicates.insert(
            "Bar".to_string(),
            BTreeMap::from([(
                PlatformTag::generic(),
                BTreeMap::from([(RelativePathBuf::from("b.js"), ModuleKind::Module)]),
            )]),
        );

        let retained = index.retain_visited();

        assert!(retained.files.contains_key(&RelativePathBuf::from("a.js")));
        assert!(!retained.files.contains_key(&RelativePathBuf::from("b.js")));
        assert!(retained.map.contains_key("Foo"));
        assert!(!retained.duplicates.contains_key("Bar"));
    }

    #[test]
    fn empty_index_has_no_entries() {
        let index = HasteIndex::empty();
        assert!(index.files.is_empty());
        assert!(index.map.is_empty());
        assert!(index.duplicates.is_empty());
        assert!(index.clocks.is_empty());
        assert!(index.mocks.is_empty());
    }
}
