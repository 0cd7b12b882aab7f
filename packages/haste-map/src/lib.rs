//! Library for `haste-map`.
//!
//! Builds and incrementally updates an index of a source tree: for every
//! file under a set of roots, a content fingerprint, a module identity (for
//! files that declare one), and the set of platform variants it belongs to.
//! The index is persisted between runs so that an unchanged tree costs one
//! cache read instead of a full re-crawl.
//!
//! This crate is a library only; it does not ship a binary. Callers drive a
//! [`builder::HasteMapBuilder`] from their own CLI or daemon.

pub mod builder;
pub mod cache;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod error;
pub mod ext;
pub mod fingerprint;
pub mod fs;
pub mod model;
pub mod path;
pub mod pool;
pub mod reconciler;
pub mod watch;
pub mod worker;

pub use builder::HasteMapBuilder;
pub use error::BuildError;
pub use model::HasteIndex;
