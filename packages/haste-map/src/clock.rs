//! The heterogeneous clock type a [`crate::watch::WatchSource`] hands back,
//! and the normalization the crawler applies to it.

use derive_more::From;
use serde::{Deserialize, Serialize};

/// An opaque point in a watch service's change log, or a source-control
/// mergebase-relative equivalent.
///
/// Persisted clocks are always [`ClockSpec::Local`]: an SCM query's
/// response clock still resolves to a plain string before being written
/// into a [`crate::model::HasteIndex`]'s [`crate::model::ClockMap`].
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize, From)]
#[serde(rename_all = "camelCase")]
pub enum ClockSpec {
    /// A plain opaque clock string from a local watch service instance.
    Local(String),
    /// A clock scoped to a source-control mergebase, portable across
    /// machines with the same history.
    Scm {
        /// The ref the mergebase was computed against.
        mergebase_with: String,
        /// The resolved mergebase revision.
        mergebase: String,
        /// The underlying watch service clock at that revision.
        clock: String,
    },
}

impl ClockSpec {
    /// The underlying string clock, regardless of variant. This is what
    /// gets persisted into a [`crate::model::HasteIndex`]'s
    /// [`crate::model::ClockMap`] (always as [`ClockSpec::Local`]).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local(clock) => clock,
            Self::Scm { clock, .. } => clock,
        }
    }

    /// Convert into the form persisted between builds: a bare local clock
    /// string, discarding any SCM provenance.
    pub fn into_persisted(self) -> Self {
        match self {
            Self::Local(clock) => Self::Local(clock),
            Self::Scm { clock, .. } => Self::Local(clock),
        }
    }

    /// Whether this clock carries SCM mergebase provenance. An SCM query
    /// suppresses the `isFreshInstance` signal for the root it was issued
    /// against (see [`crate::crawler::Crawler`]).
    pub fn is_scm(&self) -> bool {
        matches!(self, Self::Scm { .. })
    }
}

/// Normalize a millisecond timestamp that may have arrived as either a
/// plain integer or (conceptually) an object with a `toNumber()` escape
/// hatch. In this crate the boundary is `std::time::SystemTime`; see
/// [`crate::fs::mtime_to_millis`] for the conversion itself. This function
/// exists as the crawler-facing name for that same normalization step.
pub fn normalize_mtime_ms(mtime_ms: i64) -> i64 {
    mtime_ms.max(0)
}
