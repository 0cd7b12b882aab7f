//! Content fingerprinting.
//!
//! A [`Fingerprint`] is a 160-bit digest of a file's bytes. It is not a
//! cryptographic commitment: the only properties it needs are "practically
//! collision-free across an ordinary source tree" and "cheap to compute",
//! which [`blake3`]'s extendable-output mode gives us without reaching for a
//! second hash crate.

use std::{fmt, path::Path, str::FromStr};

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{instrument, trace};

use crate::fs;

/// The width, in bytes, of a [`Fingerprint`]. 160 bits matches the digest
/// size Jest's haste map historically used (SHA-1), without committing this
/// crate to a second hash algorithm: blake3's XOF is truncated to the same
/// width.
pub const FINGERPRINT_BYTES: usize = 20;

/// A 160-bit content fingerprint, computed by truncating a `blake3`
/// extendable-output digest.
///
/// Fingerprints are opaque: compare them for equality, don't rely on their
/// bit pattern meaning anything beyond "probably the same bytes".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Hash the contents of the file at the specified path.
    #[instrument(name = "Fingerprint::from_file")]
    pub async fn from_file(path: impl AsRef<Path> + fmt::Debug) -> Result<Self> {
        let mut file = fs::open_file(path.as_ref()).await.context("open file")?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut bytes = 0usize;
        loop {
            let len = file.read(&mut buf).await.context("read chunk")?;
            if len == 0 {
                break;
            }
            hasher.update(&buf[..len]);
            bytes += len;
        }

        let fingerprint = Self::from_hasher(&hasher);
        trace!(path = ?path.as_ref(), %fingerprint, bytes, "fingerprinted file");
        Ok(fingerprint)
    }

    /// Hash an in-memory buffer. Used for content callers already have
    /// resident, e.g. module bodies read once to extract dependencies.
    pub fn from_bytes(content: impl AsRef<[u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(content.as_ref());
        Self::from_hasher(&hasher)
    }

    fn from_hasher(hasher: &blake3::Hasher) -> Self {
        let mut out = [0u8; FINGERPRINT_BYTES];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    /// The raw bytes of the fingerprint.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("decode fingerprint hex")?;
        let bytes: [u8; FINGERPRINT_BYTES] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            color_eyre::eyre::eyre!("expected {FINGERPRINT_BYTES} bytes, got {}", bytes.len())
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = color_eyre::eyre::Report;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_string()
    }
}
