//! Blob identifiers.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;

/// Number of bytes in a blob ID.
pub const ID_SIZE: usize = 32;

/// Default maximum blob size in bytes.
pub const MAX_BLOB_SIZE: usize = 1 << 16;

/// A 32-byte content address: the BLAKE3 hash of the blob's bytes.
///
/// IDs compare byte-lexicographically, which is the ordering every listing
/// and trie operation relies on. The textual form is unpadded URL-safe
/// base64.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobId([u8; ID_SIZE]);

impl BlobId {
    /// The all-zero ID. Used as the root of an empty trie reference and as a
    /// placeholder before a node has been posted.
    pub const ZERO: BlobId = BlobId([0u8; ID_SIZE]);

    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        BlobId(bytes)
    }

    /// Builds an ID from a byte slice, zero-padding on the right if the slice
    /// is short. Extra bytes are ignored.
    pub fn from_slice(slice: &[u8]) -> Self {
        let mut id = [0u8; ID_SIZE];
        let n = slice.len().min(ID_SIZE);
        id[..n].copy_from_slice(&slice[..n]);
        BlobId(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_SIZE]
    }

    /// Short hex form for log output.
    pub fn fmt_short(&self) -> String {
        let mut s = String::with_capacity(10);
        for b in &self.0[..5] {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

/// Hashes `data` into its content address.
pub fn hash(data: &[u8]) -> BlobId {
    BlobId(*blake3::hash(data).as_bytes())
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.fmt_short())
    }
}

/// Error parsing the base64 text form of a blob ID.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseIdError;

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid blob id: expected 32 bytes of unpadded url-safe base64")
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for BlobId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| ParseIdError)?;
        if bytes.len() != ID_SIZE {
            return Err(ParseIdError);
        }
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&bytes);
        Ok(BlobId(id))
    }
}
