//! Stable identifiers and content digests
//!
//! ID Format:
//! - Task IDs: `{kind-tag}-{16-char-hash}` (e.g., `render_page-3f2a9c1b7d4e6a08`)
//! - Digests: 64 lowercase hex characters (blake3, 32 bytes)
//!
//! The task hash is derived from the kind tag plus the logical identity parts
//! (canonical path, tag name, page number, variant parameters). It never
//! includes content, so an unchanged content model yields unchanged ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters kept from the identity hash
pub const TASK_HASH_LEN: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid task ID format: expected '{{kind-tag}}-{{16-char-hash}}', got '{0}'")]
    InvalidTaskId(String),

    #[error("Invalid digest: expected 32 bytes, got {0}")]
    InvalidDigestLength(usize),

    #[error("Invalid digest hex: {0}")]
    InvalidDigestHex(String),
}

/// Length-prefixed blake3 hashing
///
/// Every variable-length field is written as `u64 length || bytes`, so
/// adjacent fields can never be confused (`"ab","c"` vs `"a","bc"`).
pub struct StableHasher {
    inner: blake3::Hasher,
}

impl StableHasher {
    /// Creates a hasher bound to a domain-separation label
    pub fn new(domain: &str) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.u64(value.len() as u64);
        self.inner.update(value.as_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.inner.update(&[u8::from(value)]);
        self
    }

    pub fn digest(&mut self, value: &Digest) -> &mut Self {
        self.inner.update(value.as_bytes());
        self
    }

    /// Hashes an optional value with a presence marker
    pub fn opt_i64(&mut self, value: Option<i64>) -> &mut Self {
        match value {
            Some(v) => self.bool(true).i64(v),
            None => self.bool(false),
        }
    }

    pub fn opt_str(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => self.bool(true).str(v),
            None => self.bool(false),
        }
    }

    pub fn finish(&self) -> Digest {
        Digest(*self.inner.finalize().as_bytes())
    }
}

/// A 32-byte blake3 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; 32]);

impl Digest {
    /// Hashes raw bytes (file contents, serialized config fragments)
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Builds a digest from a stored blob, rejecting wrong lengths
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdError::InvalidDigestLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex characters, used for cache-busting file names
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdError::InvalidDigestHex(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| IdError::InvalidDigestHex(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Digest {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

/// Task ID in the format `{kind-tag}-{16-char-hash}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId {
    /// Snake-case kind tag (e.g., `render_page`, `img_scale`)
    tag: String,
    /// Truncated identity hash
    hash: String,
}

impl TaskId {
    /// Derives a task ID from a kind tag and the logical identity parts
    pub fn new(tag: &str, parts: &[&str]) -> Self {
        let mut hasher = StableHasher::new("stbl.task-id.v1");
        hasher.str(tag).u64(parts.len() as u64);
        for part in parts {
            hasher.str(part);
        }
        let hex = hasher.finish().to_hex();
        Self {
            tag: tag.to_string(),
            hash: hex[..TASK_HASH_LEN].to_string(),
        }
    }

    /// Returns the kind tag portion of the ID
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the hash portion of the ID
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.tag, self.hash)
    }
}

impl FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (tag, hash) = s
            .rsplit_once('-')
            .ok_or_else(|| IdError::InvalidTaskId(s.to_string()))?;

        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(IdError::InvalidTaskId(s.to_string()));
        }

        if hash.len() != TASK_HASH_LEN
            || !hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(IdError::InvalidTaskId(s.to_string()));
        }

        Ok(Self {
            tag: tag.to_string(),
            hash: hash.to_string(),
        })
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}
