//! Content identity for rendered build recipes.
//!
//! A fingerprint is the lowercase hexadecimal SHA-256 digest of the recipe
//! text. The same value is used as the local tag and the remote tag, so
//! comparing identities across the local image store and the registry is a
//! plain string comparison.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length in characters of a rendered fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

/// Hex digest identifying one rendered recipe.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentFingerprint {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Computes the fingerprint of `text`.
#[must_use]
pub fn fingerprint(text: &str) -> ContentFingerprint {
    let digest = Sha256::digest(text.as_bytes());
    ContentFingerprint(hex::encode(digest))
}
