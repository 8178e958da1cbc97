//! Cache identity derivation.
//!
//! A [`ContentKey`] identifies one cached artifact. Two kinds of keys exist:
//!
//! - a *sized* key derived from (locator, width, height), identifying one
//!   decoded rendition in the memory tier;
//! - a *source* key derived from the locator alone, identifying the original
//!   encoded bytes in the disk tier. All renditions of one locator share the
//!   same source key, so a single network fetch serves every requested size.

use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash algorithm selection for key derivation.
///
/// `Fallback` is a deterministic 64-bit hash with reduced collision
/// resistance. It exists so that keys stay derivable when a full
/// cryptographic digest is not wanted; it is not a correctness failure mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyMode {
    /// SHA-256 digest, hex encoded (64 characters).
    #[default]
    Sha256,
    /// `DefaultHasher` over the same input, hex encoded (16 characters).
    Fallback,
}

/// Derived cache identity for a (locator, width, height) triple or for a
/// bare locator.
///
/// Identical inputs always produce identical keys; distinct size requests
/// for the same locator are distinct keys. The string form contains only
/// lowercase hex digits and is safe to use as a file name or journal token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive the sized key for a locator at a target resolution.
    pub fn derive(locator: &str, width: u32, height: u32) -> Self {
        Self::derive_with(KeyMode::Sha256, locator, width, height)
    }

    /// Derive the sized key using an explicit hash mode.
    pub fn derive_with(mode: KeyMode, locator: &str, width: u32, height: u32) -> Self {
        let input = format!("{}{}{}", locator, width, height);
        Self(hash_input(mode, &input))
    }

    /// Derive the source key for a locator (no size component).
    pub fn source(locator: &str) -> Self {
        Self::source_with(KeyMode::Sha256, locator)
    }

    /// Derive the source key using an explicit hash mode.
    pub fn source_with(mode: KeyMode, locator: &str) -> Self {
        Self(hash_input(mode, locator))
    }

    /// The hex string form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_input(mode: KeyMode, input: &str) -> String {
    match mode {
        KeyMode::Sha256 => {
            let mut digest = Sha256::new();
            digest.update(input.as_bytes());
            let bytes = digest.finalize();
            let mut out = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                out.push_str(&format!("{:02x}", byte));
            }
            out
        }
        KeyMode::Fallback => {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            input.hash(&mut hasher);
            format!("{:016x}", hasher.finish())
        }
    }
}
