// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use blake3::Hasher;

/// 256-bit BLAKE3 digest used for structural hashes, template keys and
/// handler keys.
pub type Hash = [u8; 32];

/// Handle of a binding owned by a [`crate::Controller`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BindingId(pub(crate) u32);

impl BindingId {
    /// Raw counter value.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for BindingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifier of one bind-or-update attempt.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    /// Raw counter value; sessions are numbered in arrival order.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifier of a scheduler batch.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BatchId(pub(crate) u32);

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "batch{}", self.0)
    }
}

/// Key of the parsed-template cache: `blake3("template:" || markup)`.
pub fn template_key(markup: &str) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"template:");
    hasher.update(markup.as_bytes());
    hasher.finalize().into()
}

/// Key of a bound event handler: `blake3("handler:" || binding || path)`.
///
/// Stable across re-renders of the same binding so re-populated markup does
/// not churn the handler attribute.
pub fn handler_key(binding: BindingId, path: &str) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(b"handler:");
    hasher.update(&binding.0.to_le_bytes());
    hasher.update(path.as_bytes());
    hasher.finalize().into()
}

/// First eight bytes of `hash` as lowercase hex, for logs.
pub fn short_hash(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_domain_separated() {
        assert_ne!(template_key("x"), handler_key(BindingId(0), "x"));
        assert_eq!(template_key("<p></p>"), template_key("<p></p>"));
        assert_ne!(handler_key(BindingId(1), "a"), handler_key(BindingId(2), "a"));
    }

    #[test]
    fn short_hash_is_sixteen_hex_chars() {
        let h = template_key("abc");
        assert_eq!(short_hash(&h).len(), 16);
    }
}
