//! Deterministic hash-based symbol identity.
//!
//! [`SymbolHash`] is a 64-bit hash computed from fully qualified names, used
//! by the [`Program`](crate::Program) to answer name lookups with a single map
//! probe. Hashes are computed from names and signatures rather than arena
//! indexes, so the same symbol always hashes the same way regardless of
//! registration order.
//!
//! # Hash Computation
//!
//! Uses XXHash64 with domain-specific mixing constants so that a type, a field
//! and a method sharing a name never collide.
//!
//! # Examples
//!
//! ```
//! use contextify_core::SymbolHash;
//!
//! let holder = SymbolHash::from_type("Game.Globals");
//! let a = SymbolHash::from_method(holder, "Get", &[SymbolHash::from_type("int32")]);
//! let b = SymbolHash::from_method(holder, "Get", &[SymbolHash::from_type("string")]);
//! assert_ne!(a, b);
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Separator constant used when folding parameters.
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for field hashes
    pub const FIELD: u64 = 0x6b1f0e4c3d2a9587;

    /// Domain marker for method hashes
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Parameter position mixing constants.
    /// Each position gets its own constant so parameter order matters.
    pub const PARAM_MARKERS: [u64; 8] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
    ];
}

/// A deterministic 64-bit hash identifying a type, field or method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SymbolHash(pub u64);

impl SymbolHash {
    /// Hash of a fully qualified type name such as `Game.Globals` or
    /// `Game.Outer/Inner`.
    #[inline]
    pub fn from_type(full_name: &str) -> Self {
        SymbolHash(hash_constants::TYPE ^ xxh64(full_name.as_bytes(), 0))
    }

    /// Hash of a field, scoped by its owner type.
    #[inline]
    pub fn from_field(owner: SymbolHash, name: &str) -> Self {
        SymbolHash(hash_constants::FIELD ^ owner.0.rotate_left(7) ^ xxh64(name.as_bytes(), 0))
    }

    /// Hash of a method signature: owner, name and ordered parameter types.
    pub fn from_method(owner: SymbolHash, name: &str, params: &[SymbolHash]) -> Self {
        let mut hash = hash_constants::METHOD ^ owner.0 ^ xxh64(name.as_bytes(), 0);
        for (i, param) in params.iter().enumerate() {
            let marker = hash_constants::PARAM_MARKERS
                .get(i)
                .copied()
                .unwrap_or_else(|| hash_constants::PARAM_MARKERS[0].wrapping_add(i as u64));
            // wrapping_mul keeps the fold order-sensitive
            hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ param.0);
        }
        SymbolHash(hash)
    }
}

impl fmt::Debug for SymbolHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolHash({:#018x})", self.0)
    }
}

impl fmt::Display for SymbolHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
