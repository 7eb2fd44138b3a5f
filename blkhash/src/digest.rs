//! Digest primitives (spec.md §4.1).
//!
//! `Primitive` names the supported hash functions; `Scratch` is the
//! per-worker/per-stream hasher state dispatched over that fixed set. We
//! use a closed enum rather than `Box<dyn digest::DynDigest>` (contrast
//! `other_examples/…pwinckles-rocfl__src-ocfl-digest.rs.rs`'s
//! `DigestAlgorithm`): the set of primitives is fixed at compile time, so
//! enum dispatch avoids both the allocation and the `dyn` indirection on
//! every block.

use digest::Digest;
use strum_macros::{Display, EnumIter, EnumString};

/// One of the hash functions `blkhash` can use as the per-block and
/// stream/root primitive (spec.md §4.1).
///
/// `Null` is synthetic: it accepts any input and always yields a
/// zero-length digest, which makes the whole engine short-circuit to an
/// empty-string root (I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display)]
pub enum Primitive {
    #[strum(serialize = "sha1")]
    Sha1,
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha512-256", serialize = "sha512/256")]
    Sha512_256,
    #[strum(serialize = "sha3-256")]
    Sha3_256,
    #[strum(serialize = "blake2b512", serialize = "blake2b-512")]
    Blake2b512,
    #[strum(serialize = "blake3")]
    Blake3,
    #[strum(serialize = "null")]
    Null,
}

impl Default for Primitive {
    fn default() -> Self {
        Primitive::Sha256
    }
}

impl Primitive {
    /// Look up a primitive by its CLI/API name, failing with
    /// `Error::UnknownDigest` rather than `strum`'s parse error so callers
    /// get the spec.md §7 error kind directly.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        name.parse()
            .map_err(|_| crate::Error::UnknownDigest(name.to_string()))
    }

    /// Whether this primitive is the synthetic passthrough (I5/P7).
    pub fn is_null(&self) -> bool {
        matches!(self, Primitive::Null)
    }

    /// Construct a fresh hasher state for this primitive.
    pub fn new_scratch(&self) -> Scratch {
        match self {
            Primitive::Sha1 => Scratch::Sha1(sha1::Sha1::new()),
            Primitive::Sha256 => Scratch::Sha256(sha2::Sha256::new()),
            Primitive::Sha512_256 => Scratch::Sha512_256(sha2::Sha512_256::new()),
            Primitive::Sha3_256 => Scratch::Sha3_256(sha3::Sha3_256::new()),
            Primitive::Blake2b512 => Scratch::Blake2b512(blake2::Blake2b512::new()),
            Primitive::Blake3 => Scratch::Blake3(Box::new(blake3::Hasher::new())),
            Primitive::Null => Scratch::Null,
        }
    }

    /// All primitives known to this build, in declaration order. Used by
    /// `--list-digests` in the CLI.
    pub fn all() -> impl Iterator<Item = Primitive> {
        use strum::IntoEnumIterator;
        Primitive::iter()
    }
}

/// Hasher state for one in-progress incremental digest.
///
/// Workers hold one `Scratch` per stream they own, reset in place between
/// blocks via [`Scratch::finalize_reset`] (spec.md Design Notes §9:
/// "Workers hold a cloneable template ... and reset from that template per
/// block, avoiding heap churn"). Stream and root accumulators instead call
/// [`Scratch::finalize`] exactly once, at finalize time.
#[derive(Clone)]
pub enum Scratch {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512_256(sha2::Sha512_256),
    Sha3_256(sha3::Sha3_256),
    Blake2b512(blake2::Blake2b512),
    // blake3::Hasher is considerably larger than the RustCrypto states;
    // box it so Scratch doesn't inflate every stream slot to its size.
    Blake3(Box<blake3::Hasher>),
    Null,
}

impl Scratch {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Scratch::Sha1(h) => Digest::update(h, data),
            Scratch::Sha256(h) => Digest::update(h, data),
            Scratch::Sha512_256(h) => Digest::update(h, data),
            Scratch::Sha3_256(h) => Digest::update(h, data),
            Scratch::Blake2b512(h) => Digest::update(h, data),
            Scratch::Blake3(h) => {
                Digest::update(h.as_mut(), data);
            }
            Scratch::Null => {}
        }
    }

    /// Finalize and reset to the initial state, without a fresh
    /// allocation. Used by workers, which process many blocks per thread.
    pub fn finalize_reset(&mut self) -> Vec<u8> {
        match self {
            Scratch::Sha1(h) => Digest::finalize_reset(h).to_vec(),
            Scratch::Sha256(h) => Digest::finalize_reset(h).to_vec(),
            Scratch::Sha512_256(h) => Digest::finalize_reset(h).to_vec(),
            Scratch::Sha3_256(h) => Digest::finalize_reset(h).to_vec(),
            Scratch::Blake2b512(h) => Digest::finalize_reset(h).to_vec(),
            Scratch::Blake3(h) => Digest::finalize_reset(h.as_mut()).to_vec(),
            Scratch::Null => Vec::new(),
        }
    }

    /// Finalize, consuming the state. Used once per stream and once for
    /// the root.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Scratch::Sha1(h) => Digest::finalize(h).to_vec(),
            Scratch::Sha256(h) => Digest::finalize(h).to_vec(),
            Scratch::Sha512_256(h) => Digest::finalize(h).to_vec(),
            Scratch::Sha3_256(h) => Digest::finalize(h).to_vec(),
            Scratch::Blake2b512(h) => Digest::finalize(h).to_vec(),
            Scratch::Blake3(h) => Digest::finalize(*h).to_vec(),
            Scratch::Null => Vec::new(),
        }
    }
}
