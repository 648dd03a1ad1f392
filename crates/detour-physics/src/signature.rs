//! Structural fingerprints used to decide what has to be rebuilt
//!
//! A [`Signature`] is not collision proof. It only has to be stable while
//! the hashed inputs stay the same, which is all the cache comparisons need.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// 64-bit structural hash of some build input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature(pub u64);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Values that can be folded into a [`SignatureBuilder`]
pub trait Fingerprint {
    fn fingerprint(&self, sig: &mut SignatureBuilder);
}

/// Accumulates a canonical sequence of values into a [`Signature`].
///
/// Floats are hashed through their bit patterns, so `0.0` and `-0.0`
/// differ and the same value always hashes the same.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    hasher: DefaultHasher,
}

impl SignatureBuilder {
    /// Starts a signature; `domain` keeps unrelated signatures apart
    pub fn new(domain: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        hasher.write(domain.as_bytes());
        hasher.write_u8(0xff);
        Self { hasher }
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.hasher.write_u64(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.hasher.write_i32(v);
        self
    }

    pub fn usize(&mut self, v: usize) -> &mut Self {
        self.hasher.write_u64(v as u64);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.hasher.write_u8(v as u8);
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.hasher.write_u32(v.to_bits());
        self
    }

    pub fn vec3(&mut self, v: Vec3) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z)
    }

    pub fn quat(&mut self, q: Quat) -> &mut Self {
        self.f32(q.x).f32(q.y).f32(q.z).f32(q.w)
    }

    pub fn f32_slice(&mut self, values: &[f32]) -> &mut Self {
        self.usize(values.len());
        for &v in values {
            self.f32(v);
        }
        self
    }

    pub fn signature(&mut self, sig: Signature) -> &mut Self {
        self.u64(sig.0)
    }

    pub fn value(&mut self, v: &impl Fingerprint) -> &mut Self {
        v.fingerprint(self);
        self
    }

    pub fn finish(&self) -> Signature {
        Signature(self.hasher.finish())
    }
}

/// Hashes a whole sequence, including its length
pub fn signature_of<'a, T: Fingerprint + 'a>(
    domain: &str,
    items: impl IntoIterator<Item = &'a T>,
) -> Signature {
    let mut sig = SignatureBuilder::new(domain);
    let mut count = 0usize;
    for item in items {
        item.fingerprint(&mut sig);
        count += 1;
    }
    sig.usize(count);
    sig.finish()
}
