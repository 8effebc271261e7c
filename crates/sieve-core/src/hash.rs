//! Hash functions for token and domain keys.
//!
//! Tokens use a single Murmur3-32 pass; domains use two passes with
//! different seeds to form a 64-bit composite key, which makes collisions
//! between distinct registrable domains a non-concern in practice.
//!
//! Zero is reserved as the empty sentinel in both widths, so hash
//! functions here never return it.

/// 64-bit domain hash represented as two 32-bit parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(C)]
pub struct Hash64 {
    pub lo: u32,
    pub hi: u32,
}

impl Hash64 {
    #[inline]
    pub const fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    /// Check if this hash is the empty sentinel (0, 0).
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    /// Convert to a single u64 for use as a map key.
    #[inline]
    pub const fn to_u64(&self) -> u64 {
        ((self.hi as u64) << 32) | (self.lo as u64)
    }

    #[inline]
    pub const fn from_u64(v: u64) -> Self {
        Self {
            lo: v as u32,
            hi: (v >> 32) as u32,
        }
    }
}

const SEED_LO: u32 = 0x9e3779b9; // Golden ratio
const SEED_HI: u32 = 0x85ebca6b; // Murmur3 constant
const SEED_TOKEN: u32 = 0x811c9dc5;

/// Murmur3 32-bit hash, tuned for the short strings typical of tokens
/// and domain labels.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let mut h = seed;
    let mut i = 0;

    let chunks = (len >> 2) << 2;
    while i < chunks {
        let k = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);

        i += 4;
    }

    let mut k: u32 = 0;
    let remainder = len & 3;
    if remainder >= 3 {
        k ^= (data[i + 2] as u32) << 16;
    }
    if remainder >= 2 {
        k ^= (data[i + 1] as u32) << 8;
    }
    if remainder >= 1 {
        k ^= data[i] as u32;
        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);
        h ^= k;
    }

    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;

    h
}

/// Compute a 64-bit hash as (lo, hi) using two Murmur3 passes.
/// Never returns the (0, 0) sentinel.
#[inline]
pub fn hash64(data: &[u8]) -> Hash64 {
    let mut lo = murmur3_32(data, SEED_LO);
    let hi = murmur3_32(data, SEED_HI);

    if lo == 0 && hi == 0 {
        lo = 1;
    }

    Hash64 { lo, hi }
}

/// Hash a domain for membership tests. Lowercases before hashing so
/// lookups are case-insensitive.
#[inline]
pub fn hash_domain(domain: &str) -> Hash64 {
    let mut buf = [0u8; 256];
    let len = domain.len().min(256);

    for (i, &b) in domain.as_bytes()[..len].iter().enumerate() {
        buf[i] = b.to_ascii_lowercase();
    }

    hash64(&buf[..len])
}

/// Hash a token (already lowercased by the tokenizer). Never returns 0.
#[inline]
pub fn hash_token(token: &[u8]) -> u32 {
    let mut h = murmur3_32(token, SEED_TOKEN);
    if h == 0 {
        h = 1;
    }
    h
}
