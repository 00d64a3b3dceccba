//! SHA-256 helpers used for shared-secret checks.

use sha2::{Digest, Sha256};

/// Compare two secrets without short-circuiting on the first differing
/// byte. Both sides are hashed first so their lengths never leak either.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
