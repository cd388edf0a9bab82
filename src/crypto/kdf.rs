//! Shared-secret -> directional-key derivation (spec §4.5).
//!
//! BLAKE2b keyed over the raw X25519 agreement, once per direction tag:
//! hash the shared secret together with a direction label to get two
//! independent keys out of one agreement, rather than reusing a single
//! key for both directions.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

const LABEL_C2S: &[u8] = b"ascii-chat c->s";
const LABEL_S2C: &[u8] = b"ascii-chat s->c";

/// Derive the two 32-byte directional AEAD keys from a raw X25519 shared secret.
pub fn derive_directional_keys(shared_secret: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    (
        derive_one(shared_secret, LABEL_C2S),
        derive_one(shared_secret, LABEL_S2C),
    )
}

fn derive_one(shared_secret: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid blake2b output length");
    hasher.update(shared_secret);
    hasher.update(label);
    let mut out = [0u8; 32];
    hasher.finalize_variable(&mut out).expect("output buffer matches requested length");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_produce_distinct_keys() {
        let secret = [7u8; 32];
        let (c2s, s2c) = derive_directional_keys(&secret);
        assert_ne!(c2s, s2c);
    }

    #[test]
    fn deterministic_given_same_secret() {
        let secret = [3u8; 32];
        let (a, _) = derive_directional_keys(&secret);
        let (b, _) = derive_directional_keys(&secret);
        assert_eq!(a, b);
    }
}
