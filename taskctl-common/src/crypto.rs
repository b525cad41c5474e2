use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A URL-safe, high-entropy opaque token. `num_bytes` is the amount of
/// underlying randomness; callers needing "≥32 bytes of entropy"
/// (spec.md §3 StreamToken, §4.2) pass 32 or more.
pub fn random_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// One-way hash of an API key. Only this hash is ever persisted; the
/// plaintext key exists solely in memory and in the one-shot claim response
/// (spec.md §4.4 invariant).
pub fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_sized() {
        let a = random_token(32);
        let b = random_token(32);
        assert_ne!(a, b);
        assert!(a.len() >= 32);
    }

    #[test]
    fn hash_is_deterministic_and_one_way() {
        let hash = hash_api_key("super-secret");
        assert_eq!(hash, hash_api_key("super-secret"));
        assert_ne!(hash, "super-secret");
    }
}
