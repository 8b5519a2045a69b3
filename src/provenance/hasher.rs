//! WR-014: BLAKE3 fingerprints for plans.

/// Hash an ordered list of components, NUL-separated so that
/// `["ab", "c"]` and `["a", "bc"]` differ. Returns `"blake3:{hex}"`.
pub fn hash_components(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
