//! BLAKE3 query fingerprints.
//!
//! Audit rows carry a hash of the sanitized query text instead of the text
//! itself, so identical queries correlate without storing their literals.

/// Hex-encoded BLAKE3 digest of the query text.
pub fn query_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let a = query_hash("MATCH (n) RETURN n");
        let b = query_hash("MATCH (n) RETURN n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_queries_differ() {
        assert_ne!(query_hash("MATCH (n) RETURN n"), query_hash("MATCH (m) RETURN m"));
    }
}
