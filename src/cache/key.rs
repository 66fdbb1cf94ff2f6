//! Cache key generation
//!
//! Maps an artifact specification to a short content-addressed identifier
//! used as the entry directory name. Same specification = same entry.

use sha2::{Digest, Sha256};

/// Length of a cache key in hex characters (8 bytes of SHA-256)
pub const KEY_LEN: usize = 16;

/// Hash a specification string, returning the first 16 hex chars of its SHA-256
pub fn cache_key(spec: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec.as_bytes());
    let result = hasher.finalize();

    hex::encode(&result[..KEY_LEN / 2])
}

/// Normalized specification for a downloaded binary
pub fn binary_spec(url: &str, name: &str) -> String {
    format!("{}:{}", url, name)
}

/// Normalized specification for a registry package
pub fn package_spec(name: &str, version: &str) -> String {
    format!("{}@{}", name, version)
}

/// Whether a directory name looks like a cache key
pub fn is_cache_key(name: &str) -> bool {
    name.len() == KEY_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_deterministic() {
        let key1 = cache_key("pkg@1.0.0");
        let key2 = cache_key("pkg@1.0.0");

        assert_eq!(key1, key2);
        assert_eq!(key1.len(), KEY_LEN);
        assert!(is_cache_key(&key1));
    }

    #[test]
    fn near_duplicates_differ() {
        let specs = [
            "pkg@1.0.0",
            "pkg@1.0.1",
            "pkg-a@1.0.0",
            "pkg@1.0.0 ",
            "Pkg@1.0.0",
            "@scope/pkg@1.0.0",
        ];
        let keys: HashSet<String> = specs.iter().map(|s| cache_key(s)).collect();

        assert_eq!(keys.len(), specs.len());
        assert!(keys.iter().all(|k| is_cache_key(k)));
    }

    #[test]
    fn accepts_any_unicode() {
        let key = cache_key("🦀 пакет@1.0.0 \u{10FFFF}");
        assert!(is_cache_key(&key));
        assert_eq!(cache_key(""), cache_key(""));
    }

    #[test]
    fn spec_builders() {
        assert_eq!(
            binary_spec("https://example.com/tool", "tool"),
            "https://example.com/tool:tool"
        );
        assert_eq!(package_spec("@scope/cli", "^2.0.0"), "@scope/cli@^2.0.0");
    }

    #[test]
    fn rejects_non_keys() {
        assert!(!is_cache_key("not-a-key"));
        assert!(!is_cache_key("ABCDEF0123456789"));
        assert!(!is_cache_key("abcdef012345678"));
    }
}
