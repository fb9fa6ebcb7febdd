//! Cache key derivation

use sha2::{Digest, Sha256};

/// Derive the cache key of a read request.
///
/// Hex SHA-256 over the normalized endpoint and the parameters sorted by name then
/// value. Each field is length-prefixed, so values containing `=` or `&` cannot make
/// two different requests collide.
pub fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort_unstable();

    let mut digest = Sha256::new();
    absorb(&mut digest, normalize(endpoint));
    for (name, value) in sorted {
        absorb(&mut digest, name);
        absorb(&mut digest, value);
    }

    format!("{:x}", digest.finalize())
}

fn normalize(endpoint: &str) -> &str {
    match endpoint.trim().trim_end_matches('/') {
        "" => "/",
        path => path,
    }
}

fn absorb(digest: &mut Sha256, field: &str) {
    digest.update((field.len() as u64).to_be_bytes());
    digest.update(field.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_order_does_not_matter() {
        assert_eq!(
            cache_key("/notes", &[("limit", "10"), ("page", "1")]),
            cache_key("/notes", &[("page", "1"), ("limit", "10")])
        );
    }

    #[test]
    fn test_endpoint_and_values_distinguish_keys() {
        assert_ne!(cache_key("/notes", &[]), cache_key("/orders", &[]));
        assert_ne!(
            cache_key("/notes", &[("page", "1")]),
            cache_key("/notes", &[("page", "2")])
        );
    }

    #[test]
    fn test_separator_characters_cannot_collide() {
        assert_ne!(
            cache_key("/search", &[("q", "a&b=c")]),
            cache_key("/search", &[("q", "a"), ("b", "c")])
        );
    }

    #[test]
    fn test_trailing_slash_normalized() {
        assert_eq!(cache_key("/notes/", &[]), cache_key("/notes", &[]));
        assert_eq!(cache_key("/", &[]), cache_key("", &[]));
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = cache_key("/notes", &[]);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
