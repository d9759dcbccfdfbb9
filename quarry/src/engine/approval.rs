use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 16;

/// A fresh one-time approval token: 16 random bytes, URL-safe base64.
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time comparison of a presented token against the stored one.
pub fn token_matches(presented: Option<&str>, stored: Option<&str>) -> bool {
    match (presented, stored) {
        (Some(p), Some(s)) if !s.is_empty() => p.as_bytes().ct_eq(s.as_bytes()).into(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_token_matching() {
        assert!(token_matches(Some("abc"), Some("abc")));
        assert!(!token_matches(Some("abd"), Some("abc")));
        assert!(!token_matches(Some("abc"), None));
        assert!(!token_matches(None, Some("abc")));
        assert!(!token_matches(Some(""), Some("")));
    }
}
