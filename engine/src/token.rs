//! Capability tokens for public form links.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Length of a token produced by [`generate_token`].
pub const TOKEN_LEN: usize = 43;

/// Generates an unguessable link token.
///
/// 32 random bytes from the thread-local CSPRNG, encoded as base64url without
/// padding (43 characters). The token carries no information about the
/// instance, its owner or the client.
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Shape check for tokens produced by [`generate_token`].
pub fn looks_like_token(candidate: &str) -> bool {
    candidate.len() == TOKEN_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_and_43_chars() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(looks_like_token(&token), "{token}");
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!looks_like_token(""));
        assert!(!looks_like_token("abc"));
        assert!(!looks_like_token(&format!("{}=", "a".repeat(42))));
    }
}
