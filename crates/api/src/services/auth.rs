//! API bearer tokens.
//!
//! A token is `lrd_` followed by 32 random bytes in unpadded base64url. Only
//! the SHA-256 hex digest is stored, so a database leak does not leak usable
//! tokens.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use larder_core::{Email, UserId};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::db::{RepositoryError, UserRepository};
use crate::models::ApiToken;

/// Prefix that makes tokens easy to spot in logs and secret scanners.
pub const TOKEN_PREFIX: &str = "lrd_";

/// A freshly minted token. `plaintext` is shown to the user once.
#[derive(Debug)]
pub struct IssuedToken {
    pub plaintext: String,
    pub token: ApiToken,
}

/// Generate a new token string.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Digest stored in `api_tokens.token_hash`.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Pull the token out of an `Authorization` header value.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    token.starts_with(TOKEN_PREFIX).then_some(token)
}

/// Mint and store a token for the user with this email.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if no user has the email.
pub async fn issue_token(
    users: &UserRepository<'_>,
    email: &Email,
    label: Option<&str>,
) -> Result<IssuedToken, RepositoryError> {
    let user = users
        .get_by_email(email)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    issue_token_for(users, user.id, label).await
}

/// Mint and store a token for a user ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn issue_token_for(
    users: &UserRepository<'_>,
    user_id: UserId,
    label: Option<&str>,
) -> Result<IssuedToken, RepositoryError> {
    let plaintext = generate_token();
    let token = users
        .insert_token(user_id, &hash_token(&plaintext), label)
        .await?;
    tracing::info!(user_id = %user_id, token_id = %token.id, "API token issued");
    Ok(IssuedToken { plaintext, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_token();
        assert!(token.starts_with("lrd_"));
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(token.len(), 4 + 43);
        assert!(!token.contains('='));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_token("lrd_abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("lrd_abc"));
        assert_ne!(hash, hash_token("lrd_abd"));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer lrd_xyz"), Some("lrd_xyz"));
        assert_eq!(parse_bearer("bearer  lrd_xyz "), Some("lrd_xyz"));
        assert_eq!(parse_bearer("Basic lrd_xyz"), None);
        assert_eq!(parse_bearer("Bearer sk_live_123"), None);
        assert_eq!(parse_bearer("lrd_xyz"), None);
    }
}
