use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing API key")]
    Missing,

    #[error("invalid API key")]
    Invalid,
}

/// The single shared secret guarding privileged endpoints.
///
/// There are no identities or roles: a request either presents the secret or
/// it does not.
#[derive(Clone)]
pub struct ApiKey {
    secret: String,
}

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check a request-supplied token against the configured secret.
    ///
    /// - No IO
    /// - No panics
    /// - An empty configured secret rejects every request
    pub fn verify(&self, supplied: Option<&str>) -> Result<(), AuthError> {
        let supplied = supplied.map(str::trim).filter(|s| !s.is_empty());
        let Some(supplied) = supplied else {
            return Err(AuthError::Missing);
        };

        if self.secret.is_empty() {
            tracing::warn!("API key check rejected request: no secret configured");
            return Err(AuthError::Invalid);
        }

        if constant_time_eq(supplied.as_bytes(), self.secret.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

impl core::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiKey").field("secret", &"<redacted>").finish()
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_key_passes() {
        let key = ApiKey::new("s3cret");
        assert_eq!(key.verify(Some("s3cret")), Ok(()));
        assert_eq!(key.verify(Some("  s3cret ")), Ok(()));
    }

    #[test]
    fn absent_or_blank_key_is_missing() {
        let key = ApiKey::new("s3cret");
        assert_eq!(key.verify(None), Err(AuthError::Missing));
        assert_eq!(key.verify(Some("   ")), Err(AuthError::Missing));
    }

    #[test]
    fn wrong_key_is_invalid() {
        let key = ApiKey::new("s3cret");
        assert_eq!(key.verify(Some("s3cre")), Err(AuthError::Invalid));
        assert_eq!(key.verify(Some("S3CRET")), Err(AuthError::Invalid));
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let key = ApiKey::new("");
        assert_eq!(key.verify(Some("anything")), Err(AuthError::Invalid));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let rendered = format!("{:?}", ApiKey::new("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
