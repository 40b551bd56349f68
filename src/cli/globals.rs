use std::time::Duration;

/// Runtime configuration shared across handlers.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    /// Expected `aud` of Google ID tokens (the OAuth client id).
    pub google_client_id: String,
    /// Canonical minimum password length, applied uniformly.
    pub min_password_len: usize,
    /// Argon2 time cost (work factor) for new password hashes.
    pub hash_time_cost: u32,
    /// Upper bound for a single storage operation.
    pub db_timeout: Duration,
    /// Allowed CORS origins; `*` means any.
    pub cors_origins: Vec<String>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(google_client_id: String) -> Self {
        Self {
            google_client_id,
            min_password_len: crate::identity::normalize::DEFAULT_MIN_PASSWORD_LEN,
            hash_time_cost: 2,
            db_timeout: Duration::from_secs(5),
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args_defaults() {
        let args = GlobalArgs::new("client-id.apps.googleusercontent.com".to_string());
        assert_eq!(
            args.google_client_id,
            "client-id.apps.googleusercontent.com"
        );
        assert_eq!(args.min_password_len, 8);
        assert_eq!(args.db_timeout, Duration::from_secs(5));
        assert_eq!(args.cors_origins, vec!["*".to_string()]);
    }
}
