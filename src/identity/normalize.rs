//! Shared input normalization rules.
//!
//! One rule set, several call sites: the HTTP handlers validate request
//! payloads with these functions and the store re-applies the cheap ones
//! before touching the database, so the two layers cannot drift apart.
//! Everything here is pure and safe to call redundantly.

use crate::identity::error::AuthError;
use regex::Regex;

/// Minimum display-name length after trimming.
pub const MIN_NAME_LEN: usize = 2;

/// Default minimum password length, overridable via `--min-password-length`.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

/// Lowercase + trim an email for lookups and uniqueness checks.
/// Does not validate; see [`normalize_email`].
#[must_use]
pub fn fold_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Basic email format check on already-folded input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// Trim a display name, rejecting anything shorter than [`MIN_NAME_LEN`].
pub fn normalize_name(raw: &str) -> Result<String, AuthError> {
    let name = raw.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AuthError::Validation {
            field: "name",
            message: "name is too short",
        });
    }
    Ok(name.to_string())
}

/// Trim, lowercase and validate an email address.
///
/// The format regex rejects embedded whitespace, so a folded email that
/// passes here is safe to bind into `LOWER(email) = $1` lookups.
pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = fold_email(raw);
    if email.is_empty() {
        return Err(AuthError::Validation {
            field: "email",
            message: "email is required",
        });
    }
    if !valid_email(&email) {
        return Err(AuthError::Validation {
            field: "email",
            message: "invalid email",
        });
    }
    Ok(email)
}

/// Check a plaintext password against the configured minimum length and the
/// no-whitespace rule. The password itself is never transformed.
pub fn validate_password(raw: &str, min_len: usize) -> Result<(), AuthError> {
    if raw.chars().count() < min_len {
        return Err(AuthError::Validation {
            field: "password",
            message: "password is too short",
        });
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(AuthError::Validation {
            field: "password",
            message: "password must not contain whitespace",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: AuthError) -> &'static str {
        match err {
            AuthError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Ana  ").unwrap(), "Ana");
        assert_eq!(normalize_name("Jo").unwrap(), "Jo");
        assert_eq!(field_of(normalize_name(" A ").unwrap_err()), "name");
        assert_eq!(field_of(normalize_name("   ").unwrap_err()), "name");
    }

    #[test]
    fn test_normalize_email_trims_and_lowercases() {
        assert_eq!(
            normalize_email("  Ana@Example.COM ").unwrap(),
            "ana@example.com"
        );
    }

    #[test]
    fn test_normalize_email_rejects_bad_input() {
        for raw in ["", "   ", "not-an-email", "a@b", "a b@example.com", "@x.y"] {
            assert_eq!(
                field_of(normalize_email(raw).unwrap_err()),
                "email",
                "should reject {raw:?}"
            );
        }
    }

    #[test]
    fn test_fold_email_is_idempotent() {
        let once = fold_email("  Ana@Example.COM ");
        assert_eq!(fold_email(&once), once);
    }

    #[test]
    fn test_validate_password_length() {
        assert!(validate_password("password1", 8).is_ok());
        assert!(validate_password("12345678", 8).is_ok());
        assert_eq!(
            field_of(validate_password("1234567", 8).unwrap_err()),
            "password"
        );
    }

    #[test]
    fn test_validate_password_rejects_whitespace() {
        for raw in ["pass word1", " password", "password\t1", "password\n"] {
            assert_eq!(
                field_of(validate_password(raw, 8).unwrap_err()),
                "password",
                "should reject {raw:?}"
            );
        }
    }
}
