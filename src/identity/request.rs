//! Caller identity extraction for authenticated requests.
//!
//! After the initial login (password or Google) the client resubmits its
//! email in the `X-User-Email` header on every call; the boundary is
//! trusted to have authenticated the caller out-of-band. This resolver's
//! only job is mapping that value to an account, failing `Unauthenticated`
//! when it is empty or unknown.

use crate::identity::{error::AuthError, model::Account, store::UserRepo};
use axum::http::HeaderMap;

pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Read and trim the caller email header.
pub fn caller_email(headers: &HeaderMap) -> Result<String, AuthError> {
    let email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if email.is_empty() {
        return Err(AuthError::Unauthenticated);
    }

    Ok(email.to_string())
}

/// Map the caller email header to its account.
pub async fn caller_account(repo: &UserRepo, headers: &HeaderMap) -> Result<Account, AuthError> {
    let email = caller_email(headers)?;
    repo.find_by_email(&email)
        .await?
        .ok_or(AuthError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_email_trims() {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_EMAIL_HEADER,
            HeaderValue::from_static("  ana@example.com  "),
        );
        assert_eq!(caller_email(&headers).unwrap(), "ana@example.com");
    }

    #[test]
    fn test_missing_or_blank_header_is_unauthenticated() {
        let headers = HeaderMap::new();
        assert!(matches!(
            caller_email(&headers),
            Err(AuthError::Unauthenticated)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            caller_email(&headers),
            Err(AuthError::Unauthenticated)
        ));
    }
}
