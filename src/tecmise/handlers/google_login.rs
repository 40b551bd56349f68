use crate::identity::{
    error::AuthError, federated, model::Account, store::UserRepo, token::GoogleTokenVerifier,
};
use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// Google Identity Services posts the ID token under one of several
/// legacy field names; the first non-empty alias wins.
#[derive(ToSchema, Deserialize, Debug)]
pub struct GoogleLogin {
    #[serde(default, rename = "idToken")]
    id_token: String,
    #[serde(default, rename = "id_token")]
    id_token_alt: String,
    #[serde(default)]
    credential: String,
}

impl GoogleLogin {
    fn token(&self) -> Option<&str> {
        [&self.id_token, &self.id_token_alt, &self.credential]
            .into_iter()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct GoogleLoginResponse {
    id: i32,
    name: String,
    email: String,
}

impl From<Account> for GoogleLoginResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
        }
    }
}

#[utoipa::path(
    post,
    path= "/login/google",
    responses (
        (status = 200, description = "Sign-in successful", body = [GoogleLoginResponse], content_type = "application/json"),
        (status = 401, description = "Invalid ID token or required claims absent"),
        (status = 500, description = "Account resolution failed"),
    ),
    tag= "login"
)]
// axum handler for Google sign-in
#[instrument(skip_all)]
pub async fn login_google(
    Extension(repo): Extension<UserRepo>,
    Extension(verifier): Extension<Arc<GoogleTokenVerifier>>,
    payload: Option<Json<GoogleLogin>>,
) -> Result<Json<GoogleLoginResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation {
            field: "body",
            message: "missing payload",
        });
    };

    let Some(token) = request.token() else {
        return Err(AuthError::Validation {
            field: "idToken",
            message: "idToken is required",
        });
    };

    let claims = verifier.verify(token).await?;
    let profile = claims.into_profile();

    let account = federated::resolve(&repo, &profile).await?;

    debug!(id = account.id, "google sign-in resolved");

    Ok(Json(account.into()))
}
