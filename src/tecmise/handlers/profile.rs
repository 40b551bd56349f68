use crate::{
    cli::globals::GlobalArgs,
    identity::{
        error::AuthError,
        model::Account,
        normalize::{normalize_name, validate_password},
        request,
        store::UserRepo,
    },
};
use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct ProfileUpdate {
    name: String,
    // Older frontends still send snake_case.
    #[serde(default, rename = "avatarUrl", alias = "avatar_url")]
    avatar_url: String,
    /// Optional; when present the password is re-validated and re-hashed.
    /// This is also how a federation-only account gains a local password.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    password: Option<SecretString>,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    id: i32,
    name: String,
    email: String,
    avatar_url: String,
    tutorial_seen: bool,
}

impl From<Account> for ProfileResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            avatar_url: account.avatar_url,
            tutorial_seen: account.tutorial_seen,
        }
    }
}

#[utoipa::path(
    put,
    path= "/api/profile",
    responses (
        (status = 200, description = "Profile updated"),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Missing or unknown caller identity"),
    ),
    tag= "profile"
)]
// axum handler for profile updates, caller identified by X-User-Email
#[instrument(skip_all)]
pub async fn update_profile(
    Extension(repo): Extension<UserRepo>,
    Extension(globals): Extension<GlobalArgs>,
    headers: HeaderMap,
    payload: Option<Json<ProfileUpdate>>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let Some(Json(update)) = payload else {
        return Err(AuthError::Validation {
            field: "body",
            message: "missing payload",
        });
    };

    let account = request::caller_account(&repo, &headers).await?;

    let name = normalize_name(&update.name)?;
    let avatar_url = update.avatar_url.trim();

    let password_hash = match &update.password {
        Some(password) if !password.expose_secret().trim().is_empty() => {
            validate_password(password.expose_secret(), globals.min_password_len)?;
            Some(repo.hash(password).await?)
        }
        _ => None,
    };

    let updated = repo
        .update_profile(&account.email, &name, avatar_url, password_hash.as_deref())
        .await?;
    if !updated {
        // The account vanished between resolution and update.
        return Err(AuthError::Unauthenticated);
    }

    debug!(id = account.id, "profile updated");

    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize, Debug)]
pub struct UserQuery {
    #[serde(default)]
    email: String,
}

#[utoipa::path(
    get,
    path= "/api/user",
    responses (
        (status = 200, description = "User profile", body = [ProfileResponse], content_type = "application/json"),
        (status = 400, description = "Email parameter missing"),
        (status = 404, description = "No user with the given email"),
    ),
    tag= "profile"
)]
// axum handler for the frontend's profile bootstrap lookup
#[instrument(skip_all)]
pub async fn find_user(
    Extension(repo): Extension<UserRepo>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ProfileResponse>, AuthError> {
    if query.email.trim().is_empty() {
        return Err(AuthError::Validation {
            field: "email",
            message: "email is required",
        });
    }

    let account = repo
        .find_by_email(&query.email)
        .await?
        .ok_or(AuthError::AccountNotFound)?;

    Ok(Json(account.into()))
}
