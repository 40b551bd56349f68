use crate::{
    cli::globals::GlobalArgs,
    identity::{
        error::AuthError,
        model::Account,
        normalize::{normalize_email, validate_password},
        store::UserRepo,
    },
};
use axum::{extract::Extension, Json};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct UserLogin {
    email: String,
    #[schema(value_type = String)]
    password: SecretString,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    id: i32,
    name: String,
    email: String,
    avatar_url: String,
}

impl From<Account> for LoginResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            avatar_url: account.avatar_url,
        }
    }
}

#[utoipa::path(
    post,
    path= "/login",
    responses (
        (status = 200, description = "Login successful", body = [LoginResponse], content_type = "application/json"),
        (status = 401, description = "Unauthorized"),
    ),
    tag= "login"
)]
// axum handler for password login
#[instrument(skip_all)]
pub async fn login(
    Extension(repo): Extension<UserRepo>,
    Extension(globals): Extension<GlobalArgs>,
    payload: Option<Json<UserLogin>>,
) -> Result<Json<LoginResponse>, AuthError> {
    let Some(Json(user)) = payload else {
        return Err(AuthError::Validation {
            field: "body",
            message: "missing payload",
        });
    };

    let email = normalize_email(&user.email)?;
    validate_password(user.password.expose_secret(), globals.min_password_len)?;

    // Unknown email and wrong password come back as the same error kind;
    // nothing on this path reveals whether the account exists.
    let account = repo.verify(&email, &user.password).await?;

    debug!(id = account.id, "login successful");

    Ok(Json(account.into()))
}
