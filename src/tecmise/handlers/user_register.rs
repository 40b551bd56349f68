use crate::{
    cli::globals::GlobalArgs,
    identity::{
        error::AuthError,
        normalize::{normalize_email, normalize_name, validate_password},
        store::UserRepo,
    },
};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct UserRegister {
    name: String,
    email: String,
    #[schema(value_type = String)]
    password: SecretString,
}

#[utoipa::path(
    post,
    path= "/register",
    responses (
        (status = 201, description = "Registration successful"),
        (status = 400, description = "Validation failed, names the offending field"),
        (status = 409, description = "A user with the given email already exists"),
    ),
    tag= "register"
)]
// axum handler for user registration
#[instrument(skip_all)]
pub async fn register(
    Extension(repo): Extension<UserRepo>,
    Extension(globals): Extension<GlobalArgs>,
    payload: Option<Json<UserRegister>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(user)) = payload else {
        return Err(AuthError::Validation {
            field: "body",
            message: "missing payload",
        });
    };

    // Defensive validation: the same rules run here even when an edge
    // layer already applied them.
    let name = normalize_name(&user.name)?;
    let email = normalize_email(&user.email)?;
    validate_password(user.password.expose_secret(), globals.min_password_len)?;

    // Pre-check gives registration an actionable conflict; the unique
    // index reports the same conflict if a concurrent insert wins the race.
    if repo.exists(&email).await? {
        debug!("registration rejected, email already taken");
        return Err(AuthError::DuplicateEmail);
    }

    let password_hash = repo.hash(&user.password).await?;
    let id = repo.create(&name, &email, &password_hash).await?;

    debug!(id, "user registered");

    Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}
