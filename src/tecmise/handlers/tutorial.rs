use crate::identity::{error::AuthError, store::UserRepo};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct TutorialUpdate {
    #[serde(default, rename = "tutorialSeen", alias = "tutorial_seen")]
    tutorial_seen: Option<bool>,
}

#[utoipa::path(
    put,
    path= "/api/user/{id}/tutorial",
    responses (
        (status = 204, description = "Flag updated"),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "No user with the given id"),
    ),
    tag= "profile"
)]
// axum handler for the onboarding tutorial flag; body is optional and
// defaults to marking the tutorial as seen
#[instrument(skip_all, fields(id))]
pub async fn mark_tutorial_seen(
    Extension(repo): Extension<UserRepo>,
    Path(id): Path<i32>,
    payload: Option<Json<TutorialUpdate>>,
) -> Result<StatusCode, AuthError> {
    if id <= 0 {
        return Err(AuthError::Validation {
            field: "id",
            message: "invalid id",
        });
    }

    let seen = payload
        .and_then(|Json(update)| update.tutorial_seen)
        .unwrap_or(true);

    if !repo.set_tutorial_seen(id, seen).await? {
        return Err(AuthError::AccountNotFound);
    }

    debug!(id, seen, "tutorial flag updated");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults_to_seen() {
        let update: TutorialUpdate = serde_json::from_str("{}").unwrap();
        assert!(update.tutorial_seen.unwrap_or(true));

        let update: TutorialUpdate = serde_json::from_str(r#"{"tutorialSeen":false}"#).unwrap();
        assert_eq!(update.tutorial_seen, Some(false));

        let update: TutorialUpdate = serde_json::from_str(r#"{"tutorial_seen":true}"#).unwrap();
        assert_eq!(update.tutorial_seen, Some(true));
    }
}
