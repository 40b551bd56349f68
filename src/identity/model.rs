//! Account entity and its safe projection.

use serde::Serialize;
use utoipa::ToSchema;

/// The canonical identity entity.
///
/// This is already the safe projection: the stored password hash is read
/// only inside the store for verification and never leaves it.
#[derive(ToSchema, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub tutorial_seen: bool,
}
