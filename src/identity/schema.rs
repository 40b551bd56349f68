//! Schema capability detection.
//!
//! The `users` table gained `google_sub` and `avatar_url` in later
//! migrations; deployments at earlier stages must keep working without a
//! coordinated schema+code rollout. Capabilities are probed exactly once,
//! during server construction, and the resulting flags are handed to the
//! store and the federated resolver as plain immutable data. No global
//! cache, no race window: handlers only ever see the finished value.

use sqlx::{PgPool, Row};
use tracing::{info, warn};

const COLUMN_PROBE: &str = r"
    SELECT 1
      FROM information_schema.columns
     WHERE table_name = 'users' AND column_name = $1
     LIMIT 1";

/// Which optional `users` columns this deployment has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaCapabilities {
    /// `users.google_sub` exists.
    pub supports_subject_id: bool,
    /// `users.avatar_url` exists.
    pub supports_avatar: bool,
}

impl SchemaCapabilities {
    /// Probe `information_schema` for the optional columns.
    ///
    /// A failed probe is reported as the capability being absent; a
    /// metadata query must never take the process down.
    pub async fn detect(pool: &PgPool) -> Self {
        let caps = Self {
            supports_subject_id: column_exists(pool, "google_sub").await,
            supports_avatar: column_exists(pool, "avatar_url").await,
        };

        info!(
            supports_subject_id = caps.supports_subject_id,
            supports_avatar = caps.supports_avatar,
            "detected users schema capabilities"
        );

        caps
    }

    /// All optional columns present (the newest migration stage).
    #[must_use]
    pub const fn full() -> Self {
        Self {
            supports_subject_id: true,
            supports_avatar: true,
        }
    }
}

async fn column_exists(pool: &PgPool, column: &str) -> bool {
    match sqlx::query(COLUMN_PROBE)
        .bind(column)
        .fetch_optional(pool)
        .await
    {
        Ok(row) => row.is_some_and(|r| r.get::<i32, _>(0) == 1),
        Err(err) => {
            warn!("capability probe for users.{column} failed, assuming absent: {err}");
            false
        }
    }
}
