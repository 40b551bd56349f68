//! Account persistence and password credential handling.
//!
//! Every query runs under the configured per-operation timeout; a slow
//! database surfaces as `StorageUnavailable` instead of a hung request.
//! Lookups are case-insensitive over email, matching the unique index on
//! `LOWER(email)`. The store re-folds emails before binding them so it
//! stays correct even when a caller skipped the edge validation.

use crate::identity::{
    error::AuthError, model::Account, normalize, schema::SchemaCapabilities,
};
use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::future::Future;
use std::time::Duration;

const EXISTS_BY_EMAIL: &str = "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = $1)";

const INSERT_USER: &str = r"
    INSERT INTO users (name, email, password_hash)
    VALUES ($1, $2, $3)
    RETURNING id";

// Account selects come in two variants because avatar_url is an optional
// column; referencing it on an older schema would fail the whole query.
const SELECT_BY_EMAIL_WITH_AVATAR: &str = r"
    SELECT id, name, email, COALESCE(avatar_url, '') AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE LOWER(email) = $1";

const SELECT_BY_EMAIL_BASE: &str = r"
    SELECT id, name, email, '' AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE LOWER(email) = $1";

const SELECT_BY_SUBJECT_WITH_AVATAR: &str = r"
    SELECT id, name, email, COALESCE(avatar_url, '') AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE google_sub = $1";

const SELECT_BY_SUBJECT_BASE: &str = r"
    SELECT id, name, email, '' AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE google_sub = $1";

const SELECT_FOR_LOGIN_WITH_AVATAR: &str = r"
    SELECT id, name, email, password_hash, COALESCE(avatar_url, '') AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE LOWER(email) = $1";

const SELECT_FOR_LOGIN_BASE: &str = r"
    SELECT id, name, email, password_hash, '' AS avatar_url,
           COALESCE(tutorial_seen, false) AS tutorial_seen
      FROM users
     WHERE LOWER(email) = $1";

// Linking only fills an empty slot; a subject id already bound to an
// account is never reassigned.
const LINK_SUBJECT: &str = r"
    UPDATE users SET google_sub = $1
     WHERE id = $2 AND (google_sub IS NULL OR google_sub = '')";

const REFRESH_AVATAR: &str = "UPDATE users SET avatar_url = $1 WHERE id = $2";

const UPDATE_PROFILE: &str = "UPDATE users SET name = $1 WHERE LOWER(email) = $2";

const UPDATE_PROFILE_AVATAR: &str =
    "UPDATE users SET name = $1, avatar_url = $2 WHERE LOWER(email) = $3";

const UPDATE_PROFILE_PASSWORD: &str =
    "UPDATE users SET name = $1, password_hash = $2 WHERE LOWER(email) = $3";

const UPDATE_PROFILE_AVATAR_PASSWORD: &str =
    "UPDATE users SET name = $1, avatar_url = $2, password_hash = $3 WHERE LOWER(email) = $4";

const SET_TUTORIAL_SEEN: &str = "UPDATE users SET tutorial_seen = $1 WHERE id = $2";

// Hashed once at construction with the production parameters; never a
// real credential, only a cost-equivalent target for miss verifications.
const TIMING_PAD_INPUT: &str = "not-a-real-credential";

/// Persistence facade over the `users` table.
#[derive(Clone)]
pub struct UserRepo {
    pool: PgPool,
    caps: SchemaCapabilities,
    timeout: Duration,
    hash_params: Params,
    // Verified on login misses so unknown emails burn the same hashing
    // work as wrong passwords.
    timing_pad: String,
}

impl UserRepo {
    /// # Errors
    /// Returns error if the Argon2 work factor is out of range or the
    /// timing pad hash cannot be computed.
    pub fn new(
        pool: PgPool,
        caps: SchemaCapabilities,
        timeout: Duration,
        hash_time_cost: u32,
    ) -> anyhow::Result<Self> {
        let hash_params = Params::new(
            Params::DEFAULT_M_COST,
            hash_time_cost,
            Params::DEFAULT_P_COST,
            None,
        )
        .map_err(|err| anyhow!("invalid password hashing parameters: {err}"))?;

        let timing_pad = hash_password_blocking(&hash_params, TIMING_PAD_INPUT)?;

        Ok(Self {
            pool,
            caps,
            timeout,
            hash_params,
            timing_pad,
        })
    }

    #[must_use]
    pub const fn capabilities(&self) -> SchemaCapabilities {
        self.caps
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a storage future under the per-operation timeout.
    ///
    /// Unique-index violations map to `DuplicateEmail` so a racing insert
    /// that slipped past the pre-check still reports a conflict instead of
    /// a generic failure.
    pub(crate) async fn run<T, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if is_unique_violation(&err) => Err(AuthError::DuplicateEmail),
            Ok(Err(err)) => Err(AuthError::StorageUnavailable(err.into())),
            Err(_) => Err(AuthError::StorageUnavailable(anyhow!(
                "storage operation timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Case-insensitive registration pre-check.
    ///
    /// Used to give registration an actionable conflict; login never calls
    /// this, so absence stays unobservable on that path.
    pub async fn exists(&self, email: &str) -> Result<bool, AuthError> {
        let email = normalize::fold_email(email);
        let row = self
            .run(sqlx::query(EXISTS_BY_EMAIL).bind(&email).fetch_one(&self.pool))
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    /// Insert a new password-based account, returning its id.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<i32, AuthError> {
        // Defensive re-validation; the handlers already normalized, but the
        // store must hold its own invariants.
        let name = normalize::normalize_name(name)?;
        let email = normalize::normalize_email(email)?;

        let row = self
            .run(
                sqlx::query(INSERT_USER)
                    .bind(&name)
                    .bind(&email)
                    .bind(password_hash)
                    .fetch_one(&self.pool),
            )
            .await?;

        Ok(row.get::<i32, _>(0))
    }

    /// Authenticate by email and password.
    ///
    /// Unknown email and wrong password are indistinguishable to the
    /// caller, in both the error kind and the hashing work spent. A stored
    /// empty hash (federation-only account) never parses as a valid PHC
    /// string, so it always fails verification.
    pub async fn verify(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Account, AuthError> {
        let email = normalize::fold_email(email);
        let query_str = if self.caps.supports_avatar {
            SELECT_FOR_LOGIN_WITH_AVATAR
        } else {
            SELECT_FOR_LOGIN_BASE
        };

        let row = self
            .run(sqlx::query(query_str).bind(&email).fetch_optional(&self.pool))
            .await?;

        let Some(row) = row else {
            // Verify against the pad hash so the miss takes as long as a
            // mismatch against a real account.
            let pad = self.timing_pad.clone();
            let password = password.expose_secret().to_owned();
            tokio::task::spawn_blocking(move || verify_password_blocking(&pad, &password))
                .await
                .map_err(|err| AuthError::Hashing(err.into()))?;
            return Err(AuthError::AuthenticationFailed);
        };

        let stored: String = row.get("password_hash");
        let account = account_from_row(&row);

        let password = password.expose_secret().to_owned();
        let matched = tokio::task::spawn_blocking(move || verify_password_blocking(&stored, &password))
            .await
            .map_err(|err| AuthError::Hashing(err.into()))?;

        if matched {
            Ok(account)
        } else {
            Err(AuthError::AuthenticationFailed)
        }
    }

    /// Hash a plaintext password (Argon2id, salted, configured work factor).
    ///
    /// Compute-heavy, so it runs on the blocking pool.
    pub async fn hash(&self, password: &SecretString) -> Result<String, AuthError> {
        let params = self.hash_params.clone();
        let password = password.expose_secret().to_owned();

        tokio::task::spawn_blocking(move || hash_password_blocking(&params, &password))
            .await
            .map_err(|err| AuthError::Hashing(err.into()))?
            .map_err(AuthError::Hashing)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        let email = normalize::fold_email(email);
        let query_str = if self.caps.supports_avatar {
            SELECT_BY_EMAIL_WITH_AVATAR
        } else {
            SELECT_BY_EMAIL_BASE
        };

        let row = self
            .run(sqlx::query(query_str).bind(&email).fetch_optional(&self.pool))
            .await?;

        Ok(row.map(|r| account_from_row(&r)))
    }

    /// Lookup by federated subject id. Callers must only use this when the
    /// `google_sub` column exists.
    pub async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>, AuthError> {
        let query_str = if self.caps.supports_avatar {
            SELECT_BY_SUBJECT_WITH_AVATAR
        } else {
            SELECT_BY_SUBJECT_BASE
        };

        let row = self
            .run(sqlx::query(query_str).bind(subject).fetch_optional(&self.pool))
            .await?;

        Ok(row.map(|r| account_from_row(&r)))
    }

    /// Link a federated subject id into an account whose slot is empty.
    pub async fn link_subject(&self, id: i32, subject: &str) -> Result<(), AuthError> {
        self.run(
            sqlx::query(LINK_SUBJECT)
                .bind(subject)
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn refresh_avatar(&self, id: i32, avatar_url: &str) -> Result<(), AuthError> {
        self.run(
            sqlx::query(REFRESH_AVATAR)
                .bind(avatar_url)
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Update name, avatar and (optionally) the password hash of the
    /// account with the given email. Returns false when no row matched.
    ///
    /// Setting a password here is the one way a federation-only account
    /// gains access to the password login path.
    pub async fn update_profile(
        &self,
        email: &str,
        name: &str,
        avatar_url: &str,
        password_hash: Option<&str>,
    ) -> Result<bool, AuthError> {
        let email = normalize::fold_email(email);

        let result = match (self.caps.supports_avatar, password_hash) {
            (true, Some(hash)) => {
                self.run(
                    sqlx::query(UPDATE_PROFILE_AVATAR_PASSWORD)
                        .bind(name)
                        .bind(avatar_url)
                        .bind(hash)
                        .bind(&email)
                        .execute(&self.pool),
                )
                .await?
            }
            (true, None) => {
                self.run(
                    sqlx::query(UPDATE_PROFILE_AVATAR)
                        .bind(name)
                        .bind(avatar_url)
                        .bind(&email)
                        .execute(&self.pool),
                )
                .await?
            }
            (false, Some(hash)) => {
                self.run(
                    sqlx::query(UPDATE_PROFILE_PASSWORD)
                        .bind(name)
                        .bind(hash)
                        .bind(&email)
                        .execute(&self.pool),
                )
                .await?
            }
            (false, None) => {
                self.run(
                    sqlx::query(UPDATE_PROFILE)
                        .bind(name)
                        .bind(&email)
                        .execute(&self.pool),
                )
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Flip the tutorial flag. Returns false when the id maps to no user.
    pub async fn set_tutorial_seen(&self, id: i32, seen: bool) -> Result<bool, AuthError> {
        let result = self
            .run(
                sqlx::query(SET_TUTORIAL_SEEN)
                    .bind(seen)
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn account_from_row(row: &PgRow) -> Account {
    Account {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        avatar_url: row.get("avatar_url"),
        tutorial_seen: row.get("tutorial_seen"),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn hash_password_blocking(params: &Params, password: &str) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

fn verify_password_blocking(stored: &str, password: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}
