//! Find-or-create-or-link resolution for federated (Google) sign-ins.
//!
//! The three-step upsert:
//!   1. subject-id lookup (fast path for returning users; tolerates an
//!      upstream email change without breaking the link),
//!   2. email lookup ("claim" of an existing account: link the subject id
//!      into an empty slot, refresh the avatar),
//!   3. insert with an empty password credential, so the password login
//!      path stays closed for the new account.
//!
//! Steps commit independently; a partially-completed resolution (subject
//! linked, avatar update lost) is repaired by the next retry. Two racing
//! resolutions for a brand-new email are arbitrated by the unique index on
//! `LOWER(email)`: the loser's insert fails and the whole resolution is
//! reported as failed, never a fabricated account.

use crate::identity::{
    error::AuthError, model::Account, schema::SchemaCapabilities, store::UserRepo,
};
use sqlx::Row;
use tracing::{debug, instrument};

// Insert statements form a closed set, one per capability combination,
// instead of a dynamically assembled column list. All of them store the
// empty-string password sentinel.
const INSERT_FULL: &str = r"
    INSERT INTO users (name, email, password_hash, google_sub, avatar_url)
    VALUES ($1, $2, '', $3, $4)
    RETURNING id, name, email, COALESCE(avatar_url, '') AS avatar_url";

const INSERT_SUBJECT_ONLY: &str = r"
    INSERT INTO users (name, email, password_hash, google_sub)
    VALUES ($1, $2, '', $3)
    RETURNING id, name, email, '' AS avatar_url";

const INSERT_AVATAR_ONLY: &str = r"
    INSERT INTO users (name, email, password_hash, avatar_url)
    VALUES ($1, $2, '', $3)
    RETURNING id, name, email, COALESCE(avatar_url, '') AS avatar_url";

const INSERT_BASE: &str = r"
    INSERT INTO users (name, email, password_hash)
    VALUES ($1, $2, '')
    RETURNING id, name, email, '' AS avatar_url";

/// Verified claims of a federated identity, already normalized by the
/// token layer.
#[derive(Debug, Clone)]
pub struct GoogleProfile {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub picture: String,
}

impl GoogleProfile {
    /// Display name with the documented fallback to the email address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Storage surface the resolver drives. `UserRepo` is the production
/// implementation; tests substitute an in-memory directory so the branch
/// logic runs without a database.
#[allow(async_fn_in_trait)]
pub trait Directory {
    fn capabilities(&self) -> SchemaCapabilities;
    async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>, AuthError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError>;
    async fn link_subject(&self, id: i32, subject: &str) -> Result<(), AuthError>;
    async fn refresh_avatar(&self, id: i32, avatar_url: &str) -> Result<(), AuthError>;
    async fn insert_federated(&self, profile: &GoogleProfile) -> Result<Account, AuthError>;
}

impl Directory for UserRepo {
    fn capabilities(&self) -> SchemaCapabilities {
        UserRepo::capabilities(self)
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>, AuthError> {
        UserRepo::find_by_subject(self, subject).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        UserRepo::find_by_email(self, email).await
    }

    async fn link_subject(&self, id: i32, subject: &str) -> Result<(), AuthError> {
        UserRepo::link_subject(self, id, subject).await
    }

    async fn refresh_avatar(&self, id: i32, avatar_url: &str) -> Result<(), AuthError> {
        UserRepo::refresh_avatar(self, id, avatar_url).await
    }

    async fn insert_federated(&self, profile: &GoogleProfile) -> Result<Account, AuthError> {
        let name = profile.display_name();
        let variant = InsertVariant::for_caps(UserRepo::capabilities(self));

        let query = match variant {
            InsertVariant::Full => sqlx::query(variant.sql())
                .bind(name)
                .bind(&profile.email)
                .bind(&profile.subject)
                .bind(&profile.picture),
            InsertVariant::SubjectOnly => sqlx::query(variant.sql())
                .bind(name)
                .bind(&profile.email)
                .bind(&profile.subject),
            InsertVariant::AvatarOnly => sqlx::query(variant.sql())
                .bind(name)
                .bind(&profile.email)
                .bind(&profile.picture),
            InsertVariant::Base => sqlx::query(variant.sql()).bind(name).bind(&profile.email),
        };

        let row = self.run(query.fetch_one(self.pool())).await?;

        Ok(Account {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            avatar_url: row.get("avatar_url"),
            tutorial_seen: false,
        })
    }
}

/// Which insert statement fits the detected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertVariant {
    Full,
    SubjectOnly,
    AvatarOnly,
    Base,
}

impl InsertVariant {
    pub(crate) const fn for_caps(caps: SchemaCapabilities) -> Self {
        match (caps.supports_subject_id, caps.supports_avatar) {
            (true, true) => Self::Full,
            (true, false) => Self::SubjectOnly,
            (false, true) => Self::AvatarOnly,
            (false, false) => Self::Base,
        }
    }

    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Full => INSERT_FULL,
            Self::SubjectOnly => INSERT_SUBJECT_ONLY,
            Self::AvatarOnly => INSERT_AVATAR_ONLY,
            Self::Base => INSERT_BASE,
        }
    }
}

/// Resolve a verified federated identity to a local account.
///
/// # Errors
/// Any storage failure, including a lost insert race, surfaces as the
/// opaque `FederationUpsertFailed`; the wrapped cause is for logs only.
/// Callers retry the whole resolution, not the insert alone.
#[instrument(skip_all, fields(email = %profile.email))]
pub async fn resolve<D: Directory>(dir: &D, profile: &GoogleProfile) -> Result<Account, AuthError> {
    let caps = dir.capabilities();

    // 1) returning user: subject id wins over email.
    if caps.supports_subject_id && !profile.subject.is_empty() {
        if let Some(account) = dir
            .find_by_subject(&profile.subject)
            .await
            .map_err(opaque)?
        {
            debug!(id = account.id, "resolved by subject id");
            return Ok(account);
        }
    }

    // 2) claim of an existing password-based (or differently-federated)
    //    account by this identity provider.
    if let Some(mut account) = dir.find_by_email(&profile.email).await.map_err(opaque)? {
        if caps.supports_subject_id && !profile.subject.is_empty() {
            dir.link_subject(account.id, &profile.subject)
                .await
                .map_err(opaque)?;
        }
        if caps.supports_avatar
            && !profile.picture.is_empty()
            && profile.picture != account.avatar_url
        {
            dir.refresh_avatar(account.id, &profile.picture)
                .await
                .map_err(opaque)?;
            account.avatar_url.clone_from(&profile.picture);
        }
        debug!(id = account.id, "resolved by email");
        return Ok(account);
    }

    // 3) first sign-in: create the account without a local password.
    let account = dir.insert_federated(profile).await.map_err(opaque)?;
    debug!(id = account.id, "created federated account");
    Ok(account)
}

fn opaque(err: AuthError) -> AuthError {
    AuthError::FederationUpsertFailed(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize;
    use std::sync::Mutex;

    /// In-memory stand-in for the `users` table, enforcing the same
    /// constraints the SQL does: case-insensitive email uniqueness and
    /// subject linking only into an empty slot.
    struct FakeDirectory {
        caps: SchemaCapabilities,
        users: Mutex<Vec<StoredUser>>,
        // Simulates losing an insert race: the unique index rejects the
        // row even though the earlier lookup saw nothing.
        insert_conflicts: bool,
    }

    #[derive(Debug, Clone)]
    struct StoredUser {
        id: i32,
        name: String,
        email: String,
        password_hash: String,
        google_sub: String,
        avatar_url: String,
    }

    impl FakeDirectory {
        fn new(users: Vec<StoredUser>) -> Self {
            Self {
                caps: SchemaCapabilities::full(),
                users: Mutex::new(users),
                insert_conflicts: false,
            }
        }

        fn account(user: &StoredUser) -> Account {
            Account {
                id: user.id,
                name: user.name.clone(),
                email: user.email.clone(),
                avatar_url: user.avatar_url.clone(),
                tutorial_seen: false,
            }
        }

        fn user(&self, id: i32) -> StoredUser {
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|user| user.id == id)
                .cloned()
                .unwrap()
        }

        fn len(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    impl Directory for FakeDirectory {
        fn capabilities(&self) -> SchemaCapabilities {
            self.caps
        }

        async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>, AuthError> {
            let users = self.users.lock().unwrap();
            Ok(users
                .iter()
                .find(|user| user.google_sub == subject)
                .map(Self::account))
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
            let email = normalize::fold_email(email);
            let users = self.users.lock().unwrap();
            Ok(users
                .iter()
                .find(|user| normalize::fold_email(&user.email) == email)
                .map(Self::account))
        }

        async fn link_subject(&self, id: i32, subject: &str) -> Result<(), AuthError> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.iter_mut().find(|user| user.id == id) {
                if user.google_sub.is_empty() {
                    user.google_sub = subject.to_string();
                }
            }
            Ok(())
        }

        async fn refresh_avatar(&self, id: i32, avatar_url: &str) -> Result<(), AuthError> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.iter_mut().find(|user| user.id == id) {
                user.avatar_url = avatar_url.to_string();
            }
            Ok(())
        }

        async fn insert_federated(&self, profile: &GoogleProfile) -> Result<Account, AuthError> {
            let mut users = self.users.lock().unwrap();
            let email = normalize::fold_email(&profile.email);
            if self.insert_conflicts
                || users
                    .iter()
                    .any(|user| normalize::fold_email(&user.email) == email)
            {
                return Err(AuthError::DuplicateEmail);
            }

            let user = StoredUser {
                id: users.len() as i32 + 1,
                name: profile.display_name().to_string(),
                email,
                password_hash: String::new(),
                google_sub: profile.subject.clone(),
                avatar_url: profile.picture.clone(),
            };
            let account = Self::account(&user);
            users.push(user);
            Ok(account)
        }
    }

    fn password_user(id: i32, email: &str) -> StoredUser {
        StoredUser {
            id,
            name: "Ana".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stored".to_string(),
            google_sub: String::new(),
            avatar_url: String::new(),
        }
    }

    fn profile(subject: &str, email: &str) -> GoogleProfile {
        GoogleProfile {
            name: "Ana".to_string(),
            email: email.to_string(),
            subject: subject.to_string(),
            picture: String::new(),
        }
    }

    fn caps(subject: bool, avatar: bool) -> SchemaCapabilities {
        SchemaCapabilities {
            supports_subject_id: subject,
            supports_avatar: avatar,
        }
    }

    #[test]
    fn test_variant_selection_covers_all_combinations() {
        assert_eq!(InsertVariant::for_caps(caps(true, true)), InsertVariant::Full);
        assert_eq!(
            InsertVariant::for_caps(caps(true, false)),
            InsertVariant::SubjectOnly
        );
        assert_eq!(
            InsertVariant::for_caps(caps(false, true)),
            InsertVariant::AvatarOnly
        );
        assert_eq!(
            InsertVariant::for_caps(caps(false, false)),
            InsertVariant::Base
        );
    }

    #[test]
    fn test_variant_sql_matches_columns() {
        assert!(InsertVariant::Full.sql().contains("google_sub"));
        assert!(InsertVariant::Full.sql().contains("avatar_url"));

        assert!(InsertVariant::SubjectOnly.sql().contains("google_sub"));
        assert!(!InsertVariant::SubjectOnly.sql().contains("avatar_url,"));

        assert!(!InsertVariant::AvatarOnly.sql().contains("google_sub"));
        assert!(InsertVariant::AvatarOnly.sql().contains("avatar_url"));

        assert!(!InsertVariant::Base.sql().contains("google_sub"));
        assert!(!InsertVariant::Base.sql().contains("avatar_url,"));
    }

    #[test]
    fn test_every_variant_stores_the_empty_password_sentinel() {
        for variant in [
            InsertVariant::Full,
            InsertVariant::SubjectOnly,
            InsertVariant::AvatarOnly,
            InsertVariant::Base,
        ] {
            assert!(variant.sql().contains("''"), "{variant:?} must store ''");
            assert!(variant.sql().contains("password_hash"));
        }
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut profile = GoogleProfile {
            name: String::new(),
            email: "ana@example.com".to_string(),
            subject: "sub-1".to_string(),
            picture: String::new(),
        };
        assert_eq!(profile.display_name(), "ana@example.com");

        profile.name = "   ".to_string();
        assert_eq!(profile.display_name(), "ana@example.com");

        profile.name = "Ana".to_string();
        assert_eq!(profile.display_name(), "Ana");
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_account_with_closed_password_path() {
        let dir = FakeDirectory::new(vec![]);

        let account = resolve(&dir, &profile("sub-1", "ana@example.com"))
            .await
            .unwrap();

        assert_eq!(dir.len(), 1);
        let stored = dir.user(account.id);
        assert_eq!(stored.email, "ana@example.com");
        assert_eq!(stored.google_sub, "sub-1");
        assert!(stored.password_hash.is_empty());
    }

    #[tokio::test]
    async fn test_password_account_is_claimed_not_duplicated() {
        // Registered with a password first, then signs in with Google
        // using the same address in a different case.
        let dir = FakeDirectory::new(vec![password_user(1, "ana@example.com")]);

        let account = resolve(&dir, &profile("sub-1", "Ana@Example.COM"))
            .await
            .unwrap();

        assert_eq!(account.id, 1);
        assert_eq!(dir.len(), 1);
        let stored = dir.user(1);
        assert_eq!(stored.google_sub, "sub-1");
        assert_eq!(stored.password_hash, "$argon2id$stored");
    }

    #[tokio::test]
    async fn test_subject_id_wins_over_email() {
        // The subject account changed its upstream email; the claim email
        // now matches a different local account, which must stay untouched.
        let mut linked = password_user(1, "old@example.com");
        linked.google_sub = "sub-1".to_string();
        let dir = FakeDirectory::new(vec![linked, password_user(2, "new@example.com")]);

        let account = resolve(&dir, &profile("sub-1", "new@example.com"))
            .await
            .unwrap();

        assert_eq!(account.id, 1);
        assert_eq!(dir.len(), 2);
        assert!(dir.user(2).google_sub.is_empty());
    }

    #[tokio::test]
    async fn test_linked_subject_is_never_reassigned() {
        let mut linked = password_user(1, "ana@example.com");
        linked.google_sub = "sub-old".to_string();
        let dir = FakeDirectory::new(vec![linked]);

        let account = resolve(&dir, &profile("sub-new", "ana@example.com"))
            .await
            .unwrap();

        assert_eq!(account.id, 1);
        assert_eq!(dir.user(1).google_sub, "sub-old");
    }

    #[tokio::test]
    async fn test_avatar_refreshed_when_claim_differs() {
        let mut user = password_user(1, "ana@example.com");
        user.avatar_url = "https://old.example/pic".to_string();
        let dir = FakeDirectory::new(vec![user]);

        let mut claim = profile("sub-1", "ana@example.com");
        claim.picture = "https://new.example/pic".to_string();

        let account = resolve(&dir, &claim).await.unwrap();

        assert_eq!(account.avatar_url, "https://new.example/pic");
        assert_eq!(dir.user(1).avatar_url, "https://new.example/pic");
    }

    #[tokio::test]
    async fn test_lost_insert_race_reports_federation_failure() {
        let dir = FakeDirectory {
            insert_conflicts: true,
            ..FakeDirectory::new(vec![])
        };

        let err = resolve(&dir, &profile("sub-1", "ana@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::FederationUpsertFailed(_)));
        assert_eq!(dir.len(), 0);
    }
}
