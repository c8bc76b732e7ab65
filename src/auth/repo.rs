use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

pub use crate::auth::repo_types::{NewUser, User};
use crate::error::AuthError;

#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CreateUserError> for AuthError {
    fn from(e: CreateUserError) -> Self {
        match e {
            CreateUserError::DuplicateEmail => AuthError::DuplicateEmail,
            CreateUserError::Other(e) => AuthError::Internal(e),
        }
    }
}

/// Persistence for user accounts. Email uniqueness must be enforced by the
/// implementation itself, not only by callers checking first.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError>;
    /// Returns `None` when no user has this id.
    async fn set_profile_picture(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str =
    "id, full_name, email, password_hash, profile_picture, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, full_name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.full_name)
        .bind(new.email)
        .bind(new.password_hash)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(CreateUserError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn set_profile_picture(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET profile_picture = $2, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("update profile picture")?;
        Ok(user)
    }
}

#[cfg(test)]
pub mod memory {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
    };

    use anyhow::anyhow;
    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::{CreateUserError, NewUser, User, UserStore};

    /// Map-backed store; the write lock makes check-and-insert atomic.
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: RwLock<HashMap<Uuid, User>>,
    }

    impl MemoryUserStore {
        pub async fn len(&self) -> usize {
            self.users.read().await.len()
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            let users = self.users.read().await;
            Ok(users.values().find(|u| u.email == email).cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.read().await.get(&id).cloned())
        }

        async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError> {
            let mut users = self.users.write().await;
            if users.values().any(|u| u.email == new.email) {
                return Err(CreateUserError::DuplicateEmail);
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                full_name: new.full_name.to_string(),
                email: new.email.to_string(),
                password_hash: new.password_hash.to_string(),
                profile_picture: String::new(),
                created_at: now,
                updated_at: now,
            };
            users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn set_profile_picture(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
            let mut users = self.users.write().await;
            Ok(users.get_mut(&id).map(|u| {
                u.profile_picture = url.to_string();
                u.updated_at = OffsetDateTime::now_utc();
                u.clone()
            }))
        }
    }

    /// Wraps a memory store and fails reads or writes on demand, the way an
    /// unreachable database would.
    #[derive(Default)]
    pub struct FlakyUserStore {
        pub inner: MemoryUserStore,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl FlakyUserStore {
        fn check(flag: &AtomicBool) -> anyhow::Result<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused to db.internal:5432"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserStore for FlakyUserStore {
        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Self::check(&self.fail_reads)?;
            self.inner.find_by_email(email).await
        }

        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Self::check(&self.fail_reads)?;
            self.inner.find_by_id(id).await
        }

        async fn create(&self, new: NewUser<'_>) -> Result<User, CreateUserError> {
            Self::check(&self.fail_writes)?;
            self.inner.create(new).await
        }

        async fn set_profile_picture(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
            Self::check(&self.fail_writes)?;
            self.inner.set_profile_picture(id, url).await
        }
    }

    mod tests {
        use super::*;

        fn new_user<'a>(email: &'a str) -> NewUser<'a> {
            NewUser {
                full_name: "Ann Lee",
                email,
                password_hash: "$argon2id$fake",
            }
        }

        #[tokio::test]
        async fn create_rejects_duplicate_email() {
            let store = MemoryUserStore::default();
            store.create(new_user("ann@x.com")).await.expect("first insert");
            let err = store.create(new_user("ann@x.com")).await.unwrap_err();
            assert!(matches!(err, CreateUserError::DuplicateEmail));
            assert_eq!(store.len().await, 1);
        }

        #[tokio::test]
        async fn lookups_find_created_user() {
            let store = MemoryUserStore::default();
            let user = store.create(new_user("bob@x.com")).await.unwrap();
            assert_eq!(user.profile_picture, "");

            let by_email = store.find_by_email("bob@x.com").await.unwrap().unwrap();
            assert_eq!(by_email.id, user.id);
            let by_id = store.find_by_id(user.id).await.unwrap().unwrap();
            assert_eq!(by_id.email, "bob@x.com");
            assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn set_profile_picture_updates_only_that_field() {
            let store = MemoryUserStore::default();
            let user = store.create(new_user("cy@x.com")).await.unwrap();
            let updated = store
                .set_profile_picture(user.id, "https://img.local/a.png")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(updated.profile_picture, "https://img.local/a.png");
            assert_eq!(updated.full_name, user.full_name);
            assert_eq!(updated.password_hash, user.password_hash);

            let missing = store
                .set_profile_picture(Uuid::new_v4(), "https://img.local/b.png")
                .await
                .unwrap();
            assert!(missing.is_none());
        }

        #[tokio::test]
        async fn flaky_store_fails_only_when_switched() {
            let store = FlakyUserStore::default();
            store.create(new_user("dee@x.com")).await.unwrap();

            store.fail_reads.store(true, Ordering::SeqCst);
            assert!(store.find_by_email("dee@x.com").await.is_err());
            store.fail_writes.store(true, Ordering::SeqCst);
            let err = store.create(new_user("eve@x.com")).await.unwrap_err();
            assert!(matches!(err, CreateUserError::Other(_)));
            assert_eq!(store.inner.len().await, 1);
        }
    }
}
