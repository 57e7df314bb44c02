use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: Uuid,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with that email already exists")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for users and their login sessions.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<DbUserAuth>, StoreError>;

    async fn insert_user(&self, user: NewUser<'_>) -> Result<Uuid, StoreError>;

    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Resolves an unexpired session token to its user.
    async fn find_session_user(&self, token: Uuid) -> Result<Option<AuthUser>, StoreError>;

    async fn delete_session(&self, token: Uuid) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<DbUserAuth>, StoreError> {
        let user = sqlx::query_as::<_, DbUserAuth>("SELECT id, password FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: NewUser<'_>) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let result =
            sqlx::query("INSERT INTO users (id, username, email, password) VALUES ($1, $2, $3, $4)")
                .bind(id)
                .bind(user.username)
                .bind(user.email)
                .bind(user.password_hash)
                .execute(&self.pool)
                .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    async fn find_session_user(&self, token: Uuid) -> Result<Option<AuthUser>, StoreError> {
        let user = sqlx::query_as::<_, AuthUser>(
            "SELECT users.id, users.username, users.email FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
