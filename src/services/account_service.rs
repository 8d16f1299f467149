//! Account registration with bcrypt-hashed passwords.

use crate::{
    models::account::Account,
    services::{
        inventory_service::is_transient_connect_error,
        retry::{RetryPolicy, with_retry},
    },
};
use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use std::{ops::RangeInclusive, sync::Arc};
use thiserror::Error;

/// Six-digit user ids.
const USER_ID_RANGE: RangeInclusive<i64> = 100_000..=999_999;

/// Fresh ids drawn before giving up on an id collision.
const MAX_ID_DRAWS: u32 = 5;

/// Work factors bcrypt accepts.
pub const BCRYPT_COST_RANGE: RangeInclusive<u32> = 4..=31;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Please pass both username and password in the request body")]
    MissingField,
    #[error("User {0} already exists")]
    UsernameTaken(String),
    #[error("no free user id after {} attempts", MAX_ID_DRAWS)]
    IdsExhausted,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("password hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<SqlitePool>,
    cost: u32,
    retry: RetryPolicy,
}

impl AccountService {
    pub fn new(db: Arc<SqlitePool>, cost: u32, retry: RetryPolicy) -> Self {
        Self { db, cost, retry }
    }

    /// Register `username` with a bcrypt hash of `password`.
    ///
    /// Hashing runs on the blocking pool. The user id is a random six-digit
    /// number, redrawn if it is already taken.
    pub async fn create(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AccountError::MissingField);
        }

        let cost = self.cost;
        let password = password.to_owned();
        let password_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;

        let mut conn =
            with_retry(self.retry, is_transient_connect_error, || self.db.acquire()).await?;

        for _ in 0..MAX_ID_DRAWS {
            let user_id = rand::thread_rng().gen_range(USER_ID_RANGE);
            let inserted = sqlx::query_as::<_, Account>(
                "INSERT INTO users (user_id, username, password_hash, created_at)
                 VALUES (?, ?, ?, ?)
                 RETURNING user_id, username, created_at",
            )
            .bind(user_id)
            .bind(username)
            .bind(&password_hash)
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await;

            match inserted {
                Ok(account) => {
                    tracing::info!(user_id, username, "account created");
                    return Ok(account);
                }
                Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                    let taken: Option<i64> =
                        sqlx::query_scalar("SELECT user_id FROM users WHERE username = ?")
                            .bind(username)
                            .fetch_optional(&mut *conn)
                            .await?;
                    if taken.is_some() {
                        return Err(AccountError::UsernameTaken(username.to_string()));
                    }
                    tracing::debug!(user_id, "user id collision, drawing another");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AccountError::IdsExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::time::Duration;

    const FAST_COST: u32 = 4;

    async fn service() -> AccountService {
        AccountService::new(
            Arc::new(test_pool().await),
            FAST_COST,
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn creates_account_with_hashed_password() {
        let accounts = service().await;
        let account = accounts.create("ada", "correct horse").await.unwrap();
        assert_eq!(account.username, "ada");
        assert!(USER_ID_RANGE.contains(&account.user_id));

        let stored: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE username = 'ada'")
            .fetch_one(&*accounts.db)
            .await
            .unwrap();
        assert_ne!(stored, "correct horse");
        assert!(stored.starts_with("$2"));

        assert!(bcrypt::verify("correct horse", &stored).unwrap());
        assert!(!bcrypt::verify("wrong", &stored).unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_is_refused() {
        let accounts = service().await;
        accounts.create("ada", "one").await.unwrap();
        assert!(matches!(
            accounts.create("ada", "two").await,
            Err(AccountError::UsernameTaken(name)) if name == "ada"
        ));
    }

    #[tokio::test]
    async fn blank_fields_are_refused() {
        let accounts = service().await;
        assert!(matches!(
            accounts.create("  ", "secret").await,
            Err(AccountError::MissingField)
        ));
        assert!(matches!(
            accounts.create("ada", "").await,
            Err(AccountError::MissingField)
        ));
    }

    #[tokio::test]
    async fn out_of_range_cost_is_a_hash_error() {
        let accounts = AccountService::new(
            Arc::new(test_pool().await),
            2,
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        assert!(matches!(
            accounts.create("ada", "secret").await,
            Err(AccountError::Hash(_))
        ));
    }
}
