use async_trait::async_trait;
use shorturl_core::{
    Lookup, OwnerId, ReadRepository, Repository, Result, ShortKey, StatsRepository, StorageError,
    UserUrl,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS short_urls (
    id         BIGSERIAL PRIMARY KEY,
    user_id    VARCHAR(64)  NOT NULL DEFAULT '',
    short_key  VARCHAR(128) NOT NULL,
    url        TEXT         NOT NULL,
    is_deleted BOOLEAN      NOT NULL DEFAULT FALSE
)
"#;

const CREATE_KEY_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS short_urls_short_key_idx ON short_urls (short_key)";

const CREATE_URL_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS short_urls_active_url_idx \
     ON short_urls (url) WHERE NOT is_deleted";

/// Connection settings for [`PostgresRepository::connect_with`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresSettings {
    #[builder(setter(into))]
    pub dsn: String,
    #[builder(default = 5)]
    pub max_connections: u32,
    #[builder(default = Duration::from_secs(5))]
    pub acquire_timeout: Duration,
}

/// Postgres implementation of the repository contract.
///
/// Key uniqueness covers every row, tombstoned or not, so a key is never
/// reused. URL uniqueness is a partial index over active rows only. On a
/// unique violation `set` looks the URL up among active rows: a hit is a
/// conflict with that row's key, a miss means the key index rejected the
/// insert. Concurrency control is left to the database.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool with default settings.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(PostgresSettings::builder().dsn(database_url).build()).await
    }

    pub async fn connect_with(settings: PostgresSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.dsn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_active_key(&self, url: &str) -> Result<Option<ShortKey>> {
        let row = sqlx::query(
            r#"
            SELECT short_key
            FROM short_urls
            WHERE url = $1
              AND NOT is_deleted
            LIMIT 1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| read_key(&row, "short_key")).transpose()
    }
}

fn read_key(row: &PgRow, column: &str) -> Result<ShortKey> {
    let raw: String = row.try_get(column).map_err(map_sqlx_error)?;
    Ok(ShortKey::new_unchecked(raw))
}

fn read_count(row: &PgRow) -> Result<u64> {
    let count: i64 = row.try_get(0).map_err(map_sqlx_error)?;
    u64::try_from(count)
        .map_err(|_| StorageError::InvalidData(format!("negative row count: {count}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn get(&self, key: &ShortKey) -> Result<Lookup> {
        let row = sqlx::query(
            r#"
            SELECT url, short_key, is_deleted
            FROM short_urls
            WHERE short_key = $1
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(key.to_string()));
        };

        Ok(Lookup {
            original_url: row.try_get("url").map_err(map_sqlx_error)?,
            short_key: read_key(&row, "short_key")?,
            deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
        })
    }

    async fn get_user_urls(&self, owner: &OwnerId) -> Result<Vec<UserUrl>> {
        let rows = sqlx::query(
            r#"
            SELECT short_key, url, is_deleted
            FROM short_urls
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(UserUrl {
                    short_key: read_key(row, "short_key")?,
                    original_url: row.try_get("url").map_err(map_sqlx_error)?,
                    deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn bootstrap(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for statement in [CREATE_TABLE, CREATE_KEY_INDEX, CREATE_URL_INDEX] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        info!("postgres schema is ready");
        Ok(())
    }

    async fn set(&self, owner: &OwnerId, key: &ShortKey, url: &str) -> Result<ShortKey> {
        let result = sqlx::query(
            r#"
            INSERT INTO short_urls (user_id, short_key, url)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(owner.as_str())
        .bind(key.as_str())
        .bind(url)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(key.clone()),
            Err(err) if is_unique_violation(&err) => match self.find_active_key(url).await? {
                Some(existing) => {
                    debug!(key = %existing, "url already shortened");
                    Err(StorageError::Conflict(existing))
                }
                None => Err(StorageError::KeyTaken(key.to_string())),
            },
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn delete(&self, owner: &OwnerId, key: &ShortKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE short_urls
            SET is_deleted = TRUE
            WHERE short_key = $1
              AND user_id = $2
              AND NOT is_deleted
            "#,
        )
        .bind(key.as_str())
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            debug!(key = %key, owner = %owner, "delete had no effect");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl StatsRepository for PostgresRepository {
    async fn count_urls(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM short_urls WHERE NOT is_deleted")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        read_count(&row)
    }

    async fn count_users(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(DISTINCT user_id) FROM short_urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        read_count(&row)
    }
}
