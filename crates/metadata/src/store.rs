//! Record store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::ImageRepo;
use async_trait::async_trait;
use imagegate_core::config::MetadataConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Combined record store trait.
#[async_trait]
pub trait RecordStore: ImageRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Release pooled connections on shutdown.
    async fn close(&self) {}
}

/// SQLite-based record store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database described by `config` and run
    /// migrations.
    pub async fn new(config: &MetadataConfig) -> MetadataResult<Self> {
        let path = config.path.as_path();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Writers wait for the lock instead of failing with "database is locked".
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(config.conn_max_lifetime())
            .acquire_timeout(config.query_timeout())
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: config.query_timeout(),
        };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            max_connections = config.max_connections,
            query_timeout_secs = config.query_timeout_secs,
            "record store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run `fut` under the query timeout. Dropping the future on expiry rolls
    /// back any open transaction.
    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> MetadataResult<T>
    where
        F: Future<Output = MetadataResult<T>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_secs = self.query_timeout.as_secs(),
                    "database operation timed out"
                );
                Err(MetadataError::Timeout {
                    operation,
                    timeout_secs: self.query_timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.timed("health_check", async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, MetadataError>(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use imagegate_core::PublicHandle;

    fn map_unique_violation(err: sqlx::Error) -> MetadataError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return MetadataError::Constraint(db_err.message().to_string());
        }
        err.into()
    }

    #[async_trait]
    impl ImageRepo for SqliteStore {
        async fn insert_image(&self, image: &NewImage) -> MetadataResult<ImageRow> {
            self.timed("insert_image", async {
                let mut tx = self.pool.begin().await?;
                let row = sqlx::query_as::<_, ImageRow>(
                    r#"
                    INSERT INTO images (
                        backing_reference, public_handle, proxy_path, ip_address,
                        user_agent, uploaded_at, filename, content_type
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING *
                    "#,
                )
                .bind(&image.backing_reference)
                .bind(image.public_handle.to_string())
                .bind(&image.proxy_path)
                .bind(&image.ip_address)
                .bind(&image.user_agent)
                .bind(image.uploaded_at)
                .bind(&image.filename)
                .bind(&image.content_type)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_unique_violation)?;
                tx.commit().await?;
                Ok::<_, MetadataError>(row)
            })
            .await
        }

        async fn get_image_by_handle(
            &self,
            handle: &PublicHandle,
        ) -> MetadataResult<Option<ImageRow>> {
            self.timed("get_image_by_handle", async {
                let row =
                    sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE public_handle = ?")
                        .bind(handle.to_string())
                        .fetch_optional(&self.pool)
                        .await?;
                Ok::<_, MetadataError>(row)
            })
            .await
        }

        async fn get_image(&self, id: i64) -> MetadataResult<Option<ImageRow>> {
            self.timed("get_image", async {
                let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok::<_, MetadataError>(row)
            })
            .await
        }

        async fn toggle_active(&self, id: i64) -> MetadataResult<ImageRow> {
            self.timed("toggle_active", async {
                sqlx::query_as::<_, ImageRow>(
                    "UPDATE images SET is_active = NOT is_active WHERE id = ? RETURNING *",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("image {id}")))
            })
            .await
        }

        async fn increment_view_count(&self, handle: &PublicHandle) -> MetadataResult<()> {
            self.timed("increment_view_count", async {
                sqlx::query("UPDATE images SET view_count = view_count + 1 WHERE public_handle = ?")
                    .bind(handle.to_string())
                    .execute(&self.pool)
                    .await?;
                Ok::<_, MetadataError>(())
            })
            .await
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backing_reference TEXT NOT NULL,
    public_handle TEXT NOT NULL,
    proxy_path TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    user_agent TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    view_count INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_images_public_handle ON images(public_handle);
CREATE UNIQUE INDEX IF NOT EXISTS idx_images_proxy_path ON images(proxy_path);
CREATE INDEX IF NOT EXISTS idx_images_uploaded_at ON images(uploaded_at);
CREATE INDEX IF NOT EXISTS idx_images_is_active ON images(is_active);
"#;
