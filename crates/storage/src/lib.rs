use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{PresentationState, Slide},
    protocol::{Snapshot, SnapshotSummary},
};

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlobSummary {
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool_options = if database_url.starts_with(MEMORY_URL) {
            // Every in-memory connection is its own database; pin a single one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run storage migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn load_presentation(&self, id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT id, slides, current_slide_index, updated_at FROM presentations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load presentation '{id}'"))?;
        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// Whole-state replacement keyed by `id`; returns the stored value.
    pub async fn upsert_presentation(
        &self,
        id: &str,
        state: &PresentationState,
    ) -> Result<Snapshot> {
        let slides = serde_json::to_string(&state.slides).context("failed to encode slides")?;
        let row = sqlx::query(
            "INSERT INTO presentations (id, slides, current_slide_index, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                slides = excluded.slides,
                current_slide_index = excluded.current_slide_index,
                updated_at = excluded.updated_at
             RETURNING id, slides, current_slide_index, updated_at",
        )
        .bind(id)
        .bind(slides)
        .bind(state.current_slide_index)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to upsert presentation '{id}'"))?;
        snapshot_from_row(&row)
    }

    /// Newest first. `exclude` keeps a reserved key (the live state) out of the listing.
    pub async fn list_presentations(&self, exclude: Option<&str>) -> Result<Vec<SnapshotSummary>> {
        let rows = sqlx::query(
            "SELECT id, updated_at FROM presentations
             WHERE ? IS NULL OR id <> ?
             ORDER BY updated_at DESC, id ASC",
        )
        .bind(exclude)
        .bind(exclude)
        .fetch_all(&self.pool)
        .await
        .context("failed to list presentations")?;

        rows.into_iter()
            .map(|r| -> Result<SnapshotSummary> {
                Ok(SnapshotSummary {
                    id: r.try_get::<String, _>(0)?,
                    updated_at: r.try_get::<DateTime<Utc>, _>(1)?,
                })
            })
            .collect()
    }

    pub async fn delete_presentation(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM presentations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete presentation '{id}'"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Fails if `name` already exists; blobs are never overwritten.
    pub async fn store_blob(&self, name: &str, content_type: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO blobs (name, content_type, bytes, size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(content_type)
        .bind(bytes)
        .bind(i64::try_from(bytes.len()).unwrap_or(i64::MAX))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store blob '{name}'"))?;
        Ok(())
    }

    pub async fn load_blob(&self, name: &str) -> Result<Option<StoredBlob>> {
        let row = sqlx::query(
            "SELECT name, content_type, bytes, created_at FROM blobs WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load blob '{name}'"))?;
        row.map(|r| -> Result<StoredBlob> {
            Ok(StoredBlob {
                name: r.try_get(0)?,
                content_type: r.try_get(1)?,
                bytes: r.try_get(2)?,
                created_at: r.try_get(3)?,
            })
        })
        .transpose()
    }

    pub async fn list_blobs(&self, limit: u32) -> Result<Vec<BlobSummary>> {
        let rows = sqlx::query(
            "SELECT name, size_bytes, created_at FROM blobs
             ORDER BY created_at DESC, name DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list blobs")?;

        rows.into_iter()
            .map(|r| -> Result<BlobSummary> {
                Ok(BlobSummary {
                    name: r.try_get(0)?,
                    size_bytes: u64::try_from(r.try_get::<i64, _>(1)?).unwrap_or_default(),
                    created_at: r.try_get(2)?,
                })
            })
            .collect()
    }

    pub async fn delete_blob(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete blob '{name}'"))?;
        Ok(result.rows_affected() > 0)
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot> {
    let id: String = row.try_get(0)?;
    let raw_slides: String = row.try_get(1)?;
    let slides: Vec<Slide> = serde_json::from_str(&raw_slides)
        .with_context(|| format!("corrupt slides column for presentation '{id}'"))?;
    Ok(Snapshot {
        state: PresentationState {
            slides,
            current_slide_index: row.try_get(2)?,
        },
        updated_at: row.try_get(3)?,
        id,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with(MEMORY_URL) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
