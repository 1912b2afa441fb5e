//! Persistent two-index mapping store.
//!
//! Maps source page identifiers (numeric id, or space key + title) to target
//! document references. Backed by two SQLite tables that are created lazily on
//! first insert and physically dropped again once the last entry is removed,
//! so "no mapping exists" lookups short-circuit without touching schema.

pub mod dialect;
pub mod legacy;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::model::{MappingEntry, TargetRef};
use crate::{AppError, AppResult};

pub use dialect::Dialect;
pub use legacy::LegacySummary;

const ID_TABLE: &str = "mapping_by_id";
const TITLE_TABLE: &str = "mapping_by_title";

/// Opens the engine database with the pragmas every connection needs.
pub async fn open_pool(path: &Path) -> AppResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_open_pool")
                .with_context("path", parent.display().to_string())
        })?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "store_open_pool"))?;

    tracing::info!(target: "pagelift", event = "store_open", path = %path.display());
    Ok(pool)
}

async fn table_exists(tx: &mut Transaction<'_, Sqlite>, name: &str) -> AppResult<bool> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(name)
            .fetch_optional(tx.as_mut())
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "store_table_exists")
                    .with_context("table", name.to_string())
            })?;
    Ok(found.is_some())
}

async fn table_count(tx: &mut Transaction<'_, Sqlite>, name: &str) -> AppResult<u64> {
    if !table_exists(tx, name).await? {
        return Ok(0);
    }
    let sql = format!("SELECT COUNT(*) FROM {name}");
    let count: i64 = sqlx::query_scalar(&sql)
        .fetch_one(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_table_count")
                .with_context("table", name.to_string())
        })?;
    Ok(count as u64)
}

/// The identifier-mapping store.
///
/// Every operation runs inside its own transaction. Lookups never create the
/// backing tables: on an empty store they report "not found".
pub struct MappingStore {
    pool: SqlitePool,
    dialect: Dialect,
    legacy_checked: AtomicBool,
}

impl MappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        MappingStore {
            pool,
            dialect: Dialect::Sqlite,
            legacy_checked: AtomicBool::new(false),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn begin(&self, operation: &'static str) -> AppResult<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", operation))
    }

    async fn commit(
        &self,
        tx: Transaction<'_, Sqlite>,
        operation: &'static str,
    ) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", operation))
    }

    async fn ensure_tables(&self, tx: &mut Transaction<'_, Sqlite>) -> AppResult<()> {
        let id_sql = format!(
            "CREATE TABLE IF NOT EXISTS {ID_TABLE} (
                 source_id {} PRIMARY KEY,
                 space_key TEXT NOT NULL,
                 target TEXT NOT NULL
             )",
            self.dialect.id_column_type()
        );
        sqlx::query(&id_sql)
            .execute(tx.as_mut())
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "store_create_id_table"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mapping_by_title (
                 space_key TEXT NOT NULL,
                 title TEXT NOT NULL,
                 target TEXT NOT NULL,
                 PRIMARY KEY (space_key, title)
             )",
        )
        .execute(tx.as_mut())
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "store_create_title_table"))?;
        Ok(())
    }

    /// Lazy one-time import of the legacy page-based mapping format.
    ///
    /// Guarded by an in-memory flag: runs at most once per process lifetime.
    /// Returns the migration summary on the activation that actually ran.
    pub async fn activate(&self) -> AppResult<Option<LegacySummary>> {
        if self.legacy_checked.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let summary = legacy::run(self).await?;
        if summary.scanned_records > 0 {
            tracing::info!(
                target: "pagelift",
                event = "legacy_migration_done",
                imported_entries = summary.imported_entries,
                imported_records = summary.imported_records,
                redundant_records = summary.redundant_records,
                failed_records = summary.failed_records,
                deleted_records = summary.deleted_records,
            );
        }
        Ok(Some(summary))
    }

    pub async fn lookup_by_id(&self, id: i64) -> AppResult<Option<TargetRef>> {
        let mut tx = self.begin("store_lookup_by_id").await?;
        if !table_exists(&mut tx, ID_TABLE).await? {
            self.commit(tx, "store_lookup_by_id").await?;
            return Ok(None);
        }
        let target: Option<String> =
            sqlx::query_scalar("SELECT target FROM mapping_by_id WHERE source_id = ?1")
                .bind(id)
                .fetch_optional(tx.as_mut())
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "store_lookup_by_id")
                        .with_context("source_id", id.to_string())
                })?;
        self.commit(tx, "store_lookup_by_id").await?;
        Ok(target.map(TargetRef::new))
    }

    pub async fn lookup_by_title(
        &self,
        space_key: &str,
        title: &str,
    ) -> AppResult<Option<TargetRef>> {
        let mut tx = self.begin("store_lookup_by_title").await?;
        if !table_exists(&mut tx, TITLE_TABLE).await? {
            self.commit(tx, "store_lookup_by_title").await?;
            return Ok(None);
        }
        let target: Option<String> = sqlx::query_scalar(
            "SELECT target FROM mapping_by_title WHERE space_key = ?1 AND title = ?2",
        )
        .bind(space_key)
        .bind(title)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_lookup_by_title")
                .with_context("space_key", space_key.to_string())
                .with_context("title", title.to_string())
        })?;
        self.commit(tx, "store_lookup_by_title").await?;
        Ok(target.map(TargetRef::new))
    }

    /// Idempotent upsert into the id index. Creates the tables on first use.
    pub async fn insert_id(
        &self,
        id: i64,
        space_key: &str,
        target: &TargetRef,
    ) -> AppResult<()> {
        let mut tx = self.begin("store_insert_id").await?;
        self.ensure_tables(&mut tx).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO mapping_by_id (source_id, space_key, target)
             VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(space_key)
        .bind(target.as_str())
        .execute(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_insert_id")
                .with_context("source_id", id.to_string())
        })?;
        self.commit(tx, "store_insert_id").await
    }

    /// Idempotent upsert into the title index. Creates the tables on first use.
    pub async fn insert_title(
        &self,
        space_key: &str,
        title: &str,
        target: &TargetRef,
    ) -> AppResult<()> {
        let mut tx = self.begin("store_insert_title").await?;
        self.ensure_tables(&mut tx).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO mapping_by_title (space_key, title, target)
             VALUES (?1, ?2, ?3)",
        )
        .bind(space_key)
        .bind(title)
        .bind(target.as_str())
        .execute(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_insert_title")
                .with_context("space_key", space_key.to_string())
                .with_context("title", title.to_string())
        })?;
        self.commit(tx, "store_insert_title").await
    }

    /// Upserts both indexes for one entry in a single transaction.
    pub async fn insert_entry(&self, entry: &MappingEntry) -> AppResult<()> {
        let mut tx = self.begin("store_insert_entry").await?;
        self.ensure_tables(&mut tx).await?;
        if let Some(id) = entry.source_id {
            sqlx::query(
                "INSERT OR REPLACE INTO mapping_by_id (source_id, space_key, target)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(id)
            .bind(&entry.space_key)
            .bind(entry.target.as_str())
            .execute(tx.as_mut())
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "store_insert_entry")
                    .with_context("source_id", id.to_string())
            })?;
        }
        sqlx::query(
            "INSERT OR REPLACE INTO mapping_by_title (space_key, title, target)
             VALUES (?1, ?2, ?3)",
        )
        .bind(&entry.space_key)
        .bind(&entry.title)
        .bind(entry.target.as_str())
        .execute(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_insert_entry")
                .with_context("space_key", entry.space_key.clone())
                .with_context("title", entry.title.clone())
        })?;
        self.commit(tx, "store_insert_entry").await
    }

    /// The stored target reference for the space that sorts first by
    /// `(length, bytes)`.
    ///
    /// Disambiguation heuristic: when a caller needs any representative
    /// document of a migrated space (a space-home link) and exact title
    /// matching is unavailable, the shortest reference is the one closest to
    /// the space root.
    pub async fn shortest_reference_for_space(
        &self,
        space_key: &str,
    ) -> AppResult<Option<TargetRef>> {
        let mut tx = self.begin("store_shortest_reference").await?;
        if !table_exists(&mut tx, TITLE_TABLE).await? {
            self.commit(tx, "store_shortest_reference").await?;
            return Ok(None);
        }
        let target: Option<String> = sqlx::query_scalar(
            "SELECT target FROM mapping_by_title
              WHERE space_key = ?1
              ORDER BY LENGTH(target), target
              LIMIT 1",
        )
        .bind(space_key)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_shortest_reference")
                .with_context("space_key", space_key.to_string())
        })?;
        self.commit(tx, "store_shortest_reference").await?;
        Ok(target.map(TargetRef::new))
    }

    /// Source space key that produced `target`, by reverse lookup over the
    /// title index.
    pub async fn reverse_space_key(&self, target: &TargetRef) -> AppResult<Option<String>> {
        let mut tx = self.begin("store_reverse_space_key").await?;
        if !table_exists(&mut tx, TITLE_TABLE).await? {
            self.commit(tx, "store_reverse_space_key").await?;
            return Ok(None);
        }
        let space: Option<String> =
            sqlx::query_scalar("SELECT space_key FROM mapping_by_title WHERE target = ?1 LIMIT 1")
                .bind(target.as_str())
                .fetch_optional(tx.as_mut())
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "store_reverse_space_key")
                        .with_context("target", target.to_string())
                })?;
        self.commit(tx, "store_reverse_space_key").await?;
        Ok(space)
    }

    /// Deletes every entry whose source space equals `space_key` and returns
    /// how many rows went away. When the sweep leaves both indexes empty the
    /// backing tables are dropped.
    pub async fn remove_space(&self, space_key: &str) -> AppResult<u64> {
        let mut tx = self.begin("store_remove_space").await?;
        let mut removed = 0u64;
        for table in [ID_TABLE, TITLE_TABLE] {
            if !table_exists(&mut tx, table).await? {
                continue;
            }
            let sql = format!("DELETE FROM {table} WHERE space_key = ?1");
            let result = sqlx::query(&sql)
                .bind(space_key)
                .execute(tx.as_mut())
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "store_remove_space")
                        .with_context("table", table.to_string())
                        .with_context("space_key", space_key.to_string())
                })?;
            removed += result.rows_affected();
        }
        self.drop_if_empty(&mut tx).await?;
        self.commit(tx, "store_remove_space").await?;
        tracing::info!(
            target: "pagelift",
            event = "store_remove_space",
            space_key = %space_key,
            removed,
        );
        Ok(removed)
    }

    /// Enforced after every deletion sweep: an empty store has no tables.
    async fn drop_if_empty(&self, tx: &mut Transaction<'_, Sqlite>) -> AppResult<()> {
        let id_present = table_exists(tx, ID_TABLE).await?;
        let title_present = table_exists(tx, TITLE_TABLE).await?;
        if !id_present && !title_present {
            return Ok(());
        }
        if table_count(tx, ID_TABLE).await? > 0 || table_count(tx, TITLE_TABLE).await? > 0 {
            return Ok(());
        }
        for table in [ID_TABLE, TITLE_TABLE] {
            let sql = format!("DROP TABLE IF EXISTS {table}");
            sqlx::query(&sql).execute(tx.as_mut()).await.map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "store_drop_empty")
                    .with_context("table", table.to_string())
            })?;
        }
        tracing::info!(target: "pagelift", event = "store_dropped_empty_tables");
        Ok(())
    }

    /// Total live entries across both indexes.
    pub async fn count(&self) -> AppResult<u64> {
        let mut tx = self.begin("store_count").await?;
        let total = table_count(&mut tx, ID_TABLE).await? + table_count(&mut tx, TITLE_TABLE).await?;
        self.commit(tx, "store_count").await?;
        Ok(total)
    }

    /// Whether any index already holds entries for the given source space.
    pub(crate) async fn space_has_entries(&self, space_key: &str) -> AppResult<bool> {
        let mut tx = self.begin("store_space_has_entries").await?;
        let mut found = false;
        for table in [ID_TABLE, TITLE_TABLE] {
            if !table_exists(&mut tx, table).await? {
                continue;
            }
            let sql = format!("SELECT 1 FROM {table} WHERE space_key = ?1 LIMIT 1");
            let hit: Option<i64> = sqlx::query_scalar(&sql)
                .bind(space_key)
                .fetch_optional(tx.as_mut())
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "store_space_has_entries")
                        .with_context("table", table.to_string())
                })?;
            if hit.is_some() {
                found = true;
                break;
            }
        }
        self.commit(tx, "store_space_has_entries").await?;
        Ok(found)
    }
}
