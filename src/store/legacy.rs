//! One-time import of the legacy page-based mapping format.
//!
//! Older engine versions kept one record per source space, holding a
//! serialized title→reference or id→reference map; the record name carries an
//! `.ids` / `.titles` suffix. Each record either becomes rows in the two-index
//! store or is skipped as redundant; records that fail to parse are retained
//! for a retry on a future activation.

use std::collections::{BTreeMap, HashMap};

use futures::TryStreamExt;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

use super::{table_exists, MappingStore};
use crate::model::TargetRef;
use crate::{AppError, AppResult};

const LEGACY_TABLE: &str = "mapping_pages";
const TITLE_SUFFIX: &str = ".titles";
const ID_SUFFIX: &str = ".ids";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Titles,
    Ids,
}

struct LegacyRecord {
    space: String,
    kind: RecordKind,
}

impl LegacyRecord {
    fn from_name(name: &str) -> Option<LegacyRecord> {
        if let Some(space) = name.strip_suffix(TITLE_SUFFIX) {
            return Some(LegacyRecord {
                space: space.to_string(),
                kind: RecordKind::Titles,
            });
        }
        if let Some(space) = name.strip_suffix(ID_SUFFIX) {
            return Some(LegacyRecord {
                space: space.to_string(),
                kind: RecordKind::Ids,
            });
        }
        None
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LegacySummary {
    pub scanned_records: u64,
    pub imported_records: u64,
    pub imported_entries: u64,
    pub redundant_records: u64,
    pub failed_records: u64,
    pub deleted_records: u64,
}

pub(super) async fn run(store: &MappingStore) -> AppResult<LegacySummary> {
    let mut summary = LegacySummary::default();

    let mut tx = store.begin("legacy_scan").await?;
    if !table_exists(&mut tx, LEGACY_TABLE).await? {
        store.commit(tx, "legacy_scan").await?;
        return Ok(summary);
    }
    let mut records: Vec<(String, String)> = Vec::new();
    {
        let mut rows =
            sqlx::query_as::<_, (String, String)>("SELECT name, payload FROM mapping_pages ORDER BY name")
                .fetch(tx.as_mut());
        while let Some(row) = rows.try_next().await.map_err(|err| {
            AppError::from(err).with_context("operation", "legacy_scan")
        })? {
            records.push(row);
        }
    }
    store.commit(tx, "legacy_scan").await?;
    summary.scanned_records = records.len() as u64;

    // Redundancy is judged against what existed before this pass, so importing
    // a space's titles record must not make its ids record look redundant.
    let mut preexisting: HashMap<String, bool> = HashMap::new();
    for (name, _) in &records {
        if let Some(record) = LegacyRecord::from_name(name) {
            if !preexisting.contains_key(&record.space) {
                let present = store.space_has_entries(&record.space).await?;
                preexisting.insert(record.space, present);
            }
        }
    }

    let mut to_delete: Vec<String> = Vec::new();
    for (name, payload) in &records {
        let Some(record) = LegacyRecord::from_name(name) else {
            tracing::warn!(
                target: "pagelift",
                event = "legacy_record_unrecognized",
                name = %name,
            );
            summary.failed_records += 1;
            continue;
        };

        if preexisting.get(&record.space).copied().unwrap_or(false) {
            summary.redundant_records += 1;
            to_delete.push(name.clone());
            continue;
        }

        match import_record(store, &record, payload).await {
            Ok(count) => {
                summary.imported_records += 1;
                summary.imported_entries += count;
                to_delete.push(name.clone());
            }
            Err(err) => {
                tracing::warn!(
                    target: "pagelift",
                    event = "legacy_record_failed",
                    name = %name,
                    error = %err,
                );
                summary.failed_records += 1;
            }
        }
    }

    summary.deleted_records = delete_records(store, &to_delete).await?;
    Ok(summary)
}

async fn import_record(
    store: &MappingStore,
    record: &LegacyRecord,
    payload: &str,
) -> AppResult<u64> {
    let map: BTreeMap<String, String> = serde_json::from_str(payload).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "legacy_parse_payload")
            .with_context("space_key", record.space.clone())
    })?;

    let mut imported = 0u64;
    for (key, target) in map {
        let target = TargetRef::new(target);
        match record.kind {
            RecordKind::Titles => {
                store.insert_title(&record.space, &key, &target).await?;
            }
            RecordKind::Ids => {
                let id = key.parse::<i64>().map_err(|err| {
                    AppError::new("LEGACY/BAD_ID", "Legacy id record holds a non-numeric key")
                        .with_context("space_key", record.space.clone())
                        .with_context("key", key.clone())
                        .with_context("cause", err.to_string())
                })?;
                store.insert_id(id, &record.space, &target).await?;
            }
        }
        imported += 1;
    }
    Ok(imported)
}

async fn delete_records(store: &MappingStore, names: &[String]) -> AppResult<u64> {
    if names.is_empty() {
        return Ok(0);
    }
    let mut tx = store.begin("legacy_delete_records").await?;
    let mut deleted = 0u64;
    for name in names {
        let result = sqlx::query("DELETE FROM mapping_pages WHERE name = ?1")
            .bind(name)
            .execute(tx.as_mut())
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "legacy_delete_records")
                    .with_context("name", name.clone())
            })?;
        deleted += result.rows_affected();
    }
    drop_if_drained(&mut tx).await?;
    store.commit(tx, "legacy_delete_records").await?;
    Ok(deleted)
}

async fn drop_if_drained(tx: &mut Transaction<'_, Sqlite>) -> AppResult<()> {
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mapping_pages")
        .fetch_one(tx.as_mut())
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "legacy_drop_table"))?;
    if remaining == 0 {
        sqlx::query("DROP TABLE mapping_pages")
            .execute(tx.as_mut())
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "legacy_drop_table"))?;
        tracing::info!(target: "pagelift", event = "legacy_table_dropped");
    }
    Ok(())
}
