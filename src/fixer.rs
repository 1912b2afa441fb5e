//! Batch orchestration of reference fixing runs.
//!
//! Given migration batches and/or explicit target spaces, enumerates the
//! documents to visit, runs the rewriter over each, persists changed documents
//! (unless dry-running) and accumulates run statistics. A handful of bad
//! documents or references never aborts the run; the only external stop is the
//! cooperative cancel token, checked between documents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::docstore::{BatchSource, DocumentStore, MigrationBatch};
use crate::id::new_uuid_v7;
use crate::markup::{MacroCatalog, MarkupCodec};
use crate::model::{RefKindHint, TargetRef};
use crate::report;
use crate::rewriter::{FixConfig, ReferenceRewriter};
use crate::stats::FixCounts;
use crate::store::MappingStore;
use crate::AppResult;

/// Batch input property the importer records its base URL under.
const BASE_URL_PROPERTY: &str = "baseUrl";

const SAVE_COMMENT: &str = "Fixed cross-document references after migration";

/// Caller-facing parameters for one fixing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    /// Migration batches to process.
    #[serde(default)]
    pub batches: Vec<String>,
    /// Explicit target spaces to process.
    #[serde(default)]
    pub spaces: Vec<String>,
    /// Known source-system base URLs; derived from the batch's recorded input
    /// properties when omitted.
    #[serde(default)]
    pub base_urls: Vec<String>,
    #[serde(default)]
    pub ref_kind: RefKindHint,
    /// Bypass the manifest shortcuts and scan every document of the batch.
    #[serde(default)]
    pub exhaustive: bool,
    /// Persist without recording a new revision.
    #[serde(default)]
    pub update_in_place: bool,
    /// Compute and report intended changes without persisting anything.
    #[serde(default)]
    pub dry_run: bool,
    /// Document the report artifacts are attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_document: Option<TargetRef>,
    /// Local directory for report files, in addition to the attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_dir: Option<PathBuf>,
    /// Macro name → parameter names that carry document references.
    #[serde(default)]
    pub reference_macros: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_link_prefix: Option<String>,
}

/// Cooperative cancellation signal, checked at per-document loop boundaries —
/// never mid-document.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress sink for the per-step counters.
pub trait FixProgress {
    fn emit(&mut self, step: usize, total_steps: usize, counts: &FixCounts, completed: bool);
}

pub struct SilentProgress;

impl FixProgress for SilentProgress {
    fn emit(&mut self, _step: usize, _total_steps: usize, _counts: &FixCounts, _completed: bool) {}
}

pub struct MigrationFixer<'a, D, B, M, C> {
    store: &'a MappingStore,
    docs: &'a D,
    batches: &'a B,
    codec: &'a M,
    macros: &'a C,
}

impl<'a, D, B, M, C> MigrationFixer<'a, D, B, M, C>
where
    D: DocumentStore,
    B: BatchSource,
    M: MarkupCodec + Sync,
    C: MacroCatalog + Sync,
{
    pub fn new(
        store: &'a MappingStore,
        docs: &'a D,
        batches: &'a B,
        codec: &'a M,
        macros: &'a C,
    ) -> Self {
        MigrationFixer {
            store,
            docs,
            batches,
            codec,
            macros,
        }
    }

    pub async fn run(
        &self,
        request: &FixRequest,
        cancel: &CancelToken,
        progress: &mut dyn FixProgress,
    ) -> AppResult<FixCounts> {
        let run_id = new_uuid_v7();
        let started = Instant::now();
        let total_steps = request.batches.len() + request.spaces.len();

        tracing::info!(
            target: "pagelift",
            event = "fix_run_start",
            run_id = %run_id,
            batches = request.batches.len(),
            spaces = request.spaces.len(),
            dry_run = request.dry_run,
            exhaustive = request.exhaustive,
        );

        let _ = self.store.activate().await?;

        let mut counts = FixCounts::default();
        let mut step = 0usize;

        for batch_id in &request.batches {
            if cancel.is_cancelled() {
                break;
            }
            step += 1;
            if let Err(err) = self.fix_batch(batch_id, request, cancel, &mut counts).await {
                tracing::error!(
                    target: "pagelift",
                    event = "batch_failed",
                    batch = %batch_id,
                    error = %err,
                );
            }
            progress.emit(step, total_steps, &counts, false);
        }

        for space in &request.spaces {
            if cancel.is_cancelled() {
                break;
            }
            step += 1;
            let config = self.config_for(request, None);
            let rewriter = ReferenceRewriter::new(self.store, self.codec, self.macros, &config);
            match self.docs.list_by_prefix(&format!("{space}.")).await {
                Ok(references) => {
                    self.fix_documents(&rewriter, &references, request, cancel, &mut counts)
                        .await;
                }
                Err(err) => {
                    tracing::error!(
                        target: "pagelift",
                        event = "space_enumeration_failed",
                        space = %space,
                        error = %err,
                    );
                }
            }
            progress.emit(step, total_steps, &counts, false);
        }

        if cancel.is_cancelled() {
            tracing::warn!(target: "pagelift", event = "fix_run_cancelled", run_id = %run_id);
        }

        progress.emit(step, total_steps, &counts, true);
        self.persist_reports(&run_id, request, &counts).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            target: "pagelift",
            event = "fix_run_done",
            run_id = %run_id,
            duration_ms,
            successful_refs = counts.successful_refs,
            failed_refs = counts.failed_refs,
            successful_docs = counts.successful_docs,
            unchanged_docs = counts.unchanged_docs,
            failed_docs = counts.failed_docs,
        );
        Ok(counts)
    }

    async fn fix_batch(
        &self,
        batch_id: &str,
        request: &FixRequest,
        cancel: &CancelToken,
        counts: &mut FixCounts,
    ) -> AppResult<()> {
        let batch = self.batches.batch(batch_id).await?;
        let config = self.config_for(request, Some(&batch));
        let rewriter = ReferenceRewriter::new(self.store, self.codec, self.macros, &config);

        let references = self.enumerate_batch(&batch, request).await?;
        tracing::info!(
            target: "pagelift",
            event = "batch_start",
            batch = %batch.id,
            documents = references.len(),
        );
        self.fix_documents(&rewriter, &references, request, cancel, counts)
            .await;
        Ok(())
    }

    /// Document enumeration strategies, cheapest first.
    async fn enumerate_batch(
        &self,
        batch: &MigrationBatch,
        request: &FixRequest,
    ) -> AppResult<Vec<TargetRef>> {
        if !request.exhaustive {
            // (a) importer's reference warnings, current entries only: a
            // warning is stale once a newer import bumped the document version.
            let current: Vec<TargetRef> = batch
                .reference_warnings
                .iter()
                .filter(|warning| {
                    batch.imported_versions.get(warning.document.as_str())
                        == Some(&warning.version)
                })
                .map(|warning| warning.document.clone())
                .collect();
            if !current.is_empty() {
                tracing::debug!(
                    target: "pagelift",
                    event = "enumerate_reference_warnings",
                    batch = %batch.id,
                    documents = current.len(),
                );
                return Ok(current);
            }

            // (b) the legacy broken-links manifest.
            if let Some(manifest) = &batch.broken_links_pages {
                let documents = manifest.documents();
                if !documents.is_empty() {
                    tracing::debug!(
                        target: "pagelift",
                        event = "enumerate_broken_links_manifest",
                        batch = %batch.id,
                        documents = documents.len(),
                    );
                    return Ok(documents);
                }
            }
        }

        // (c) every document under the batch's root space. Slow path.
        tracing::info!(
            target: "pagelift",
            event = "enumerate_exhaustive",
            batch = %batch.id,
            root_space = %batch.root_space,
        );
        self.docs
            .list_by_prefix(&format!("{}.", batch.root_space))
            .await
    }

    async fn fix_documents(
        &self,
        rewriter: &ReferenceRewriter<'_, M, C>,
        references: &[TargetRef],
        request: &FixRequest,
        cancel: &CancelToken,
        counts: &mut FixCounts,
    ) {
        for reference in references {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.fix_document(rewriter, reference, request, counts).await {
                counts.record_failed_doc();
                tracing::error!(
                    target: "pagelift",
                    event = "document_failed",
                    document = %reference,
                    error = %err,
                );
            }
        }
    }

    async fn fix_document(
        &self,
        rewriter: &ReferenceRewriter<'_, M, C>,
        reference: &TargetRef,
        request: &FixRequest,
        counts: &mut FixCounts,
    ) -> AppResult<()> {
        let mut document = self.docs.get(reference).await?;
        let outcome = rewriter.rewrite_document(&mut document, counts).await?;

        if !outcome.changed {
            counts.record_unchanged_doc();
            return Ok(());
        }
        if request.dry_run {
            tracing::info!(
                target: "pagelift",
                event = "dry_run_update",
                document = %reference,
            );
            counts.record_updated_doc();
            return Ok(());
        }

        self.docs
            .save(&document, SAVE_COMMENT, request.update_in_place)
            .await?;
        counts.record_updated_doc();
        Ok(())
    }

    /// Effective rewriter configuration, deriving base URLs from the batch's
    /// recorded input properties when the caller supplied none.
    fn config_for(&self, request: &FixRequest, batch: Option<&MigrationBatch>) -> FixConfig {
        let mut base_urls = request.base_urls.clone();
        if base_urls.is_empty() {
            if let Some(raw) = batch.and_then(|b| b.input_properties.get(BASE_URL_PROPERTY)) {
                base_urls = raw
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect();
            }
        }
        FixConfig {
            base_urls,
            short_link_prefix: request.short_link_prefix.clone(),
            ref_kind: request.ref_kind,
            reference_macros: request.reference_macros.clone(),
        }
    }

    /// Report persistence is best-effort: a failed batch still produced a
    /// complete stats report, and a failed report write must not fail the run.
    async fn persist_reports(&self, run_id: &str, request: &FixRequest, counts: &FixCounts) {
        let stats = match report::stats_json(run_id, counts) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(
                    target: "pagelift",
                    event = "report_serialize_failed",
                    error = %err,
                );
                return;
            }
        };
        let failed_refs = report::failed_refs_tsv(counts);

        if let Some(status) = &request.status_document {
            for (name, data) in [
                (report::STATS_ATTACHMENT, stats.as_slice()),
                (report::FAILED_REFS_ATTACHMENT, failed_refs.as_slice()),
            ] {
                if let Err(err) = self.docs.write_attachment(status, name, data).await {
                    tracing::error!(
                        target: "pagelift",
                        event = "report_attach_failed",
                        document = %status,
                        attachment = %name,
                        error = %err,
                    );
                }
            }
        }

        if let Some(dir) = &request.reports_dir {
            if let Err(err) = report::write_report_files(dir, run_id, counts) {
                tracing::error!(
                    target: "pagelift",
                    event = "report_write_failed",
                    path = %dir.display(),
                    error = %err,
                );
            }
        }
    }
}
