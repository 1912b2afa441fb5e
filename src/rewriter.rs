//! The per-document reference rewriter.
//!
//! One document moves through a fixed sequence: visit the content tree, visit
//! the comments, visit embedded-diagram attachments, then report whether
//! anything changed. Resolution failures never mutate content and never abort
//! the document; they are tallied with the raw reference text. Every resolved
//! reference is rewritten into the canonical `doc:` form, which a later pass
//! recognizes and skips — running the rewriter twice is a no-op.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::broken_link::{self, BrokenLink};
use crate::content::{Block, ContentTree};
use crate::docstore::Document;
use crate::markup::{MacroCatalog, MarkupCodec};
use crate::model::{RefKindHint, SourceRef, TypedRef, DOC_PREFIX, URL_PREFIX};
use crate::resolve::url::{UrlMapperSet, UrlOutcome};
use crate::resolve::{self, ResolverContext};
use crate::stats::FixCounts;
use crate::store::MappingStore;
use crate::{AppError, AppResult};

/// Caller configuration for reference repair.
#[derive(Debug, Clone, Default)]
pub struct FixConfig {
    /// Known source-system base URLs.
    pub base_urls: Vec<String>,
    /// Short-link path prefix; defaults to `/x/`.
    pub short_link_prefix: Option<String>,
    pub ref_kind: RefKindHint,
    /// Macro name → parameter names that carry document references.
    pub reference_macros: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocOutcome {
    pub changed: bool,
}

pub struct ReferenceRewriter<'a, M, C> {
    store: &'a MappingStore,
    codec: &'a M,
    macros: &'a C,
    mappers: UrlMapperSet,
    ref_kind: RefKindHint,
    reference_macros: &'a BTreeMap<String, Vec<String>>,
}

impl<'a, M: MarkupCodec + Sync, C: MacroCatalog + Sync> ReferenceRewriter<'a, M, C> {
    pub fn new(
        store: &'a MappingStore,
        codec: &'a M,
        macros: &'a C,
        config: &'a FixConfig,
    ) -> Self {
        ReferenceRewriter {
            store,
            codec,
            macros,
            mappers: UrlMapperSet::new(&config.base_urls, config.short_link_prefix.as_deref()),
            ref_kind: config.ref_kind,
            reference_macros: &config.reference_macros,
        }
    }

    /// Runs the full visitor sequence over one document.
    ///
    /// The document is mutated in memory only; persistence is the caller's
    /// decision. An error from any step is terminal for this document.
    pub async fn rewrite_document(
        &self,
        doc: &mut Document,
        counts: &mut FixCounts,
    ) -> AppResult<DocOutcome> {
        let self_space = self.store.reverse_space_key(&doc.reference).await?;
        let ctx = ResolverContext {
            store: self.store,
            self_space,
        };

        let mut changed = false;

        match self.codec.parse(&doc.content, &doc.syntax) {
            Some(mut tree) => {
                if self.visit_tree(&mut tree, &ctx, &doc.syntax, counts).await? {
                    match self.codec.render(&tree, &doc.syntax) {
                        Some(text) => {
                            doc.content = text;
                            changed = true;
                        }
                        None => {
                            return Err(AppError::new(
                                "FIX/RENDER",
                                "Failed to render updated content",
                            )
                            .with_context("document", doc.reference.to_string()))
                        }
                    }
                }
            }
            None => {
                tracing::warn!(
                    target: "pagelift",
                    event = "content_parse_failed",
                    document = %doc.reference,
                    syntax = %doc.syntax,
                );
            }
        }

        changed |= self.visit_comments(doc, &ctx, counts).await?;
        changed |= self.visit_attachments(doc, &ctx, counts).await?;

        tracing::debug!(
            target: "pagelift",
            event = "document_visited",
            document = %doc.reference,
            changed,
        );
        Ok(DocOutcome { changed })
    }

    /// Walks every block in document order, recursing into markup macro bodies.
    fn visit_tree<'b>(
        &'b self,
        tree: &'b mut ContentTree,
        ctx: &'b ResolverContext<'b>,
        syntax: &'b str,
        counts: &'b mut FixCounts,
    ) -> BoxFuture<'b, AppResult<bool>> {
        async move {
            let mut changed = false;
            for id in tree.walk() {
                match tree.block(id).clone() {
                    Block::Link { reference, label } => {
                        let repaired = self.repair_reference(ctx, &reference, counts).await;
                        if let Some(new_ref) = repaired {
                            tree.replace(
                                id,
                                Block::Link {
                                    reference: new_ref,
                                    label,
                                },
                            );
                            changed = true;
                        }
                    }
                    Block::Image { reference } => {
                        let repaired = self.repair_reference(ctx, &reference, counts).await;
                        if let Some(new_ref) = repaired {
                            tree.replace(id, Block::Image { reference: new_ref });
                            changed = true;
                        }
                    }
                    Block::Macro {
                        name,
                        mut params,
                        mut body,
                    } => {
                        let mut macro_changed = false;

                        if let Some(param_names) = self.reference_macros.get(&name) {
                            for param in param_names {
                                let repaired = self
                                    .repair_macro_param(ctx, params.get(param), counts)
                                    .await;
                                if let Some(new_value) = repaired {
                                    params.insert(param.clone(), new_value);
                                    macro_changed = true;
                                }
                            }
                        }

                        if self.ref_kind.tries_typed() {
                            for (key, value) in params.clone() {
                                if !TypedRef::is_typed(&value) {
                                    continue;
                                }
                                let repaired = self.repair_typed(ctx, &value, counts).await;
                                if let Some(new_value) = repaired {
                                    params.insert(key, new_value);
                                    macro_changed = true;
                                }
                            }
                        }

                        if let Some(raw_body) = body.clone() {
                            if self.macros.accepts_markup(&name) {
                                match self.codec.parse(&raw_body, syntax) {
                                    Some(mut subtree) => {
                                        if self
                                            .visit_tree(&mut subtree, ctx, syntax, counts)
                                            .await?
                                        {
                                            match self.codec.render(&subtree, syntax) {
                                                Some(text) => {
                                                    body = Some(text);
                                                    macro_changed = true;
                                                }
                                                None => {
                                                    tracing::warn!(
                                                        target: "pagelift",
                                                        event = "macro_body_render_failed",
                                                        macro_name = %name,
                                                    );
                                                }
                                            }
                                        }
                                    }
                                    None => {
                                        tracing::debug!(
                                            target: "pagelift",
                                            event = "macro_body_parse_failed",
                                            macro_name = %name,
                                        );
                                    }
                                }
                            }
                        }

                        if macro_changed {
                            tree.replace(id, Block::Macro { name, params, body });
                            changed = true;
                        }
                    }
                    Block::Text(_) => {}
                }
            }
            Ok(changed)
        }
        .boxed()
    }

    /// Same repair logic over each comment's body, parsed independently.
    async fn visit_comments(
        &self,
        doc: &mut Document,
        ctx: &ResolverContext<'_>,
        counts: &mut FixCounts,
    ) -> AppResult<bool> {
        let syntax = doc.syntax.clone();
        let mut changed = false;
        for comment in &mut doc.comments {
            let Some(mut tree) = self.codec.parse(&comment.body, &syntax) else {
                tracing::warn!(
                    target: "pagelift",
                    event = "comment_parse_failed",
                    document = %doc.reference,
                    comment = %comment.id,
                );
                continue;
            };
            if self.visit_tree(&mut tree, ctx, &syntax, counts).await? {
                match self.codec.render(&tree, &syntax) {
                    Some(text) => {
                        comment.body = text;
                        changed = true;
                    }
                    None => {
                        tracing::warn!(
                            target: "pagelift",
                            event = "comment_render_failed",
                            document = %doc.reference,
                            comment = %comment.id,
                        );
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Repairs absolute URLs inside embedded-diagram attachments.
    ///
    /// A diagram payload only ever contains absolute URLs, so only the URL
    /// mappers run here. The attachment is written back only when a field
    /// actually changed.
    async fn visit_attachments(
        &self,
        doc: &mut Document,
        ctx: &ResolverContext<'_>,
        counts: &mut FixCounts,
    ) -> AppResult<bool> {
        let names: HashSet<String> = doc
            .attachments
            .iter()
            .map(|a| a.filename.clone())
            .collect();
        let mut changed = false;

        for idx in 0..doc.attachments.len() {
            let filename = doc.attachments[idx].filename.clone();
            // A diagram is recognized by its rendered preview image sharing
            // the same base name.
            if filename.ends_with(".png") || !names.contains(&format!("{filename}.png")) {
                continue;
            }

            let payload: Value = match serde_json::from_slice(&doc.attachments[idx].data) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        target: "pagelift",
                        event = "diagram_parse_failed",
                        document = %doc.reference,
                        attachment = %filename,
                        error = %err,
                    );
                    continue;
                }
            };

            let mut candidates = BTreeSet::new();
            collect_diagram_urls(&payload, &mut candidates);

            let mut replacements: BTreeMap<String, String> = BTreeMap::new();
            for raw in candidates {
                match self.mappers.resolve(ctx.store, &raw).await {
                    Ok(UrlOutcome::Resolved(res)) => {
                        counts.record_resolved_ref();
                        replacements.insert(raw, res.to_reference());
                    }
                    Ok(UrlOutcome::Unresolved) => counts.record_failed_ref(&raw),
                    Ok(UrlOutcome::Foreign) => {}
                    Err(err) => {
                        tracing::warn!(
                            target: "pagelift",
                            event = "diagram_url_resolve_failed",
                            reference = %raw,
                            error = %err,
                        );
                        counts.record_failed_ref(&raw);
                    }
                }
            }

            if replacements.is_empty() {
                continue;
            }

            let mut updated = payload;
            apply_diagram_urls(&mut updated, &replacements);
            doc.attachments[idx].data = serde_json::to_vec(&updated).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "diagram_serialize")
                    .with_context("attachment", filename.clone())
            })?;
            changed = true;
            tracing::debug!(
                target: "pagelift",
                event = "diagram_rewritten",
                document = %doc.reference,
                attachment = %filename,
                replaced = replacements.len(),
            );
        }
        Ok(changed)
    }

    /// Resolves one link/image reference, tallying the outcome.
    ///
    /// Strict priority: URL mappers, then the broken-link shape, then typed
    /// schemes. Returns the canonical replacement reference on success.
    async fn repair_reference(
        &self,
        ctx: &ResolverContext<'_>,
        raw: &str,
        counts: &mut FixCounts,
    ) -> Option<String> {
        // Already points at the target system; nothing to do.
        if raw.starts_with(DOC_PREFIX) {
            return None;
        }

        let url_candidate = raw
            .strip_prefix(URL_PREFIX)
            .map(str::trim)
            .or_else(|| is_absolute_url(raw).then_some(raw));
        if let Some(url) = url_candidate {
            match self.mappers.resolve(ctx.store, url).await {
                Ok(UrlOutcome::Resolved(res)) => {
                    counts.record_resolved_ref();
                    return Some(res.to_reference());
                }
                Ok(UrlOutcome::Unresolved) => {
                    counts.record_failed_ref(raw);
                    return None;
                }
                Ok(UrlOutcome::Foreign) => return None,
                Err(err) => {
                    tracing::warn!(
                        target: "pagelift",
                        event = "url_resolve_failed",
                        reference = %raw,
                        error = %err,
                    );
                    counts.record_failed_ref(raw);
                    return None;
                }
            }
        }

        if self.ref_kind.tries_broken_links() {
            match broken_link::parse_candidate(raw) {
                Ok(link) => return self.repair_broken_link(ctx, raw, &link, counts).await,
                Err(reason) => {
                    tracing::trace!(
                        target: "pagelift",
                        event = "broken_link_skipped",
                        reference = %raw,
                        reason = %reason,
                    );
                }
            }
        }

        if self.ref_kind.tries_typed() && TypedRef::is_typed(raw) {
            return self.repair_typed(ctx, raw, counts).await;
        }

        None
    }

    async fn repair_broken_link(
        &self,
        ctx: &ResolverContext<'_>,
        raw: &str,
        link: &BrokenLink,
        counts: &mut FixCounts,
    ) -> Option<String> {
        match resolve::resolve_broken_link(ctx, link).await {
            Ok(Some(res)) => {
                counts.record_resolved_ref();
                Some(res.to_reference())
            }
            Ok(None) => {
                counts.record_failed_ref(raw);
                None
            }
            Err(err) => {
                tracing::warn!(
                    target: "pagelift",
                    event = "broken_link_resolve_failed",
                    reference = %raw,
                    error = %err,
                );
                counts.record_failed_ref(raw);
                None
            }
        }
    }

    /// Broken-link repair for one allow-listed macro parameter value.
    async fn repair_macro_param(
        &self,
        ctx: &ResolverContext<'_>,
        value: Option<&String>,
        counts: &mut FixCounts,
    ) -> Option<String> {
        let value = value?;
        if !self.ref_kind.tries_broken_links() || value.starts_with(DOC_PREFIX) {
            return None;
        }
        let link = broken_link::parse_candidate(value).ok()?;
        self.repair_broken_link(ctx, value, &link, counts).await
    }

    async fn repair_typed(
        &self,
        ctx: &ResolverContext<'_>,
        raw: &str,
        counts: &mut FixCounts,
    ) -> Option<String> {
        let Some(typed) = TypedRef::parse(raw) else {
            // Scheme-tagged but malformed: clearly a source reference we
            // cannot repair.
            counts.record_failed_ref(raw);
            return None;
        };
        match resolve::resolve_source(ctx, &SourceRef::Typed(typed)).await {
            Ok(Some(res)) => {
                counts.record_resolved_ref();
                Some(res.to_reference())
            }
            Ok(None) => {
                counts.record_failed_ref(raw);
                None
            }
            Err(err) => {
                tracing::warn!(
                    target: "pagelift",
                    event = "typed_resolve_failed",
                    reference = %raw,
                    error = %err,
                );
                counts.record_failed_ref(raw);
                None
            }
        }
    }
}

fn is_absolute_url(raw: &str) -> bool {
    raw.starts_with("http://") || raw.starts_with("https://")
}

fn collect_diagram_urls(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "url" || key == "href" {
                    if let Some(raw) = nested.as_str() {
                        if !raw.starts_with("data:") {
                            out.insert(raw.to_string());
                        }
                        continue;
                    }
                }
                collect_diagram_urls(nested, out);
            }
        }
        Value::Array(items) => {
            for nested in items {
                collect_diagram_urls(nested, out);
            }
        }
        _ => {}
    }
}

fn apply_diagram_urls(value: &mut Value, replacements: &BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if key == "url" || key == "href" {
                    if let Some(raw) = nested.as_str() {
                        if let Some(new_value) = replacements.get(raw) {
                            *nested = Value::String(new_value.clone());
                        }
                        continue;
                    }
                }
                apply_diagram_urls(nested, replacements);
            }
        }
        Value::Array(items) => {
            for nested in items.iter_mut() {
                apply_diagram_urls(nested, replacements);
            }
        }
        _ => {}
    }
}
