//! Resolution strategies over the mapping store.
//!
//! The strategy set is closed and known, so resolvers are a fixed dispatch
//! rather than a runtime registry: each variant of [`SourceRef`] routes to one
//! resolution path, in the priority order the rewriter calls them.

pub mod url;

use crate::broken_link::BrokenLink;
use crate::model::{SourceRef, TargetRef, TypedRef, HOME_PSEUDO_TITLE, HOME_TITLE};
use crate::store::MappingStore;
use crate::AppResult;

/// Per-document resolution context.
pub struct ResolverContext<'a> {
    pub store: &'a MappingStore,
    /// Source space of the document being rewritten; substituted for the
    /// `@self` placeholder in typed references.
    pub self_space: Option<String>,
}

/// A successfully resolved reference, possibly narrowed to one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: TargetRef,
    pub attachment: Option<String>,
}

impl Resolution {
    pub fn page(target: TargetRef) -> Self {
        Resolution {
            target,
            attachment: None,
        }
    }

    /// Canonical content-side reference for the resolution.
    pub fn to_reference(&self) -> String {
        match &self.attachment {
            Some(file) => format!("{}@{}", self.target.to_doc_reference(), file),
            None => self.target.to_doc_reference(),
        }
    }
}

/// Resolves a partial source reference, or `None` when no mapping exists.
///
/// URL-shaped references are the URL mappers' job ([`url::UrlMapperSet`]) and
/// always report unresolved here.
pub async fn resolve_source(
    ctx: &ResolverContext<'_>,
    source: &SourceRef,
) -> AppResult<Option<Resolution>> {
    match source {
        SourceRef::Id(id) => Ok(ctx.store.lookup_by_id(*id).await?.map(Resolution::page)),
        SourceRef::ByTitle { space, title } => resolve_by_title(ctx, space, title).await,
        SourceRef::Typed(typed) => resolve_typed(ctx, typed).await,
        SourceRef::Url(_) => Ok(None),
    }
}

/// Resolves a scheme-tagged reference through the store.
pub async fn resolve_typed(
    ctx: &ResolverContext<'_>,
    typed: &TypedRef,
) -> AppResult<Option<Resolution>> {
    let Some(typed) = typed.clone().substitute_self(ctx.self_space.as_deref()) else {
        tracing::debug!(
            target: "pagelift",
            event = "self_space_unknown",
            "cannot substitute @self without a reverse mapping for the current document",
        );
        return Ok(None);
    };
    match typed {
        TypedRef::Page { id } => Ok(ctx.store.lookup_by_id(id).await?.map(Resolution::page)),
        TypedRef::Title { space, title } => resolve_by_title(ctx, &space, &title).await,
        TypedRef::SpaceHome { space } => resolve_space_home(ctx, &space).await,
        TypedRef::Attachment { space, title, file } => {
            let page = resolve_by_title(ctx, &space, &title).await?;
            Ok(page.map(|res| Resolution {
                target: res.target,
                attachment: Some(file),
            }))
        }
    }
}

/// Resolves a broken-link candidate (dotted `space.title[@attachment]` shape).
pub async fn resolve_broken_link(
    ctx: &ResolverContext<'_>,
    link: &BrokenLink,
) -> AppResult<Option<Resolution>> {
    let base = resolve_by_title(ctx, &link.space, &link.title).await?;
    Ok(base.map(|res| Resolution {
        target: res.target,
        attachment: link.attachment.clone(),
    }))
}

async fn resolve_by_title(
    ctx: &ResolverContext<'_>,
    space: &str,
    title: &str,
) -> AppResult<Option<Resolution>> {
    if title == HOME_PSEUDO_TITLE {
        return resolve_space_home(ctx, space).await;
    }
    Ok(ctx
        .store
        .lookup_by_title(space, title)
        .await?
        .map(Resolution::page))
}

/// A space's home document: the exact home title when mapped, otherwise the
/// shortest stored reference in the space.
async fn resolve_space_home(
    ctx: &ResolverContext<'_>,
    space: &str,
) -> AppResult<Option<Resolution>> {
    if let Some(target) = ctx.store.lookup_by_title(space, HOME_TITLE).await? {
        return Ok(Some(Resolution::page(target)));
    }
    Ok(ctx
        .store
        .shortest_reference_for_space(space)
        .await?
        .map(Resolution::page))
}
