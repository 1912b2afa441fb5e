use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialization prefix for a reference that already points at the target system.
///
/// References carrying this prefix are final: the rewriter recognizes them as
/// "not a source-system reference" and leaves them alone, which is what makes a
/// second fixing pass over the same document a no-op.
pub const DOC_PREFIX: &str = "doc:";

/// Prefix marking a link reference as a raw URL rather than a document name.
pub const URL_PREFIX: &str = "url:";

/// Default home page name in the target system.
///
/// A dotted reference whose title equals this name is a target-system document
/// name that happens to look like a broken source link; it is never repaired.
pub const HOME_TITLE: &str = "WebHome";

/// Pseudo-title that resolves to a space's home document instead of a titled page.
pub const HOME_PSEUDO_TITLE: &str = "@home";

/// Placeholder for "the current document's own source space" in typed references.
pub const SELF_SPACE: &str = "@self";

/// Hierarchical document reference in the target system, e.g.
/// `Migrated.SpaceA.My Answer.Home`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRef(String);

impl TargetRef {
    pub fn new(full_name: impl Into<String>) -> Self {
        TargetRef(full_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical content-side form: `doc:<full name>`.
    pub fn to_doc_reference(&self) -> String {
        format!("{DOC_PREFIX}{}", self.0)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetRef {
    fn from(value: &str) -> Self {
        TargetRef::new(value)
    }
}

/// A single mapping from a source page to its migrated target document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    pub space_key: String,
    pub title: String,
    pub target: TargetRef,
}

/// A reference extracted from document content, before resolution.
///
/// Transient: parsed from content blocks, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Id(i64),
    ByTitle { space: String, title: String },
    Typed(TypedRef),
    Url(String),
}

/// Scheme-tagged reference left behind by the importer when it could not
/// resolve a source entity at import time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedRef {
    /// `src-page:<numeric id>`
    Page { id: i64 },
    /// `src-title:<space>.<title>`
    Title { space: String, title: String },
    /// `src-home:<space>`
    SpaceHome { space: String },
    /// `src-attach:<space>.<title>@<filename>`
    Attachment {
        space: String,
        title: String,
        file: String,
    },
}

const SCHEME_PAGE: &str = "src-page:";
const SCHEME_TITLE: &str = "src-title:";
const SCHEME_HOME: &str = "src-home:";
const SCHEME_ATTACH: &str = "src-attach:";

impl TypedRef {
    /// Returns whether `raw` carries one of the typed scheme tags.
    pub fn is_typed(raw: &str) -> bool {
        raw.starts_with(SCHEME_PAGE)
            || raw.starts_with(SCHEME_TITLE)
            || raw.starts_with(SCHEME_HOME)
            || raw.starts_with(SCHEME_ATTACH)
    }

    /// Parses a typed reference, or `None` when `raw` is untagged or malformed.
    pub fn parse(raw: &str) -> Option<TypedRef> {
        if let Some(rest) = raw.strip_prefix(SCHEME_PAGE) {
            let id = rest.trim().parse::<i64>().ok()?;
            return Some(TypedRef::Page { id });
        }
        if let Some(rest) = raw.strip_prefix(SCHEME_TITLE) {
            let (space, title) = rest.split_once('.')?;
            if space.is_empty() || title.is_empty() {
                return None;
            }
            return Some(TypedRef::Title {
                space: space.to_string(),
                title: title.to_string(),
            });
        }
        if let Some(rest) = raw.strip_prefix(SCHEME_HOME) {
            if rest.is_empty() {
                return None;
            }
            return Some(TypedRef::SpaceHome {
                space: rest.to_string(),
            });
        }
        if let Some(rest) = raw.strip_prefix(SCHEME_ATTACH) {
            let (page, file) = rest.rsplit_once('@')?;
            let (space, title) = page.split_once('.')?;
            if space.is_empty() || title.is_empty() || file.is_empty() {
                return None;
            }
            return Some(TypedRef::Attachment {
                space: space.to_string(),
                title: title.to_string(),
                file: file.to_string(),
            });
        }
        None
    }

    /// Replaces an `@self` space placeholder with the given source space key.
    ///
    /// Returns `None` when the placeholder is present but the current
    /// document's source space is unknown.
    pub fn substitute_self(self, self_space: Option<&str>) -> Option<TypedRef> {
        let fill = |space: String| -> Option<String> {
            if space == SELF_SPACE {
                self_space.map(|s| s.to_string())
            } else {
                Some(space)
            }
        };
        Some(match self {
            TypedRef::Page { id } => TypedRef::Page { id },
            TypedRef::Title { space, title } => TypedRef::Title {
                space: fill(space)?,
                title,
            },
            TypedRef::SpaceHome { space } => TypedRef::SpaceHome { space: fill(space)? },
            TypedRef::Attachment { space, title, file } => TypedRef::Attachment {
                space: fill(space)?,
                title,
                file,
            },
        })
    }
}

/// Caller hint narrowing which repair strategies run on non-URL references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKindHint {
    /// Only the dotted broken-link repair.
    BrokenLinks,
    /// Only the typed-scheme repair.
    TypedReferences,
    /// Try both.
    #[default]
    Unknown,
}

impl RefKindHint {
    pub fn tries_broken_links(self) -> bool {
        matches!(self, RefKindHint::BrokenLinks | RefKindHint::Unknown)
    }

    pub fn tries_typed(self) -> bool {
        matches!(self, RefKindHint::TypedReferences | RefKindHint::Unknown)
    }
}
