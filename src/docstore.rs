//! Document storage and migration-batch collaborator boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::TargetRef;
use crate::AppResult;

/// A comment attached to a document. The body is markup in the document's
/// own syntax, parsed independently of the document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocComment {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocAttachment {
    pub filename: String,
    #[serde(with = "serde_bytes_base64")]
    pub data: Vec<u8>,
}

mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// A migrated document as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub reference: TargetRef,
    /// Identifier of the markup dialect the content is written in.
    pub syntax: String,
    pub content: String,
    #[serde(default)]
    pub comments: Vec<DocComment>,
    #[serde(default)]
    pub attachments: Vec<DocAttachment>,
}

/// Storage/versioning collaborator.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    async fn get(&self, reference: &TargetRef) -> AppResult<Document>;

    /// Persists a changed document. `in_place` overwrites without recording a
    /// new revision; otherwise a new revision is created with `comment`.
    async fn save(&self, document: &Document, comment: &str, in_place: bool) -> AppResult<()>;

    /// References of every document whose full name starts with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> AppResult<Vec<TargetRef>>;

    /// Writes (or replaces) an attachment on an existing document.
    async fn write_attachment(
        &self,
        reference: &TargetRef,
        filename: &str,
        data: &[u8],
    ) -> AppResult<()>;
}

/// A warning the importer recorded for a document it could not fully resolve.
///
/// The warning is current while the batch's imported version for the document
/// still equals the warning's version; a newer import supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceWarning {
    pub document: TargetRef,
    pub version: u64,
}

/// Older importers recorded affected documents either as a JSON object keyed
/// by document name or as a flat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrokenLinksManifest {
    Flat(Vec<String>),
    Object(BTreeMap<String, serde_json::Value>),
}

impl BrokenLinksManifest {
    pub fn documents(&self) -> Vec<TargetRef> {
        match self {
            BrokenLinksManifest::Flat(names) => {
                names.iter().map(|name| TargetRef::new(name.clone())).collect()
            }
            BrokenLinksManifest::Object(map) => {
                map.keys().map(|name| TargetRef::new(name.clone())).collect()
            }
        }
    }
}

/// Everything the orchestrator needs to know about one migration batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationBatch {
    pub id: String,
    /// Target-side space every document of the batch was created under.
    pub root_space: String,
    #[serde(default)]
    pub reference_warnings: Vec<ReferenceWarning>,
    /// Document full name → version recorded at import time.
    #[serde(default)]
    pub imported_versions: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_links_pages: Option<BrokenLinksManifest>,
    /// Input properties recorded when the batch ran (base URL derivation).
    #[serde(default)]
    pub input_properties: BTreeMap<String, String>,
}

#[allow(async_fn_in_trait)]
pub trait BatchSource {
    async fn batch(&self, id: &str) -> AppResult<MigrationBatch>;
}
