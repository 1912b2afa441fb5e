#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use sqlx::SqlitePool;
use tempfile::TempDir;

use pagelift::content::{Block, ContentTree};
use pagelift::docstore::{
    BatchSource, DocAttachment, DocComment, Document, DocumentStore, MigrationBatch,
};
use pagelift::markup::{MacroCatalog, MarkupCodec};
use pagelift::model::TargetRef;
use pagelift::store::{self, MappingStore};
use pagelift::{AppError, AppResult};

pub const TEST_SYNTAX: &str = "testwiki/1.0";

/// Fresh store on a temp database. The pool clone lets tests inspect the
/// underlying schema directly.
pub async fn temp_store() -> (MappingStore, SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = store::open_pool(&dir.path().join("mapping.sqlite3"))
        .await
        .expect("open pool");
    (MappingStore::new(pool.clone()), pool, dir)
}

pub fn document(name: &str, content: &str) -> Document {
    Document {
        reference: TargetRef::new(name),
        syntax: TEST_SYNTAX.to_string(),
        content: content.to_string(),
        comments: Vec::new(),
        attachments: Vec::new(),
    }
}

pub fn comment(id: &str, body: &str) -> DocComment {
    DocComment {
        id: id.to_string(),
        body: body.to_string(),
    }
}

pub fn attachment(filename: &str, data: &[u8]) -> DocAttachment {
    DocAttachment {
        filename: filename.to_string(),
        data: data.to_vec(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    pub reference: String,
    pub comment: String,
    pub in_place: bool,
}

/// In-memory document store recording every save for assertions.
#[derive(Default)]
pub struct MemoryDocs {
    docs: Mutex<BTreeMap<String, Document>>,
    pub saves: Mutex<Vec<SaveRecord>>,
}

impl MemoryDocs {
    pub fn with(documents: Vec<Document>) -> Self {
        let store = MemoryDocs::default();
        for doc in documents {
            store.insert(doc);
        }
        store
    }

    pub fn insert(&self, doc: Document) {
        self.docs
            .lock()
            .unwrap()
            .insert(doc.reference.as_str().to_string(), doc);
    }

    pub fn stored(&self, name: &str) -> Option<Document> {
        self.docs.lock().unwrap().get(name).cloned()
    }

    pub fn stored_attachment(&self, name: &str, filename: &str) -> Option<Vec<u8>> {
        self.stored(name)?
            .attachments
            .iter()
            .find(|a| a.filename == filename)
            .map(|a| a.data.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

impl DocumentStore for MemoryDocs {
    async fn get(&self, reference: &TargetRef) -> AppResult<Document> {
        self.stored(reference.as_str()).ok_or_else(|| {
            AppError::new("DOCS/NOT_FOUND", "Document not found")
                .with_context("document", reference.to_string())
        })
    }

    async fn save(&self, document: &Document, comment: &str, in_place: bool) -> AppResult<()> {
        self.insert(document.clone());
        self.saves.lock().unwrap().push(SaveRecord {
            reference: document.reference.as_str().to_string(),
            comment: comment.to_string(),
            in_place,
        });
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> AppResult<Vec<TargetRef>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .map(|name| TargetRef::new(name.clone()))
            .collect())
    }

    async fn write_attachment(
        &self,
        reference: &TargetRef,
        filename: &str,
        data: &[u8],
    ) -> AppResult<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs.get_mut(reference.as_str()).ok_or_else(|| {
            AppError::new("DOCS/NOT_FOUND", "Document not found")
                .with_context("document", reference.to_string())
        })?;
        if let Some(existing) = doc
            .attachments
            .iter_mut()
            .find(|a| a.filename == filename)
        {
            existing.data = data.to_vec();
        } else {
            doc.attachments.push(DocAttachment {
                filename: filename.to_string(),
                data: data.to_vec(),
            });
        }
        Ok(())
    }
}

/// Minimal bracket syntax for tests:
/// `[[reference]]` / `[[reference|label]]` links, `((image:reference))`
/// images, `{{name k=v,k2=v2}}` macros with an optional `…{{/name}}` body.
pub struct BracketCodec;

impl MarkupCodec for BracketCodec {
    fn parse(&self, text: &str, syntax: &str) -> Option<ContentTree> {
        if syntax != TEST_SYNTAX {
            return None;
        }
        let mut tree = ContentTree::new();
        let mut buf = String::new();
        let mut rest = text;

        fn flush(tree: &mut ContentTree, buf: &mut String) {
            if !buf.is_empty() {
                tree.push_root(Block::Text(std::mem::take(buf)));
            }
        }

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix("[[") {
                let end = stripped.find("]]")?;
                flush(&mut tree, &mut buf);
                let inner = &stripped[..end];
                let (reference, label) = match inner.split_once('|') {
                    Some((r, l)) => (r.to_string(), Some(l.to_string())),
                    None => (inner.to_string(), None),
                };
                tree.push_root(Block::Link { reference, label });
                rest = &stripped[end + 2..];
            } else if let Some(stripped) = rest.strip_prefix("((image:") {
                let end = stripped.find("))")?;
                flush(&mut tree, &mut buf);
                tree.push_root(Block::Image {
                    reference: stripped[..end].to_string(),
                });
                rest = &stripped[end + 2..];
            } else if let Some(stripped) = rest.strip_prefix("{{") {
                let end = stripped.find("}}")?;
                flush(&mut tree, &mut buf);
                let header = &stripped[..end];
                let mut after = &stripped[end + 2..];

                let (name, raw_params) = match header.split_once(' ') {
                    Some((n, p)) => (n.to_string(), Some(p)),
                    None => (header.to_string(), None),
                };
                if name.is_empty() {
                    return None;
                }
                let mut params = BTreeMap::new();
                if let Some(raw_params) = raw_params {
                    for pair in raw_params.split(',') {
                        let pair = pair.trim();
                        if pair.is_empty() {
                            continue;
                        }
                        let (key, value) = pair.split_once('=')?;
                        params.insert(key.to_string(), value.to_string());
                    }
                }

                let close = format!("{{{{/{name}}}}}");
                let body = if let Some(idx) = after.find(&close) {
                    let body = after[..idx].to_string();
                    after = &after[idx + close.len()..];
                    Some(body)
                } else {
                    None
                };
                tree.push_root(Block::Macro { name, params, body });
                rest = after;
            } else {
                let ch = rest.chars().next().unwrap();
                buf.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
        flush(&mut tree, &mut buf);
        Some(tree)
    }

    fn render(&self, tree: &ContentTree, syntax: &str) -> Option<String> {
        if syntax != TEST_SYNTAX {
            return None;
        }
        let mut out = String::new();
        for id in tree.walk() {
            match tree.block(id) {
                Block::Text(text) => out.push_str(text),
                Block::Link { reference, label } => {
                    out.push_str("[[");
                    out.push_str(reference);
                    if let Some(label) = label {
                        out.push('|');
                        out.push_str(label);
                    }
                    out.push_str("]]");
                }
                Block::Image { reference } => {
                    out.push_str("((image:");
                    out.push_str(reference);
                    out.push_str("))");
                }
                Block::Macro { name, params, body } => {
                    out.push_str("{{");
                    out.push_str(name);
                    if !params.is_empty() {
                        out.push(' ');
                        let rendered: Vec<String> =
                            params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                        out.push_str(&rendered.join(","));
                    }
                    out.push_str("}}");
                    if let Some(body) = body {
                        out.push_str(body);
                        out.push_str(&format!("{{{{/{name}}}}}"));
                    }
                }
            }
        }
        Some(out)
    }
}

/// Macro catalog backed by a fixed set of markup-capable macro names.
pub struct StaticMacros {
    markup: HashSet<String>,
}

impl StaticMacros {
    pub fn markup_capable(names: &[&str]) -> Self {
        StaticMacros {
            markup: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn none() -> Self {
        StaticMacros {
            markup: HashSet::new(),
        }
    }
}

impl MacroCatalog for StaticMacros {
    fn accepts_markup(&self, macro_name: &str) -> bool {
        self.markup.contains(macro_name)
    }
}

#[derive(Default)]
pub struct MemoryBatches {
    batches: BTreeMap<String, MigrationBatch>,
}

impl MemoryBatches {
    pub fn with(batches: Vec<MigrationBatch>) -> Self {
        MemoryBatches {
            batches: batches.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }
}

impl BatchSource for MemoryBatches {
    async fn batch(&self, id: &str) -> AppResult<MigrationBatch> {
        self.batches.get(id).cloned().ok_or_else(|| {
            AppError::new("BATCH/NOT_FOUND", "Migration batch not found")
                .with_context("batch", id.to_string())
        })
    }
}
