//! pagelift — reference resolution & rewriting engine for wiki migrations.
//!
//! A persistent identifier-mapping store plus a content-tree visitor that
//! locates and repairs broken or foreign references inside migrated documents.
//! The document store, markup codec and macro catalog are collaborator traits;
//! everything else lives here.

pub mod broken_link;
pub mod content;
pub mod docstore;
mod error;
pub mod fixer;
mod id;
pub mod markup;
pub mod model;
pub mod report;
pub mod resolve;
pub mod rewriter;
pub mod stats;
pub mod store;

pub use error::{AppError, AppResult};
pub use fixer::{CancelToken, FixProgress, FixRequest, MigrationFixer, SilentProgress};
pub use model::{MappingEntry, RefKindHint, SourceRef, TargetRef, TypedRef};
pub use rewriter::{FixConfig, ReferenceRewriter};
pub use stats::FixCounts;
pub use store::MappingStore;

/// Installs the tracing subscriber for embedding binaries and tests.
///
/// The filter is read from `PAGELIFT_LOG`; repeated calls are no-ops.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("PAGELIFT_LOG").unwrap_or_else(|_| "pagelift=info,sqlx=warn".into()),
        )
        .json()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
