mod util;

use std::collections::BTreeMap;

use anyhow::Result;
use pagelift::docstore::{BrokenLinksManifest, MigrationBatch, ReferenceWarning};
use pagelift::fixer::{CancelToken, FixRequest, MigrationFixer, SilentProgress};
use pagelift::model::TargetRef;
use pagelift::store::MappingStore;
use util::{document, temp_store, BracketCodec, MemoryBatches, MemoryDocs, StaticMacros};

fn warning(document: &str, version: u64) -> ReferenceWarning {
    ReferenceWarning {
        document: TargetRef::new(document),
        version,
    }
}

fn batch(id: &str, root_space: &str) -> MigrationBatch {
    MigrationBatch {
        id: id.to_string(),
        root_space: root_space.to_string(),
        ..MigrationBatch::default()
    }
}

async fn seed_answer_mapping(store: &MappingStore) -> Result<()> {
    store
        .insert_title(
            "SpaceA",
            "My Answer",
            &TargetRef::new("Migrated.SpaceA.My Answer.Home"),
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn processes_only_current_reference_warnings() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceA.Current", "[[SpaceA.My Answer]]"),
        document("Migrated.SpaceA.Stale", "[[SpaceA.My Answer]]"),
    ]);

    let mut b = batch("batch-1", "Migrated.SpaceA");
    b.reference_warnings = vec![
        warning("Migrated.SpaceA.Current", 3),
        warning("Migrated.SpaceA.Stale", 1),
    ];
    // The stale document was re-imported at a newer version since.
    b.imported_versions =
        BTreeMap::from([("Migrated.SpaceA.Current".to_string(), 3), ("Migrated.SpaceA.Stale".to_string(), 2)]);
    let batches = MemoryBatches::with(vec![b]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1);
    assert_eq!(counts.unchanged_docs, 0);
    assert_eq!(
        docs.stored("Migrated.SpaceA.Current").unwrap().content,
        "[[doc:Migrated.SpaceA.My Answer.Home]]"
    );
    assert_eq!(
        docs.stored("Migrated.SpaceA.Stale").unwrap().content,
        "[[SpaceA.My Answer]]",
        "stale warnings are skipped entirely"
    );
    Ok(())
}

#[tokio::test]
async fn falls_back_to_the_broken_links_manifest() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceA.One", "[[SpaceA.My Answer]]"),
        document("Migrated.SpaceA.Two", "untouched"),
    ]);

    let mut b = batch("batch-1", "Migrated.SpaceA");
    b.broken_links_pages = Some(BrokenLinksManifest::Flat(vec![
        "Migrated.SpaceA.One".to_string(),
    ]));
    let batches = MemoryBatches::with(vec![b]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1);
    assert_eq!(counts.unchanged_docs, 0, "only the manifest document is visited");
    Ok(())
}

#[tokio::test]
async fn falls_back_to_exhaustive_enumeration() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceA.One", "[[SpaceA.My Answer]]"),
        document("Migrated.SpaceA.Two", "plain text"),
        document("Migrated.Other.Doc", "[[SpaceA.My Answer]]"),
    ]);

    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1);
    assert_eq!(counts.unchanged_docs, 1);
    assert_eq!(
        docs.stored("Migrated.Other.Doc").unwrap().content,
        "[[SpaceA.My Answer]]",
        "documents outside the batch root are not visited"
    );
    Ok(())
}

#[tokio::test]
async fn exhaustive_flag_bypasses_the_manifests() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceA.One", "[[SpaceA.My Answer]]"),
        document("Migrated.SpaceA.Two", "plain text"),
    ]);

    let mut b = batch("batch-1", "Migrated.SpaceA");
    b.reference_warnings = vec![warning("Migrated.SpaceA.One", 1)];
    b.imported_versions = BTreeMap::from([("Migrated.SpaceA.One".to_string(), 1)]);
    let batches = MemoryBatches::with(vec![b]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        exhaustive: true,
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs + counts.unchanged_docs, 2);
    Ok(())
}

#[tokio::test]
async fn explicit_spaces_enumerate_by_name_prefix() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceB.Doc", "[[SpaceA.My Answer]]"),
        document("Migrated.SpaceBX.Doc", "[[SpaceA.My Answer]]"),
    ]);
    let batches = MemoryBatches::default();

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        spaces: vec!["Migrated.SpaceB".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1);
    assert_eq!(
        docs.stored("Migrated.SpaceBX.Doc").unwrap().content,
        "[[SpaceA.My Answer]]",
        "the prefix query is segment-aware"
    );
    Ok(())
}

#[tokio::test]
async fn dry_run_reports_but_never_persists() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![document(
        "Migrated.SpaceA.One",
        "[[SpaceA.My Answer]]",
    )]);
    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        dry_run: true,
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1, "intended changes are still counted");
    assert_eq!(docs.save_count(), 0);
    assert_eq!(
        docs.stored("Migrated.SpaceA.One").unwrap().content,
        "[[SpaceA.My Answer]]"
    );
    Ok(())
}

#[tokio::test]
async fn unchanged_documents_skip_persistence() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;

    let docs = MemoryDocs::with(vec![document("Migrated.SpaceA.One", "nothing here")]);
    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.unchanged_docs, 1);
    assert_eq!(counts.successful_docs, 0);
    assert_eq!(docs.save_count(), 0, "no new revision, not even a no-op save");
    Ok(())
}

#[tokio::test]
async fn update_in_place_is_passed_through_to_the_document_store() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![document(
        "Migrated.SpaceA.One",
        "[[SpaceA.My Answer]]",
    )]);
    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        update_in_place: true,
        ..FixRequest::default()
    };
    fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    let saves = docs.saves.lock().unwrap().clone();
    assert_eq!(saves.len(), 1);
    assert!(saves[0].in_place);
    assert!(!saves[0].comment.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_documents_fail_individually_without_aborting_the_batch() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![document(
        "Migrated.SpaceA.Good",
        "[[SpaceA.My Answer]]",
    )]);

    let mut b = batch("batch-1", "Migrated.SpaceA");
    b.broken_links_pages = Some(BrokenLinksManifest::Flat(vec![
        "Migrated.SpaceA.Gone".to_string(),
        "Migrated.SpaceA.Good".to_string(),
    ]));
    let batches = MemoryBatches::with(vec![b]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.failed_docs, 1);
    assert_eq!(counts.successful_docs, 1, "the batch keeps going");
    Ok(())
}

#[tokio::test]
async fn cancelled_runs_stop_before_touching_documents() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![document(
        "Migrated.SpaceA.One",
        "[[SpaceA.My Answer]]",
    )]);
    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let cancel = CancelToken::new();
    cancel.cancel();

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer.run(&request, &cancel, &mut SilentProgress).await?;

    assert_eq!(counts.documents_seen(), 0);
    assert_eq!(docs.save_count(), 0);
    Ok(())
}

#[tokio::test]
async fn report_artifacts_are_attached_to_the_status_document() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![
        document("Migrated.SpaceA.One", "[[SpaceA.My Answer]] [[SpaceZ.Missing]]"),
        document("Status.Run", ""),
    ]);
    let batches = MemoryBatches::with(vec![batch("batch-1", "Migrated.SpaceA")]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        status_document: Some(TargetRef::new("Status.Run")),
        ..FixRequest::default()
    };
    fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    let stats_raw = docs
        .stored_attachment("Status.Run", "stats.json")
        .expect("stats attachment");
    let stats: serde_json::Value = serde_json::from_slice(&stats_raw)?;
    assert_eq!(stats["successfulDocs"], 1);
    assert_eq!(stats["successfulRefs"], 1);
    assert_eq!(stats["failedRefs"], 1);

    let tsv_raw = docs
        .stored_attachment("Status.Run", "failed-references.tsv")
        .expect("failed reference attachment");
    let tsv = String::from_utf8(tsv_raw)?;
    assert_eq!(tsv, "SpaceZ.Missing\t1\n");
    Ok(())
}

#[tokio::test]
async fn base_urls_are_derived_from_the_batch_input_properties() -> Result<()> {
    let (store, _pool, _dir) = temp_store().await;
    seed_answer_mapping(&store).await?;

    let docs = MemoryDocs::with(vec![document(
        "Migrated.SpaceA.One",
        "[[http://old.example/display/SpaceA/My+Answer]]",
    )]);

    let mut b = batch("batch-1", "Migrated.SpaceA");
    b.input_properties =
        BTreeMap::from([("baseUrl".to_string(), "http://old.example/".to_string())]);
    let batches = MemoryBatches::with(vec![b]);

    let codec = BracketCodec;
    let macros = StaticMacros::none();
    let fixer = MigrationFixer::new(&store, &docs, &batches, &codec, &macros);

    let request = FixRequest {
        batches: vec!["batch-1".to_string()],
        ..FixRequest::default()
    };
    let counts = fixer
        .run(&request, &CancelToken::new(), &mut SilentProgress)
        .await?;

    assert_eq!(counts.successful_docs, 1);
    assert_eq!(
        docs.stored("Migrated.SpaceA.One").unwrap().content,
        "[[doc:Migrated.SpaceA.My Answer.Home]]"
    );
    Ok(())
}
