use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use finrag::application::capabilities::{EmbedError, Embedder};
use finrag::application::dto::{BuildProgressEvent, DiscardReason, RetrievalRequest};
use finrag::application::repositories::IndexRepository;
use finrag::application::services::{IndexBuildService, ProgressCallback};
use finrag::application::use_cases::Retriever;
use finrag::config::{RetrievalConfig, Settings};
use finrag::domain::entities::{RawDocument, SourceMetadata};
use finrag::domain::value_objects::{Institution, ModelIdentity, SourceUrl};
use finrag::infrastructure::embeddings::HashingEmbedder;
use finrag::infrastructure::loaders::FormatLoader;
use finrag::infrastructure::persistence::SqliteIndexRepository;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const CBR_NOTICE: &str = "The Monetary Policy Committee met on 5 February 2025 and lowered the \
Central Bank Rate from 11.25 percent to 10.75 percent. The Committee noted that overall \
inflation remained stable within the target range, supported by lower food and fuel prices. \
Private sector credit growth slowed in the review period, and the Committee concluded that \
there was scope for further easing of the monetary policy stance to support lending.";

const PAYE_GUIDE: &str = "Employers deduct Pay As You Earn from the monthly salaries of their \
employees and remit it to the Kenya Revenue Authority by the ninth day of the following month. \
Late remittance attracts a penalty of twenty five percent of the tax due, and interest accrues \
at one percent per month on the unpaid amount until the tax is settled in full.";

fn model() -> ModelIdentity {
    ModelIdentity::new("hashing", "1").unwrap()
}

fn raw(url: &str, institution: &str, text: &str) -> RawDocument {
    RawDocument::new(
        text.as_bytes().to_vec(),
        SourceMetadata::new(
            SourceUrl::new(url).unwrap(),
            Institution::new(institution).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap(),
        )
        .with_content_type("text/plain"),
    )
}

/// A, a reflowed copy of A from a mirror, and an unrelated document
fn corpus() -> Vec<RawDocument> {
    let reflowed = CBR_NOTICE.replace(". ", ".\n\n").replace(" the ", "\nthe ");
    vec![
        raw("https://www.centralbank.go.ke/mpc-feb-2025", "cbk", CBR_NOTICE),
        raw("https://mirror.example.com/mpc-feb-2025", "cbk", &reflowed),
        raw("https://www.kra.go.ke/paye", "kra", PAYE_GUIDE),
    ]
}

fn service(repository: Arc<dyn IndexRepository>, embedder: Arc<dyn Embedder>) -> IndexBuildService {
    let loader = Arc::new(FormatLoader::new(Settings::default().loader));
    IndexBuildService::new(loader, embedder, repository, &Settings::default()).unwrap()
}

fn hashing() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(model(), 128))
}

/// Refuses every request with a backend error
struct UnavailableEmbedder {
    identity: ModelIdentity,
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    fn model(&self) -> &ModelIdentity {
        &self.identity
    }

    fn dimension(&self) -> usize {
        128
    }

    async fn embed(
        &self,
        _texts: &[String],
        _model: &ModelIdentity,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_build_deduplicates_and_persists() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let progress: ProgressCallback =
        Arc::new(move |event: BuildProgressEvent| sink.lock().unwrap().push(event));

    let output = service(repository.clone(), hashing())
        .with_concurrency(3)
        .build(corpus(), Some(progress))
        .await
        .unwrap();

    let summary = &output.summary;
    assert_eq!(summary.documents_total, 3);
    assert_eq!(summary.documents_loaded, 3);
    assert!(summary.parse_failures.is_empty());
    assert_eq!(summary.document_discards().count(), 1);
    assert_eq!(summary.discards[0].reason, DiscardReason::Exact);
    assert_eq!(
        summary.discards[0].source_url.as_str(),
        "https://mirror.example.com/mpc-feb-2025"
    );
    assert!(summary.embedding_gaps.is_empty());

    // One chunk per short document, the mirror copy left out
    assert_eq!(output.index.len(), 2);
    assert_eq!(summary.chunks_indexed, 2);
    let urls: Vec<&str> = output
        .index
        .entries()
        .iter()
        .map(|e| e.metadata.source_url.as_str())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://www.centralbank.go.ke/mpc-feb-2025",
            "https://www.kra.go.ke/paye"
        ]
    );

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(BuildProgressEvent::Started { total_documents: 3 })));
    assert!(matches!(
        events.last(),
        Some(BuildProgressEvent::Completed { chunks_indexed: 2, .. })
    ));
    let processed = events
        .iter()
        .filter(|e| matches!(e, BuildProgressEvent::DocumentProcessed { .. }))
        .count();
    assert_eq!(processed, 3);

    let loaded = repository.load(&model()).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.manifest().entry_count, 2);
    assert_eq!(loaded.entries(), output.index.entries());
}

#[tokio::test]
async fn test_near_duplicate_is_dropped_and_unique_text_is_found() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    // B restates A in capitals without commas: a different hash, the same wording
    let restated = CBR_NOTICE.to_uppercase().replace(',', "");
    let documents = vec![
        raw("https://www.centralbank.go.ke/mpc-feb-2025", "cbk", CBR_NOTICE),
        raw("https://www.businessdaily.co.ke/cbr-cut", "cbk", &restated),
        raw("https://www.kra.go.ke/paye", "kra", PAYE_GUIDE),
    ];

    let output = service(repository.clone(), hashing())
        .with_concurrency(3)
        .build(documents, None)
        .await
        .unwrap();

    let summary = &output.summary;
    assert_eq!(summary.document_discards().count(), 1);
    let discard = &summary.discards[0];
    assert!(matches!(discard.reason, DiscardReason::Near { similarity } if similarity >= 0.85));
    assert_eq!(discard.source_url.as_str(), "https://www.businessdaily.co.ke/cbr-cut");

    let urls: Vec<&str> = output
        .index
        .entries()
        .iter()
        .map(|e| e.metadata.source_url.as_str())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://www.centralbank.go.ke/mpc-feb-2025",
            "https://www.kra.go.ke/paye"
        ]
    );
    assert!(output.index.entries()[0]
        .metadata
        .text
        .contains("lowered the Central Bank Rate"));

    let config = RetrievalConfig {
        min_score: Some(0.4),
        ..Default::default()
    };
    let retriever = Retriever::new(
        output.index,
        hashing(),
        Settings::default().embedding,
        config.clone(),
    )
    .unwrap();
    let context = retriever
        .retrieve(&RetrievalRequest::new(
            "late remittance penalty twenty five percent of the tax due",
        ))
        .await
        .unwrap();

    assert!(!context.is_empty());
    assert_eq!(context.passages[0].source_url.as_str(), "https://www.kra.go.ke/paye");
    assert!(context.passages[0].score >= config.min_score.unwrap_or_default());
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    let first = service(repository.clone(), hashing())
        .build(corpus(), None)
        .await
        .unwrap();
    let second = service(repository.clone(), hashing())
        .build(corpus(), None)
        .await
        .unwrap();

    assert_eq!(first.index.entries(), second.index.entries());
    assert_eq!(
        repository.load(&model()).unwrap().entries(),
        first.index.entries()
    );
}

#[tokio::test]
async fn test_update_skips_indexed_documents() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));
    let service = service(repository.clone(), hashing());

    let initial = service.build(corpus()[..1].to_vec(), None).await.unwrap();
    assert_eq!(initial.index.len(), 1);

    let updated = service
        .update(&initial.index, corpus(), None)
        .await
        .unwrap();

    // The original and its mirror copy are both already indexed
    assert_eq!(updated.summary.documents_already_indexed, 2);
    assert_eq!(updated.summary.chunks_indexed, 1);
    assert_eq!(updated.index.len(), 2);
    assert_eq!(repository.load(&model()).unwrap().len(), 2);

    let again = service.update(&updated.index, corpus(), None).await.unwrap();
    assert_eq!(again.summary.chunks_indexed, 0);
    assert_eq!(again.index.len(), 2);
}

#[tokio::test]
async fn test_unparseable_documents_are_reported() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    let mut documents = corpus();
    documents.push(raw(
        "https://www.cma.or.ke/notice.pdf",
        "cma",
        "%PDF-1.7 truncated",
    ));
    documents.push(raw("https://www.nse.co.ke/blank", "nse", "   "));

    let output = service(repository, hashing())
        .build(documents, None)
        .await
        .unwrap();

    assert_eq!(output.summary.documents_total, 5);
    assert_eq!(output.summary.documents_loaded, 3);
    assert_eq!(output.summary.parse_failures.len(), 2);
    assert_eq!(
        output.summary.parse_failures[0].source_url.as_str(),
        "https://www.cma.or.ke/notice.pdf"
    );
    assert!(output.summary.has_errors());
    assert_eq!(output.index.len(), 2);
}

#[tokio::test]
async fn test_embedding_failures_become_gaps() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    let mut settings = Settings::default();
    settings.embedding.max_retries = 1;
    settings.embedding.base_backoff_ms = 1;
    settings.embedding.max_backoff_ms = 1;

    let service = IndexBuildService::new(
        Arc::new(FormatLoader::new(settings.loader.clone())),
        Arc::new(UnavailableEmbedder { identity: model() }),
        repository.clone(),
        &settings,
    )
    .unwrap();

    let output = service.build(corpus(), None).await.unwrap();

    assert!(output.index.is_empty());
    assert_eq!(output.summary.embedding_gaps.len(), 1);
    assert_eq!(output.summary.gap_chunk_count(), 2);
    assert_eq!(output.summary.embedding_gaps[0].attempts, 2);
    assert!(output.summary.embedding_gaps[0]
        .reason
        .contains("connection refused"));
    assert!(repository.exists());
}

#[tokio::test]
async fn test_corrupted_store_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.sqlite");
    let repository = Arc::new(SqliteIndexRepository::new(&path));

    service(repository.clone(), hashing())
        .build(corpus(), None)
        .await
        .unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("UPDATE manifest SET entry_count = entry_count + 1", [])
        .unwrap();
    drop(conn);

    let err = repository.load(&model()).unwrap_err();
    assert!(err.is_corrupt());
}

#[tokio::test]
async fn test_load_with_other_model_is_rejected() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(SqliteIndexRepository::new(dir.path().join("index.sqlite")));

    service(repository.clone(), hashing())
        .build(corpus(), None)
        .await
        .unwrap();

    let err = repository
        .load(&ModelIdentity::new("hashing", "2").unwrap())
        .unwrap_err();
    assert!(err.is_model_mismatch());
}
