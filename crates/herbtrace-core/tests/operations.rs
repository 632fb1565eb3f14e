use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use herbtrace_core::error::{Result, TraceError};
use herbtrace_core::memory::MemoryStore;
use herbtrace_core::operations::{
    build_provenance_bundle, fetch_collection_event, list_batches, list_collection_events,
    list_lab_tests, record_collection_event, record_lab_test, record_processing_step,
    set_external_status, ChainStatusUpdate, CoreConfig, NewCollectionEvent, NewLabTest,
    NewProcessingStep,
};
use herbtrace_core::store::TraceStore;
use herbtrace_core::types::{
    Batch, BatchFilter, BatchPhase, ChainEntity, ChainStatus, CollectionEvent, EventFilter,
    EventStatus, GeoPoint, LabTest, Page, PageOf, ProcessingStep, QualityGate, Species,
};

fn config() -> CoreConfig {
    CoreConfig {
        moisture_threshold_pct: 12.0,
        qr_base_url: Some("https://trace.example.org".to_string()),
    }
}

fn event_request(token: Option<&str>) -> NewCollectionEvent {
    NewCollectionEvent {
        species: "Withania somnifera".to_string(),
        collector_id: "farmer-123".to_string(),
        geo: GeoPoint {
            lat: 26.85,
            lng: 80.95,
            accuracy_m: Some(4.2),
        },
        timestamp: "2025-09-16T09:00:00Z".to_string(),
        idempotency_token: token.map(str::to_string),
        ai_confidence: Some(0.93),
    }
}

#[tokio::test]
async fn first_event_creates_batch_with_derived_id() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .expect("record event");

    assert!(recorded.created);
    assert_eq!(recorded.batch.batch_id, "B-WITHA-20250916-farmer-123");
    assert_eq!(recorded.batch.phase, BatchPhase::Created);
    assert_eq!(recorded.batch.quality_gate, QualityGate::Pending);
    assert_eq!(recorded.event.status, EventStatus::Accepted);
    assert!(recorded.event.violations.is_empty());
    assert!(recorded.event.integrity_hash.is_some());

    let batch = store
        .fetch_batch("B-WITHA-20250916-farmer-123")
        .await
        .unwrap()
        .expect("batch exists");
    assert_eq!(
        batch.external_ref.as_deref(),
        Some("https://trace.example.org/provenance/B-WITHA-20250916-farmer-123")
    );
    assert_eq!(batch.date_utc, "2025-09-16");
}

#[tokio::test]
async fn second_event_same_day_reuses_batch() {
    let store = MemoryStore::new();
    let first = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();

    let mut later = event_request(None);
    later.timestamp = "2025-09-16T17:45:00Z".to_string();
    let second = record_collection_event(&store, &config(), later).await.unwrap();

    assert_eq!(first.batch.batch_id, second.batch.batch_id);
    assert_ne!(first.event.event_id, second.event.event_id);

    let batches = list_batches(&store, BatchFilter::default()).await.unwrap();
    assert_eq!(batches.len(), 1);
}

#[tokio::test]
async fn seeded_species_code_wins_over_fallback() {
    let store = MemoryStore::new();
    store
        .upsert_species(&Species {
            scientific_name: "Withania somnifera".to_string(),
            code: "ASHWA".to_string(),
            vernacular_names: vec!["Ashwagandha".to_string()],
            season_months: None,
        })
        .await
        .unwrap();

    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    assert_eq!(recorded.batch.batch_id, "B-ASHWA-20250916-farmer-123");
}

#[tokio::test]
async fn idempotency_token_returns_same_event() {
    let store = MemoryStore::new();
    let first = record_collection_event(&store, &config(), event_request(Some("tok-1")))
        .await
        .unwrap();
    let second = record_collection_event(&store, &config(), event_request(Some("tok-1")))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.event.event_id, second.event.event_id);

    let page = list_collection_events(&store, EventFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn direct_duplicate_token_insert_is_rejected() {
    let store = MemoryStore::new();
    let winner = record_collection_event(&store, &config(), event_request(Some("tok-race")))
        .await
        .unwrap();

    // The store surfaces a token collision distinctly from other failures.
    let err = store.insert_event(&winner.event).await.unwrap_err();
    assert!(matches!(err, TraceError::DuplicateToken(_)));
}

/// Opens the race window: the next token lookup misses, as when another
/// writer commits the same token between the resolver's lookup and its
/// insert.
struct RaceWindowStore {
    inner: MemoryStore,
    skip_next_token_lookup: AtomicBool,
}

impl RaceWindowStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            skip_next_token_lookup: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TraceStore for RaceWindowStore {
    async fn upsert_species(&self, species: &Species) -> Result<()> {
        self.inner.upsert_species(species).await
    }

    async fn fetch_species_by_name(&self, scientific_name: &str) -> Result<Option<Species>> {
        self.inner.fetch_species_by_name(scientific_name).await
    }

    async fn insert_batch_if_absent(&self, batch: &Batch) -> Result<bool> {
        self.inner.insert_batch_if_absent(batch).await
    }

    async fn fetch_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        self.inner.fetch_batch(batch_id).await
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        self.inner.list_batches(filter).await
    }

    async fn update_batch_phase(&self, batch_id: &str, phase: BatchPhase) -> Result<()> {
        self.inner.update_batch_phase(batch_id, phase).await
    }

    async fn update_batch_gate(&self, batch_id: &str, gate: QualityGate) -> Result<()> {
        self.inner.update_batch_gate(batch_id, gate).await
    }

    async fn insert_event(&self, event: &CollectionEvent) -> Result<()> {
        self.inner.insert_event(event).await
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<CollectionEvent>> {
        self.inner.fetch_event(event_id).await
    }

    async fn fetch_event_by_token(&self, token: &str) -> Result<Option<CollectionEvent>> {
        if self.skip_next_token_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.fetch_event_by_token(token).await
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        page: Page,
    ) -> Result<PageOf<CollectionEvent>> {
        self.inner.list_events(filter, page).await
    }

    async fn list_events_by_batch(&self, batch_id: &str) -> Result<Vec<CollectionEvent>> {
        self.inner.list_events_by_batch(batch_id).await
    }

    async fn insert_step(&self, step: &ProcessingStep) -> Result<()> {
        self.inner.insert_step(step).await
    }

    async fn list_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>> {
        self.inner.list_steps(batch_id).await
    }

    async fn insert_lab_test(&self, test: &LabTest) -> Result<()> {
        self.inner.insert_lab_test(test).await
    }

    async fn list_lab_tests(&self, batch_id: &str, page: Page) -> Result<PageOf<LabTest>> {
        self.inner.list_lab_tests(batch_id, page).await
    }

    async fn set_chain_status(
        &self,
        entity: ChainEntity,
        entity_id: &str,
        status: Option<ChainStatus>,
        hash: Option<String>,
    ) -> Result<()> {
        self.inner
            .set_chain_status(entity, entity_id, status, hash)
            .await
    }
}

#[tokio::test]
async fn duplicate_token_insert_race_recovers_with_winners_event() {
    let store = RaceWindowStore::new();
    let winner = record_collection_event(&store, &config(), event_request(Some("tok-race")))
        .await
        .unwrap();
    assert!(winner.created);

    // The loser's pre-insert lookup misses, its insert collides on the
    // token, and the recovery re-fetch hands back the winner's record.
    store.skip_next_token_lookup.store(true, Ordering::SeqCst);
    let loser = record_collection_event(&store, &config(), event_request(Some("tok-race")))
        .await
        .unwrap();
    assert!(!loser.created);
    assert_eq!(loser.event.event_id, winner.event.event_id);
    assert_eq!(loser.batch.batch_id, winner.batch.batch_id);

    let page = list_collection_events(&store, EventFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn out_of_season_event_is_rejected_with_violation() {
    let store = MemoryStore::new();
    store
        .upsert_species(&Species {
            scientific_name: "Withania somnifera".to_string(),
            code: "ASHWA".to_string(),
            vernacular_names: vec![],
            season_months: Some(vec![10, 11, 12, 1]),
        })
        .await
        .unwrap();

    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    assert_eq!(recorded.event.status, EventStatus::Rejected);
    assert_eq!(recorded.event.violations, vec!["OUT_OF_SEASON".to_string()]);
}

#[tokio::test]
async fn fetch_event_round_trip_and_not_found() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();

    let fetched = fetch_collection_event(&store, recorded.event.event_id)
        .await
        .unwrap();
    assert_eq!(fetched, recorded.event);

    let missing = fetch_collection_event(&store, uuid::Uuid::new_v4()).await;
    assert!(matches!(missing, Err(TraceError::NotFound(_))));
}

#[tokio::test]
async fn event_listing_filters_and_paginates() {
    let store = MemoryStore::new();
    for hour in 8..13 {
        let mut request = event_request(None);
        request.timestamp = format!("2025-09-16T{hour:02}:00:00Z");
        record_collection_event(&store, &config(), request).await.unwrap();
    }
    let mut other = event_request(None);
    other.collector_id = "farmer-999".to_string();
    record_collection_event(&store, &config(), other).await.unwrap();

    let filter = EventFilter {
        collector_id: Some("farmer-123".to_string()),
        ..EventFilter::default()
    };
    let page = list_collection_events(&store, filter.clone(), Page::new(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);

    let page_three = list_collection_events(&store, filter, Page::new(3, 2))
        .await
        .unwrap();
    assert_eq!(page_three.items.len(), 1);
}

#[tokio::test]
async fn processing_step_advances_phase() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let batch_id = recorded.batch.batch_id;

    let receipt = record_processing_step(
        &store,
        NewProcessingStep {
            batch_id: batch_id.clone(),
            step_type: "RECEIPT".to_string(),
            status: Some("DONE".to_string()),
            started_at: None,
            ended_at: None,
            params: Some(serde_json::json!({"truck": "UP32-1184"})),
            metrics: None,
            notes: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(receipt.batch_phase, BatchPhase::ReceiptDone);
    assert!(receipt.step.hash.is_some());

    let drying = record_processing_step(
        &store,
        NewProcessingStep {
            batch_id: batch_id.clone(),
            step_type: "DRYING".to_string(),
            status: None,
            started_at: None,
            ended_at: None,
            params: None,
            metrics: Some(serde_json::json!({"final_moisture_pct": 9.1})),
            notes: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(drying.batch_phase, BatchPhase::DryingDone);

    let batch = store.fetch_batch(&batch_id).await.unwrap().unwrap();
    assert_eq!(batch.phase, BatchPhase::DryingDone);
}

#[tokio::test]
async fn unmapped_step_type_leaves_phase_untouched() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let batch_id = recorded.batch.batch_id;

    let result = record_processing_step(
        &store,
        NewProcessingStep {
            batch_id: batch_id.clone(),
            step_type: "FUMIGATION".to_string(),
            status: None,
            started_at: None,
            ended_at: None,
            params: None,
            metrics: None,
            notes: Some("not in the table".to_string()),
        },
    )
    .await
    .unwrap();

    assert_eq!(result.batch_phase, BatchPhase::Created);
    let batch = store.fetch_batch(&batch_id).await.unwrap().unwrap();
    assert_eq!(batch.phase, BatchPhase::Created);
}

#[tokio::test]
async fn processing_step_for_missing_batch_is_not_found() {
    let store = MemoryStore::new();
    let result = record_processing_step(
        &store,
        NewProcessingStep {
            batch_id: "B-NOPE-20250101-x".to_string(),
            step_type: "RECEIPT".to_string(),
            status: None,
            started_at: None,
            ended_at: None,
            params: None,
            metrics: None,
            notes: None,
        },
    )
    .await;
    assert!(matches!(result, Err(TraceError::NotFound(_))));
}

#[tokio::test]
async fn lab_test_sets_batch_gate() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let batch_id = recorded.batch.batch_id;

    let passed = record_lab_test(
        &store,
        &config(),
        NewLabTest {
            batch_id: batch_id.clone(),
            moisture_pct: 10.5,
            pesticide_pass: true,
            pdf_url: Some("https://lab.example.org/report-1.pdf".to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(passed.test.gate, QualityGate::Pass);
    assert_eq!(passed.batch_gate, QualityGate::Pass);

    let failed = record_lab_test(
        &store,
        &config(),
        NewLabTest {
            batch_id: batch_id.clone(),
            moisture_pct: 15.0,
            pesticide_pass: true,
            pdf_url: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(failed.test.gate, QualityGate::Fail);

    // Last write wins on the batch.
    let batch = store.fetch_batch(&batch_id).await.unwrap().unwrap();
    assert_eq!(batch.quality_gate, QualityGate::Fail);

    let page = list_lab_tests(&store, &batch_id, Page::default()).await.unwrap();
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn batch_listing_honors_filters() {
    let store = MemoryStore::new();
    record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let mut other = event_request(None);
    other.species = "Ocimum tenuiflorum".to_string();
    record_collection_event(&store, &config(), other).await.unwrap();

    let all = list_batches(&store, BatchFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let filtered = list_batches(
        &store,
        BatchFilter {
            species: Some("Withania somnifera".to_string()),
            phase: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].batch_id, "B-WITHA-20250916-farmer-123");

    let none = list_batches(
        &store,
        BatchFilter {
            species: None,
            phase: Some(BatchPhase::GrindingDone),
        },
    )
    .await
    .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn provenance_bundle_masks_collector_ids() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let batch_id = recorded.batch.batch_id;

    record_processing_step(
        &store,
        NewProcessingStep {
            batch_id: batch_id.clone(),
            step_type: "DRYING".to_string(),
            status: None,
            started_at: None,
            ended_at: None,
            params: None,
            metrics: None,
            notes: None,
        },
    )
    .await
    .unwrap();
    record_lab_test(
        &store,
        &config(),
        NewLabTest {
            batch_id: batch_id.clone(),
            moisture_pct: 8.0,
            pesticide_pass: true,
            pdf_url: None,
        },
    )
    .await
    .unwrap();

    let bundle = build_provenance_bundle(&store, &batch_id).await.unwrap();
    assert_eq!(bundle.batch.collector_id, "fa***3");
    assert_eq!(bundle.events.len(), 1);
    assert_eq!(bundle.events[0].collector_id, "fa***3");
    assert_eq!(bundle.steps.len(), 1);
    assert_eq!(bundle.lab_tests.len(), 1);

    let missing = build_provenance_bundle(&store, "B-NOPE-20250101-x").await;
    assert!(matches!(missing, Err(TraceError::NotFound(_))));
}

#[tokio::test]
async fn external_status_updates_each_entity() {
    let store = MemoryStore::new();
    let recorded = record_collection_event(&store, &config(), event_request(None))
        .await
        .unwrap();
    let batch_id = recorded.batch.batch_id;

    set_external_status(
        &store,
        ChainStatusUpdate {
            entity: ChainEntity::Batch,
            entity_id: batch_id.clone(),
            status: Some(ChainStatus::Ready),
            hash: None,
        },
    )
    .await
    .unwrap();

    set_external_status(
        &store,
        ChainStatusUpdate {
            entity: ChainEntity::CollectionEvent,
            entity_id: recorded.event.event_id.to_string(),
            status: Some(ChainStatus::Complete),
            hash: Some("deadbeef".repeat(8)),
        },
    )
    .await
    .unwrap();

    let batch = store.fetch_batch(&batch_id).await.unwrap().unwrap();
    assert_eq!(batch.chain_status, Some(ChainStatus::Ready));

    let event = store
        .fetch_event(recorded.event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.chain_status, Some(ChainStatus::Complete));
    assert_eq!(event.integrity_hash.as_deref(), Some("deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"));
}

#[tokio::test]
async fn external_status_requires_a_field_and_an_existing_row() {
    let store = MemoryStore::new();

    let empty = set_external_status(
        &store,
        ChainStatusUpdate {
            entity: ChainEntity::Batch,
            entity_id: "B-WITHA-20250916-farmer-123".to_string(),
            status: None,
            hash: None,
        },
    )
    .await;
    assert!(matches!(empty, Err(TraceError::Validation(_))));

    let missing = set_external_status(
        &store,
        ChainStatusUpdate {
            entity: ChainEntity::Batch,
            entity_id: "B-WITHA-20250916-farmer-123".to_string(),
            status: Some(ChainStatus::Ready),
            hash: None,
        },
    )
    .await;
    assert!(matches!(missing, Err(TraceError::NotFound(_))));
}

#[tokio::test]
async fn invalid_inputs_are_validation_errors() {
    let store = MemoryStore::new();
    let cfg = config();

    let mut bad_lat = event_request(None);
    bad_lat.geo.lat = 91.0;
    assert!(matches!(
        record_collection_event(&store, &cfg, bad_lat).await,
        Err(TraceError::Validation(_))
    ));

    let mut bad_ts = event_request(None);
    bad_ts.timestamp = "not-a-time".to_string();
    assert!(matches!(
        record_collection_event(&store, &cfg, bad_ts).await,
        Err(TraceError::Validation(_))
    ));

    let mut no_species = event_request(None);
    no_species.species = "   ".to_string();
    assert!(matches!(
        record_collection_event(&store, &cfg, no_species).await,
        Err(TraceError::Validation(_))
    ));

    let bad_moisture = record_lab_test(
        &store,
        &cfg,
        NewLabTest {
            batch_id: "B-WITHA-20250916-farmer-123".to_string(),
            moisture_pct: f64::NAN,
            pesticide_pass: true,
            pdf_url: None,
        },
    )
    .await;
    assert!(matches!(bad_moisture, Err(TraceError::Validation(_))));
}
