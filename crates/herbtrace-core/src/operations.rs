// crates/herbtrace-core/src/operations.rs
//
// The logical operations invoked by request handlers. Each is a short,
// side-effect-sequenced run over the store; the only concurrency-safety
// mechanisms are the store's insert-if-absent primitive for batches and
// the idempotency-token uniqueness constraint for events.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::canonical;
use crate::error::{Result, TraceError};
use crate::identity;
use crate::masking::mask_collector_id;
use crate::store::TraceStore;
use crate::transitions;
use crate::types::{
    Batch, BatchFilter, BatchPhase, BatchSummary, ChainEntity, ChainStatus, CollectionEvent,
    EventFilter, EventStatus, GeoPoint, LabTest, Page, PageOf, ProcessingStep, ProvenanceBundle,
    QualityGate, Species,
};

pub const VIOLATION_OUT_OF_SEASON: &str = "OUT_OF_SEASON";

/// Externally supplied configuration. The core enforces no defaults.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Moisture ceiling for the lab quality gate, percent.
    pub moisture_threshold_pct: f64,
    /// Base URL for batch provenance links (the QR target). `None` leaves
    /// `external_ref` unset on new batches.
    pub qr_base_url: Option<String>,
}

impl CoreConfig {
    pub fn external_reference(&self, batch_id: &str) -> Option<String> {
        self.qr_base_url
            .as_deref()
            .map(|base| format!("{}/provenance/{batch_id}", base.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCollectionEvent {
    pub species: String,
    pub collector_id: String,
    pub geo: GeoPoint,
    /// RFC 3339, or naive ISO 8601 interpreted as UTC.
    pub timestamp: String,
    pub idempotency_token: Option<String>,
    pub ai_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub event: CollectionEvent,
    pub batch: BatchSummary,
    /// False when an idempotency token matched a previously created record.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessingStep {
    pub batch_id: String,
    pub step_type: String,
    pub status: Option<String>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub metrics: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedStep {
    pub step: ProcessingStep,
    pub batch_phase: BatchPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLabTest {
    pub batch_id: String,
    pub moisture_pct: f64,
    pub pesticide_pass: bool,
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedLabTest {
    pub test: LabTest,
    pub batch_gate: QualityGate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatusUpdate {
    pub entity: ChainEntity,
    pub entity_id: String,
    pub status: Option<ChainStatus>,
    pub hash: Option<String>,
}

/// Records a collection event, deriving and auto-creating its batch.
///
/// Exactly-once per idempotency token: a supplied token is looked up
/// before creation, and a `DuplicateToken` rejection from a concurrent
/// duplicate insert is recovered by re-fetch, never surfaced.
pub async fn record_collection_event(
    store: &dyn TraceStore,
    config: &CoreConfig,
    request: NewCollectionEvent,
) -> Result<RecordedEvent> {
    validate_event_request(&request)?;

    if let Some(token) = &request.idempotency_token {
        if let Some(existing) = store.fetch_event_by_token(token).await? {
            debug!(token = %token, event_id = %existing.event_id, "idempotency token matched existing event");
            let batch = require_batch(store, &existing.batch_id).await?;
            return Ok(RecordedEvent {
                batch: BatchSummary::from(&batch),
                event: existing,
                created: false,
            });
        }
    }

    let timestamp = identity::parse_utc_timestamp(&request.timestamp)?;
    let species_record = store.fetch_species_by_name(&request.species).await?;
    let species_code = match &species_record {
        Some(species) => species.code.clone(),
        None => identity::fallback_species_code(&request.species),
    };

    let batch_id = identity::compose_batch_id(&species_code, &request.collector_id, timestamp)?;
    let batch = ensure_batch(store, config, &batch_id, &request, timestamp).await?;

    let violations = collect_violations(species_record.as_ref(), timestamp);
    let status = if violations.is_empty() {
        EventStatus::Accepted
    } else {
        EventStatus::Rejected
    };

    let mut event = CollectionEvent {
        event_id: Uuid::new_v4(),
        species: request.species.clone(),
        collector_id: request.collector_id.clone(),
        geo: request.geo,
        timestamp_utc: timestamp,
        ai_confidence: request.ai_confidence,
        status,
        violations,
        batch_id: batch.batch_id.clone(),
        idempotency_token: request.idempotency_token.clone(),
        integrity_hash: None,
        chain_status: None,
        created_at: Utc::now(),
    };
    event.integrity_hash = Some(canonical::content_fingerprint(&event.integrity_payload()));

    match store.insert_event(&event).await {
        Ok(()) => {
            info!(event_id = %event.event_id, batch_id = %batch.batch_id, status = status.as_str(), "recorded collection event");
            Ok(RecordedEvent {
                batch: BatchSummary::from(&batch),
                event,
                created: true,
            })
        }
        // Race loser: someone created the record for this token between our
        // lookup and insert. Re-fetch to preserve exactly-once semantics.
        Err(TraceError::DuplicateToken(token)) => {
            debug!(token = %token, "lost idempotency race, re-fetching");
            let existing = store
                .fetch_event_by_token(&token)
                .await?
                .ok_or_else(|| TraceError::store("event vanished after duplicate-token rejection"))?;
            let batch = require_batch(store, &existing.batch_id).await?;
            Ok(RecordedEvent {
                batch: BatchSummary::from(&batch),
                event: existing,
                created: false,
            })
        }
        Err(err) => Err(err),
    }
}

pub async fn fetch_collection_event(
    store: &dyn TraceStore,
    event_id: Uuid,
) -> Result<CollectionEvent> {
    store
        .fetch_event(event_id)
        .await?
        .ok_or_else(|| TraceError::not_found(format!("collection event '{event_id}'")))
}

pub async fn list_collection_events(
    store: &dyn TraceStore,
    filter: EventFilter,
    page: Page,
) -> Result<PageOf<CollectionEvent>> {
    store.list_events(&filter, page.clamped()).await
}

/// Records a processing step and advances the batch phase when the step
/// type is in the transition table; anything else leaves the phase alone.
pub async fn record_processing_step(
    store: &dyn TraceStore,
    request: NewProcessingStep,
) -> Result<RecordedStep> {
    if request.step_type.trim().is_empty() {
        return Err(TraceError::validation("step type must not be empty"));
    }
    let batch = require_batch(store, &request.batch_id).await?;

    let mut step = ProcessingStep {
        step_id: Uuid::new_v4(),
        batch_id: request.batch_id.clone(),
        step_type: request.step_type.clone(),
        status: request.status,
        started_at: request.started_at,
        ended_at: request.ended_at,
        params: request.params,
        metrics: request.metrics,
        notes: request.notes,
        hash: None,
        chain_status: None,
        created_at: Utc::now(),
    };
    step.hash = Some(canonical::content_fingerprint(&step.integrity_payload()));

    store.insert_step(&step).await?;

    let batch_phase = match transitions::next_phase(&request.step_type) {
        Some(phase) => {
            store.update_batch_phase(&request.batch_id, phase).await?;
            info!(batch_id = %request.batch_id, step_type = %request.step_type, phase = phase.as_str(), "advanced batch phase");
            phase
        }
        None => {
            debug!(step_type = %request.step_type, "step type has no phase mapping, leaving batch untouched");
            batch.phase
        }
    };

    Ok(RecordedStep { step, batch_phase })
}

pub async fn list_batches(store: &dyn TraceStore, filter: BatchFilter) -> Result<Vec<BatchSummary>> {
    let batches = store.list_batches(&filter).await?;
    Ok(batches.iter().map(BatchSummary::from).collect())
}

/// Records a lab test with its computed gate and overwrites the batch gate
/// (last-write-wins by design).
pub async fn record_lab_test(
    store: &dyn TraceStore,
    config: &CoreConfig,
    request: NewLabTest,
) -> Result<RecordedLabTest> {
    if !request.moisture_pct.is_finite() || request.moisture_pct < 0.0 {
        return Err(TraceError::validation(format!(
            "moisture percentage '{}' must be a non-negative number",
            request.moisture_pct
        )));
    }
    require_batch(store, &request.batch_id).await?;

    let gate = transitions::evaluate_gate(
        request.moisture_pct,
        request.pesticide_pass,
        config.moisture_threshold_pct,
    );

    let mut test = LabTest {
        test_id: Uuid::new_v4(),
        batch_id: request.batch_id.clone(),
        moisture_pct: request.moisture_pct,
        pesticide_pass: request.pesticide_pass,
        pdf_url: request.pdf_url,
        gate,
        evaluated_at: Utc::now(),
        hash: None,
        chain_status: None,
        created_at: Utc::now(),
    };
    test.hash = Some(canonical::content_fingerprint(&test.integrity_payload()));

    store.insert_lab_test(&test).await?;
    store.update_batch_gate(&request.batch_id, gate).await?;
    info!(batch_id = %request.batch_id, gate = gate.as_str(), "recorded lab test");

    Ok(RecordedLabTest {
        test,
        batch_gate: gate,
    })
}

pub async fn list_lab_tests(
    store: &dyn TraceStore,
    batch_id: &str,
    page: Page,
) -> Result<PageOf<LabTest>> {
    store.list_lab_tests(batch_id, page.clamped()).await
}

/// Assembles the read-only provenance view. The three child reads have no
/// ordering dependency, so they are issued concurrently; that is a latency
/// optimization only.
pub async fn build_provenance_bundle(
    store: &dyn TraceStore,
    batch_id: &str,
) -> Result<ProvenanceBundle> {
    let mut batch = require_batch(store, batch_id).await?;

    let (mut events, steps, lab_tests) = tokio::try_join!(
        store.list_events_by_batch(batch_id),
        store.list_steps(batch_id),
        store.list_lab_tests(batch_id, Page::new(1, crate::types::MAX_PAGE_SIZE)),
    )?;

    batch.collector_id = mask_collector_id(&batch.collector_id);
    for event in &mut events {
        event.collector_id = mask_collector_id(&event.collector_id);
    }

    Ok(ProvenanceBundle {
        batch,
        events,
        steps,
        lab_tests: lab_tests.items,
    })
}

/// Stores a status/hash pair on behalf of the external anchoring actor.
pub async fn set_external_status(
    store: &dyn TraceStore,
    update: ChainStatusUpdate,
) -> Result<()> {
    if update.status.is_none() && update.hash.is_none() {
        return Err(TraceError::validation(
            "at least one of status or hash must be supplied",
        ));
    }
    store
        .set_chain_status(update.entity, &update.entity_id, update.status, update.hash)
        .await?;
    info!(entity = update.entity.as_str(), entity_id = %update.entity_id, "updated chain status");
    Ok(())
}

async fn ensure_batch(
    store: &dyn TraceStore,
    config: &CoreConfig,
    batch_id: &str,
    request: &NewCollectionEvent,
    timestamp: chrono::DateTime<Utc>,
) -> Result<Batch> {
    let candidate = Batch {
        batch_id: batch_id.to_string(),
        species: request.species.clone(),
        collector_id: request.collector_id.clone(),
        date_utc: identity::batch_date(timestamp),
        phase: BatchPhase::Created,
        quality_gate: QualityGate::Pending,
        chain_status: None,
        external_ref: config.external_reference(batch_id),
        created_at: Utc::now(),
    };

    if store.insert_batch_if_absent(&candidate).await? {
        info!(batch_id, "created batch");
        return Ok(candidate);
    }

    // Lost the create (or the batch predates this event): the stored
    // record, possibly with an advanced phase, is authoritative.
    require_batch(store, batch_id).await
}

async fn require_batch(store: &dyn TraceStore, batch_id: &str) -> Result<Batch> {
    store
        .fetch_batch(batch_id)
        .await?
        .ok_or_else(|| TraceError::not_found(format!("batch '{batch_id}'")))
}

fn validate_event_request(request: &NewCollectionEvent) -> Result<()> {
    if request.species.trim().is_empty() {
        return Err(TraceError::validation("species must not be empty"));
    }
    identity::validate_collector_id(&request.collector_id)?;
    if !(-90.0..=90.0).contains(&request.geo.lat) {
        return Err(TraceError::validation(format!(
            "latitude '{}' out of range [-90, 90]",
            request.geo.lat
        )));
    }
    if !(-180.0..=180.0).contains(&request.geo.lng) {
        return Err(TraceError::validation(format!(
            "longitude '{}' out of range [-180, 180]",
            request.geo.lng
        )));
    }
    if let Some(accuracy) = request.geo.accuracy_m {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(TraceError::validation("geo accuracy must be non-negative"));
        }
    }
    if let Some(confidence) = request.ai_confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(TraceError::validation(format!(
                "ai confidence '{confidence}' out of range [0, 1]"
            )));
        }
    }
    if let Some(token) = &request.idempotency_token {
        if token.trim().is_empty() {
            return Err(TraceError::validation(
                "idempotency token must not be blank when supplied",
            ));
        }
    }
    Ok(())
}

fn collect_violations(species: Option<&Species>, timestamp: chrono::DateTime<Utc>) -> Vec<String> {
    use chrono::Datelike;

    let mut violations = Vec::new();
    if let Some(months) = species.and_then(|s| s.season_months.as_ref()) {
        if !months.is_empty() && !months.contains(&timestamp.month()) {
            violations.push(VIOLATION_OUT_OF_SEASON.to_string());
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_reference_joins_without_double_slash() {
        let config = CoreConfig {
            moisture_threshold_pct: 12.0,
            qr_base_url: Some("https://trace.example.org/".to_string()),
        };
        assert_eq!(
            config.external_reference("B-WITHA-20250916-farmer-123").as_deref(),
            Some("https://trace.example.org/provenance/B-WITHA-20250916-farmer-123")
        );
    }

    #[test]
    fn out_of_season_month_is_flagged() {
        let species = Species {
            scientific_name: "Withania somnifera".to_string(),
            code: "WITHA".to_string(),
            vernacular_names: vec![],
            season_months: Some(vec![10, 11, 12]),
        };
        let september = identity::parse_utc_timestamp("2025-09-16T09:00:00Z").unwrap();
        let november = identity::parse_utc_timestamp("2025-11-16T09:00:00Z").unwrap();
        assert_eq!(
            collect_violations(Some(&species), september),
            vec![VIOLATION_OUT_OF_SEASON.to_string()]
        );
        assert!(collect_violations(Some(&species), november).is_empty());
        assert!(collect_violations(None, september).is_empty());
    }
}
