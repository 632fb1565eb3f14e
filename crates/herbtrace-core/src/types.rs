// crates/herbtrace-core/src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle phase of a batch. Advanced by processing steps, never regressed
/// by the core (see `transitions::next_phase`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchPhase {
    Created,
    ReceiptDone,
    DryingDone,
    GrindingDone,
}

impl BatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPhase::Created => "CREATED",
            BatchPhase::ReceiptDone => "RECEIPT_DONE",
            BatchPhase::DryingDone => "DRYING_DONE",
            BatchPhase::GrindingDone => "GRINDING_DONE",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(BatchPhase::Created),
            "RECEIPT_DONE" => Some(BatchPhase::ReceiptDone),
            "DRYING_DONE" => Some(BatchPhase::DryingDone),
            "GRINDING_DONE" => Some(BatchPhase::GrindingDone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityGate {
    Pending,
    Pass,
    Fail,
}

impl QualityGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGate::Pending => "PENDING",
            QualityGate::Pass => "PASS",
            QualityGate::Fail => "FAIL",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(QualityGate::Pending),
            "PASS" => Some(QualityGate::Pass),
            "FAIL" => Some(QualityGate::Fail),
            _ => None,
        }
    }
}

/// External anchoring-process lifecycle marker. Opaque to the core; written
/// by `set_external_status` on behalf of the anchoring actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Ready,
    InProgress,
    Complete,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Ready => "READY",
            ChainStatus::InProgress => "IN_PROGRESS",
            ChainStatus::Complete => "COMPLETE",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "READY" => Some(ChainStatus::Ready),
            "IN_PROGRESS" => Some(ChainStatus::InProgress),
            "COMPLETE" => Some(ChainStatus::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Accepted,
    Rejected,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Accepted => "ACCEPTED",
            EventStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "ACCEPTED" => Some(EventStatus::Accepted),
            "REJECTED" => Some(EventStatus::Rejected),
            _ => None,
        }
    }
}

/// Target entity for an external anchoring-status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainEntity {
    Batch,
    CollectionEvent,
    ProcessingStep,
    LabTest,
}

impl ChainEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainEntity::Batch => "BATCH",
            ChainEntity::CollectionEvent => "COLLECTION_EVENT",
            ChainEntity::ProcessingStep => "PROCESSING_STEP",
            ChainEntity::LabTest => "LAB_TEST",
        }
    }
}

/// Seeded reference data. Keyed by scientific name; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Species {
    pub scientific_name: String,
    pub code: String,
    #[serde(default)]
    pub vernacular_names: Vec<String>,
    /// Calendar months (1-12) in which collection is in season. `None`
    /// disables the seasonal check entirely.
    pub season_months: Option<Vec<u32>>,
}

/// The aggregation root for one (species, collector, UTC day) of activity.
/// Its composite `batch_id` is the uniqueness mechanism itself: two events
/// for the same triple resolve to the same id by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    pub species: String,
    pub collector_id: String,
    /// UTC calendar date, `YYYY-MM-DD`.
    pub date_utc: String,
    pub phase: BatchPhase,
    pub quality_gate: QualityGate,
    pub chain_status: Option<ChainStatus>,
    /// Externally consumable link (e.g. the QR target), set at creation.
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub batch_id: String,
    pub species: String,
    pub date_utc: String,
    pub phase: BatchPhase,
    pub quality_gate: QualityGate,
    pub chain_status: Option<ChainStatus>,
}

impl From<&Batch> for BatchSummary {
    fn from(batch: &Batch) -> Self {
        BatchSummary {
            batch_id: batch.batch_id.clone(),
            species: batch.species.clone(),
            date_utc: batch.date_utc.clone(),
            phase: batch.phase,
            quality_gate: batch.quality_gate,
            chain_status: batch.chain_status,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f64>,
}

/// A single farmer-reported harvest occurrence. Immutable after creation
/// except for the anchoring fields (`integrity_hash`, `chain_status`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionEvent {
    pub event_id: Uuid,
    pub species: String,
    pub collector_id: String,
    pub geo: GeoPoint,
    pub timestamp_utc: DateTime<Utc>,
    pub ai_confidence: Option<f64>,
    pub status: EventStatus,
    pub violations: Vec<String>,
    pub batch_id: String,
    pub idempotency_token: Option<String>,
    pub integrity_hash: Option<String>,
    pub chain_status: Option<ChainStatus>,
    pub created_at: DateTime<Utc>,
}

impl CollectionEvent {
    /// The logical content that gets fingerprinted: everything except the
    /// hash and anchoring fields, so the digest stays stable no matter how
    /// the store re-encodes the record.
    pub fn integrity_payload(&self) -> Value {
        serde_json::json!({
            "event_id": self.event_id,
            "species": self.species,
            "collector_id": self.collector_id,
            "geo": {
                "lat": self.geo.lat,
                "lng": self.geo.lng,
                "accuracy_m": self.geo.accuracy_m,
            },
            "timestamp_utc": self.timestamp_utc.to_rfc3339(),
            "ai_confidence": self.ai_confidence,
            "status": self.status.as_str(),
            "violations": self.violations,
            "batch_id": self.batch_id,
            "idempotency_token": self.idempotency_token,
        })
    }
}

/// One handling step reported by a processor. No idempotency protection:
/// every request creates a new record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingStep {
    pub step_id: Uuid,
    pub batch_id: String,
    pub step_type: String,
    pub status: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub params: Option<Value>,
    pub metrics: Option<Value>,
    pub notes: Option<String>,
    pub hash: Option<String>,
    pub chain_status: Option<ChainStatus>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingStep {
    pub fn integrity_payload(&self) -> Value {
        serde_json::json!({
            "step_id": self.step_id,
            "batch_id": self.batch_id,
            "step_type": self.step_type,
            "status": self.status,
            "started_at": self.started_at.map(|t| t.to_rfc3339()),
            "ended_at": self.ended_at.map(|t| t.to_rfc3339()),
            "params": self.params,
            "metrics": self.metrics,
            "notes": self.notes,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabTest {
    pub test_id: Uuid,
    pub batch_id: String,
    pub moisture_pct: f64,
    pub pesticide_pass: bool,
    pub pdf_url: Option<String>,
    pub gate: QualityGate,
    pub evaluated_at: DateTime<Utc>,
    pub hash: Option<String>,
    pub chain_status: Option<ChainStatus>,
    pub created_at: DateTime<Utc>,
}

impl LabTest {
    pub fn integrity_payload(&self) -> Value {
        serde_json::json!({
            "test_id": self.test_id,
            "batch_id": self.batch_id,
            "moisture_pct": self.moisture_pct,
            "pesticide_pass": self.pesticide_pass,
            "pdf_url": self.pdf_url,
            "gate": self.gate.as_str(),
            "evaluated_at": self.evaluated_at.to_rfc3339(),
        })
    }
}

pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Page { page, page_size }.clamped()
    }

    /// Normalizes out-of-range requests: page numbering starts at 1 and the
    /// page size is capped at `MAX_PAGE_SIZE`.
    pub fn clamped(self) -> Self {
        Page {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub species: Option<String>,
    pub collector_id: Option<String>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    pub species: Option<String>,
    pub phase: Option<BatchPhase>,
}

/// Read-only aggregated view across the four entity types, with collector
/// ids masked for public consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceBundle {
    pub batch: Batch,
    pub events: Vec<CollectionEvent>,
    pub steps: Vec<ProcessingStep>,
    pub lab_tests: Vec<LabTest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            BatchPhase::Created,
            BatchPhase::ReceiptDone,
            BatchPhase::DryingDone,
            BatchPhase::GrindingDone,
        ] {
            assert_eq!(BatchPhase::from_str(phase.as_str()), Some(phase));
        }
        assert_eq!(BatchPhase::from_str("BOTTLED"), None);
    }

    #[test]
    fn page_clamps_size_and_floor() {
        let page = Page::new(0, 5000);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Page::new(3, 25);
        assert_eq!(page.offset(), 50);
    }
}
