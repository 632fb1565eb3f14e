// crates/herbtrace-core/src/store.rs

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    Batch, BatchFilter, BatchPhase, ChainEntity, ChainStatus, CollectionEvent, EventFilter,
    LabTest, Page, PageOf, ProcessingStep, QualityGate, Species,
};

/// Per-entity keyed record store. The concurrency contract lives here:
/// `insert_batch_if_absent` must be atomic with respect to the batch-id
/// uniqueness constraint (two racing creators yield exactly one batch, the
/// loser a no-op), and `insert_event` must reject a duplicate idempotency
/// token with `TraceError::DuplicateToken`, distinct from a general store
/// failure, so the caller can re-fetch instead of duplicating.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn upsert_species(&self, species: &Species) -> Result<()>;
    async fn fetch_species_by_name(&self, scientific_name: &str) -> Result<Option<Species>>;

    /// Returns whether the batch was inserted. An existing batch's fields
    /// are never touched.
    async fn insert_batch_if_absent(&self, batch: &Batch) -> Result<bool>;
    async fn fetch_batch(&self, batch_id: &str) -> Result<Option<Batch>>;
    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>>;
    async fn update_batch_phase(&self, batch_id: &str, phase: BatchPhase) -> Result<()>;
    async fn update_batch_gate(&self, batch_id: &str, gate: QualityGate) -> Result<()>;

    async fn insert_event(&self, event: &CollectionEvent) -> Result<()>;
    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<CollectionEvent>>;
    async fn fetch_event_by_token(&self, token: &str) -> Result<Option<CollectionEvent>>;
    async fn list_events(&self, filter: &EventFilter, page: Page) -> Result<PageOf<CollectionEvent>>;
    async fn list_events_by_batch(&self, batch_id: &str) -> Result<Vec<CollectionEvent>>;

    async fn insert_step(&self, step: &ProcessingStep) -> Result<()>;
    async fn list_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>>;

    async fn insert_lab_test(&self, test: &LabTest) -> Result<()>;
    async fn list_lab_tests(&self, batch_id: &str, page: Page) -> Result<PageOf<LabTest>>;

    /// Writes the anchoring fields on behalf of the external actor. Fields
    /// passed as `None` are left unchanged; a missing row is `NotFound`.
    async fn set_chain_status(
        &self,
        entity: ChainEntity,
        entity_id: &str,
        status: Option<ChainStatus>,
        hash: Option<String>,
    ) -> Result<()>;
}
