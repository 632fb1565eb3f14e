// crates/herbtrace-core/src/memory.rs
//
// In-memory TraceStore honoring the same uniqueness semantics as the
// Postgres implementation. Used by the operation and router tests and by
// CLI dry-runs; not intended for production traffic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, TraceError};
use crate::store::TraceStore;
use crate::types::{
    Batch, BatchFilter, BatchPhase, ChainEntity, ChainStatus, CollectionEvent, EventFilter,
    LabTest, Page, PageOf, ProcessingStep, QualityGate, Species,
};

#[derive(Default)]
struct Inner {
    species: HashMap<String, Species>,
    batches: HashMap<String, Batch>,
    events: Vec<CollectionEvent>,
    steps: Vec<ProcessingStep>,
    lab_tests: Vec<LabTest>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the data is
        // still usable for the remaining assertions.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn paginate<T: Clone>(matching: Vec<T>, page: Page) -> PageOf<T> {
    let page = page.clamped();
    let total = matching.len() as u64;
    let items = matching
        .into_iter()
        .skip(page.offset())
        .take(page.page_size as usize)
        .collect();
    PageOf {
        items,
        total,
        page: page.page,
        page_size: page.page_size,
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn upsert_species(&self, species: &Species) -> Result<()> {
        self.lock()
            .species
            .insert(species.scientific_name.clone(), species.clone());
        Ok(())
    }

    async fn fetch_species_by_name(&self, scientific_name: &str) -> Result<Option<Species>> {
        Ok(self.lock().species.get(scientific_name).cloned())
    }

    async fn insert_batch_if_absent(&self, batch: &Batch) -> Result<bool> {
        let mut inner = self.lock();
        if inner.batches.contains_key(&batch.batch_id) {
            return Ok(false);
        }
        inner.batches.insert(batch.batch_id.clone(), batch.clone());
        Ok(true)
    }

    async fn fetch_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        Ok(self.lock().batches.get(batch_id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        let inner = self.lock();
        let mut batches: Vec<Batch> = inner
            .batches
            .values()
            .filter(|b| filter.species.as_deref().map_or(true, |s| b.species == s))
            .filter(|b| filter.phase.map_or(true, |p| b.phase == p))
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        Ok(batches)
    }

    async fn update_batch_phase(&self, batch_id: &str, phase: BatchPhase) -> Result<()> {
        let mut inner = self.lock();
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| TraceError::not_found(format!("batch '{batch_id}'")))?;
        batch.phase = phase;
        Ok(())
    }

    async fn update_batch_gate(&self, batch_id: &str, gate: QualityGate) -> Result<()> {
        let mut inner = self.lock();
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| TraceError::not_found(format!("batch '{batch_id}'")))?;
        batch.quality_gate = gate;
        Ok(())
    }

    async fn insert_event(&self, event: &CollectionEvent) -> Result<()> {
        let mut inner = self.lock();
        if let Some(token) = &event.idempotency_token {
            if inner
                .events
                .iter()
                .any(|e| e.idempotency_token.as_deref() == Some(token))
            {
                return Err(TraceError::DuplicateToken(token.clone()));
            }
        }
        inner.events.push(event.clone());
        Ok(())
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<CollectionEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned())
    }

    async fn fetch_event_by_token(&self, token: &str) -> Result<Option<CollectionEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .find(|e| e.idempotency_token.as_deref() == Some(token))
            .cloned())
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        page: Page,
    ) -> Result<PageOf<CollectionEvent>> {
        let inner = self.lock();
        let mut matching: Vec<CollectionEvent> = inner
            .events
            .iter()
            .filter(|e| filter.species.as_deref().map_or(true, |s| e.species == s))
            .filter(|e| {
                filter
                    .collector_id
                    .as_deref()
                    .map_or(true, |c| e.collector_id == c)
            })
            .filter(|e| filter.from_utc.map_or(true, |from| e.timestamp_utc >= from))
            .filter(|e| filter.to_utc.map_or(true, |to| e.timestamp_utc <= to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.timestamp_utc
                .cmp(&b.timestamp_utc)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(paginate(matching, page))
    }

    async fn list_events_by_batch(&self, batch_id: &str) -> Result<Vec<CollectionEvent>> {
        let inner = self.lock();
        let mut matching: Vec<CollectionEvent> = inner
            .events
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.timestamp_utc.cmp(&b.timestamp_utc));
        Ok(matching)
    }

    async fn insert_step(&self, step: &ProcessingStep) -> Result<()> {
        self.lock().steps.push(step.clone());
        Ok(())
    }

    async fn list_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>> {
        let inner = self.lock();
        let mut matching: Vec<ProcessingStep> = inner
            .steps
            .iter()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn insert_lab_test(&self, test: &LabTest) -> Result<()> {
        self.lock().lab_tests.push(test.clone());
        Ok(())
    }

    async fn list_lab_tests(&self, batch_id: &str, page: Page) -> Result<PageOf<LabTest>> {
        let inner = self.lock();
        let mut matching: Vec<LabTest> = inner
            .lab_tests
            .iter()
            .filter(|t| t.batch_id == batch_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(paginate(matching, page))
    }

    async fn set_chain_status(
        &self,
        entity: ChainEntity,
        entity_id: &str,
        status: Option<ChainStatus>,
        hash: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock();
        match entity {
            ChainEntity::Batch => {
                if hash.is_some() {
                    return Err(TraceError::validation(
                        "batch records carry no hash field",
                    ));
                }
                let batch = inner
                    .batches
                    .get_mut(entity_id)
                    .ok_or_else(|| TraceError::not_found(format!("batch '{entity_id}'")))?;
                if let Some(status) = status {
                    batch.chain_status = Some(status);
                }
            }
            ChainEntity::CollectionEvent => {
                let id = parse_entity_uuid(entity_id)?;
                let event = inner
                    .events
                    .iter_mut()
                    .find(|e| e.event_id == id)
                    .ok_or_else(|| TraceError::not_found(format!("collection event '{entity_id}'")))?;
                if let Some(status) = status {
                    event.chain_status = Some(status);
                }
                if let Some(hash) = hash {
                    event.integrity_hash = Some(hash);
                }
            }
            ChainEntity::ProcessingStep => {
                let id = parse_entity_uuid(entity_id)?;
                let step = inner
                    .steps
                    .iter_mut()
                    .find(|s| s.step_id == id)
                    .ok_or_else(|| TraceError::not_found(format!("processing step '{entity_id}'")))?;
                if let Some(status) = status {
                    step.chain_status = Some(status);
                }
                if let Some(hash) = hash {
                    step.hash = Some(hash);
                }
            }
            ChainEntity::LabTest => {
                let id = parse_entity_uuid(entity_id)?;
                let test = inner
                    .lab_tests
                    .iter_mut()
                    .find(|t| t.test_id == id)
                    .ok_or_else(|| TraceError::not_found(format!("lab test '{entity_id}'")))?;
                if let Some(status) = status {
                    test.chain_status = Some(status);
                }
                if let Some(hash) = hash {
                    test.hash = Some(hash);
                }
            }
        }
        Ok(())
    }
}

fn parse_entity_uuid(entity_id: &str) -> Result<Uuid> {
    Uuid::parse_str(entity_id)
        .map_err(|_| TraceError::validation(format!("malformed entity id '{entity_id}'")))
}
