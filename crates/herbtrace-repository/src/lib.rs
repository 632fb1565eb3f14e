//! Postgres implementation of the traceability record store.
//!
//! The grouping and idempotency invariants live in the schema: the batch's
//! composite id is its primary key (`INSERT ... ON CONFLICT DO NOTHING`
//! makes the creation race safe) and a partial unique index on the
//! idempotency token turns a duplicate submission into a unique violation,
//! surfaced as `TraceError::DuplicateToken`.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use herbtrace_core::error::{Result, TraceError};
use herbtrace_core::store::TraceStore;
use herbtrace_core::types::{
    Batch, BatchFilter, BatchPhase, ChainEntity, ChainStatus, CollectionEvent, EventFilter,
    EventStatus, GeoPoint, LabTest, Page, PageOf, ProcessingStep, QualityGate, Species,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(TraceError::store)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(TraceError::store)
    }
}

fn store_err(err: sqlx::Error) -> TraceError {
    TraceError::store(err)
}

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn parse_phase(value: &str) -> std::result::Result<BatchPhase, sqlx::Error> {
    BatchPhase::from_str(value).ok_or_else(|| decode_err(format!("invalid batch phase '{value}'")))
}

fn parse_gate(value: &str) -> std::result::Result<QualityGate, sqlx::Error> {
    QualityGate::from_str(value).ok_or_else(|| decode_err(format!("invalid quality gate '{value}'")))
}

fn parse_event_status(value: &str) -> std::result::Result<EventStatus, sqlx::Error> {
    EventStatus::from_str(value).ok_or_else(|| decode_err(format!("invalid event status '{value}'")))
}

fn parse_chain_status(
    value: Option<String>,
) -> std::result::Result<Option<ChainStatus>, sqlx::Error> {
    match value {
        None => Ok(None),
        Some(s) => ChainStatus::from_str(&s)
            .map(Some)
            .ok_or_else(|| decode_err(format!("invalid chain status '{s}'"))),
    }
}

fn decode_species(row: &PgRow) -> std::result::Result<Species, sqlx::Error> {
    let vernacular: serde_json::Value = row.try_get("vernacular_names")?;
    let season: Option<serde_json::Value> = row.try_get("season_months")?;
    Ok(Species {
        scientific_name: row.try_get("scientific_name")?,
        code: row.try_get("code")?,
        vernacular_names: serde_json::from_value(vernacular)
            .map_err(|e| decode_err(format!("vernacular_names: {e}")))?,
        season_months: season
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| decode_err(format!("season_months: {e}")))?,
    })
}

fn decode_batch(row: &PgRow) -> std::result::Result<Batch, sqlx::Error> {
    let phase: String = row.try_get("phase")?;
    let gate: String = row.try_get("quality_gate")?;
    let chain: Option<String> = row.try_get("chain_status")?;
    Ok(Batch {
        batch_id: row.try_get("batch_id")?,
        species: row.try_get("species")?,
        collector_id: row.try_get("collector_id")?,
        date_utc: row.try_get("date_utc")?,
        phase: parse_phase(&phase)?,
        quality_gate: parse_gate(&gate)?,
        chain_status: parse_chain_status(chain)?,
        external_ref: row.try_get("external_ref")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_event(row: &PgRow) -> std::result::Result<CollectionEvent, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let chain: Option<String> = row.try_get("chain_status")?;
    let violations: serde_json::Value = row.try_get("violations")?;
    Ok(CollectionEvent {
        event_id: row.try_get("event_id")?,
        species: row.try_get("species")?,
        collector_id: row.try_get("collector_id")?,
        geo: GeoPoint {
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            accuracy_m: row.try_get("accuracy_m")?,
        },
        timestamp_utc: row.try_get("timestamp_utc")?,
        ai_confidence: row.try_get("ai_confidence")?,
        status: parse_event_status(&status)?,
        violations: serde_json::from_value(violations)
            .map_err(|e| decode_err(format!("violations: {e}")))?,
        batch_id: row.try_get("batch_id")?,
        idempotency_token: row.try_get("idempotency_token")?,
        integrity_hash: row.try_get("integrity_hash")?,
        chain_status: parse_chain_status(chain)?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_step(row: &PgRow) -> std::result::Result<ProcessingStep, sqlx::Error> {
    let chain: Option<String> = row.try_get("chain_status")?;
    Ok(ProcessingStep {
        step_id: row.try_get("step_id")?,
        batch_id: row.try_get("batch_id")?,
        step_type: row.try_get("step_type")?,
        status: row.try_get("status")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        params: row.try_get("params")?,
        metrics: row.try_get("metrics")?,
        notes: row.try_get("notes")?,
        hash: row.try_get("hash")?,
        chain_status: parse_chain_status(chain)?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_lab_test(row: &PgRow) -> std::result::Result<LabTest, sqlx::Error> {
    let gate: String = row.try_get("gate")?;
    let chain: Option<String> = row.try_get("chain_status")?;
    Ok(LabTest {
        test_id: row.try_get("test_id")?,
        batch_id: row.try_get("batch_id")?,
        moisture_pct: row.try_get("moisture_pct")?,
        pesticide_pass: row.try_get("pesticide_pass")?,
        pdf_url: row.try_get("pdf_url")?,
        gate: parse_gate(&gate)?,
        evaluated_at: row.try_get("evaluated_at")?,
        hash: row.try_get("hash")?,
        chain_status: parse_chain_status(chain)?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_entity_uuid(entity_id: &str) -> Result<Uuid> {
    Uuid::parse_str(entity_id)
        .map_err(|_| TraceError::validation(format!("malformed entity id '{entity_id}'")))
}

#[async_trait]
impl TraceStore for PostgresStore {
    async fn upsert_species(&self, species: &Species) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO species (scientific_name, code, vernacular_names, season_months)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scientific_name) DO UPDATE SET
                code = EXCLUDED.code,
                vernacular_names = EXCLUDED.vernacular_names,
                season_months = EXCLUDED.season_months
            "#,
        )
        .bind(&species.scientific_name)
        .bind(&species.code)
        .bind(serde_json::json!(species.vernacular_names))
        .bind(species.season_months.as_ref().map(|m| serde_json::json!(m)))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn fetch_species_by_name(&self, scientific_name: &str) -> Result<Option<Species>> {
        let row = sqlx::query(
            "SELECT scientific_name, code, vernacular_names, season_months FROM species WHERE scientific_name = $1",
        )
        .bind(scientific_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(|r| decode_species(&r)).transpose().map_err(store_err)
    }

    async fn insert_batch_if_absent(&self, batch: &Batch) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO batches (
                batch_id, species, collector_id, date_utc,
                phase, quality_gate, chain_status, external_ref, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (batch_id) DO NOTHING
            "#,
        )
        .bind(&batch.batch_id)
        .bind(&batch.species)
        .bind(&batch.collector_id)
        .bind(&batch.date_utc)
        .bind(batch.phase.as_str())
        .bind(batch.quality_gate.as_str())
        .bind(batch.chain_status.map(|s| s.as_str()))
        .bind(&batch.external_ref)
        .bind(batch.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.map(|r| decode_batch(&r)).transpose().map_err(store_err)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM batches
            WHERE ($1::text IS NULL OR species = $1)
              AND ($2::text IS NULL OR phase = $2)
            ORDER BY batch_id
            "#,
        )
        .bind(filter.species.as_deref())
        .bind(filter.phase.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(decode_batch).collect::<std::result::Result<_, _>>().map_err(store_err)
    }

    async fn update_batch_phase(&self, batch_id: &str, phase: BatchPhase) -> Result<()> {
        let result = sqlx::query("UPDATE batches SET phase = $1 WHERE batch_id = $2")
            .bind(phase.as_str())
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(TraceError::not_found(format!("batch '{batch_id}'")));
        }
        Ok(())
    }

    async fn update_batch_gate(&self, batch_id: &str, gate: QualityGate) -> Result<()> {
        let result = sqlx::query("UPDATE batches SET quality_gate = $1 WHERE batch_id = $2")
            .bind(gate.as_str())
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(TraceError::not_found(format!("batch '{batch_id}'")));
        }
        Ok(())
    }

    async fn insert_event(&self, event: &CollectionEvent) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO collection_events (
                event_id, species, collector_id, lat, lng, accuracy_m,
                timestamp_utc, ai_confidence, status, violations, batch_id,
                idempotency_token, integrity_hash, chain_status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.species)
        .bind(&event.collector_id)
        .bind(event.geo.lat)
        .bind(event.geo.lng)
        .bind(event.geo.accuracy_m)
        .bind(event.timestamp_utc)
        .bind(event.ai_confidence)
        .bind(event.status.as_str())
        .bind(serde_json::json!(event.violations))
        .bind(&event.batch_id)
        .bind(&event.idempotency_token)
        .bind(&event.integrity_hash)
        .bind(event.chain_status.map(|s| s.as_str()))
        .bind(event.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION)
                    && event.idempotency_token.is_some() =>
            {
                // The partial unique index on the token fired: a concurrent
                // duplicate submission won the insert.
                let token = event
                    .idempotency_token
                    .clone()
                    .unwrap_or_default();
                Err(TraceError::DuplicateToken(token))
            }
            Err(err) => Err(store_err(err)),
        }
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<CollectionEvent>> {
        let row = sqlx::query("SELECT * FROM collection_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.map(|r| decode_event(&r)).transpose().map_err(store_err)
    }

    async fn fetch_event_by_token(&self, token: &str) -> Result<Option<CollectionEvent>> {
        let row = sqlx::query("SELECT * FROM collection_events WHERE idempotency_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.map(|r| decode_event(&r)).transpose().map_err(store_err)
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        page: Page,
    ) -> Result<PageOf<CollectionEvent>> {
        let page = page.clamped();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM collection_events
            WHERE ($1::text IS NULL OR species = $1)
              AND ($2::text IS NULL OR collector_id = $2)
              AND ($3::timestamptz IS NULL OR timestamp_utc >= $3)
              AND ($4::timestamptz IS NULL OR timestamp_utc <= $4)
            "#,
        )
        .bind(filter.species.as_deref())
        .bind(filter.collector_id.as_deref())
        .bind(filter.from_utc)
        .bind(filter.to_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM collection_events
            WHERE ($1::text IS NULL OR species = $1)
              AND ($2::text IS NULL OR collector_id = $2)
              AND ($3::timestamptz IS NULL OR timestamp_utc >= $3)
              AND ($4::timestamptz IS NULL OR timestamp_utc <= $4)
            ORDER BY timestamp_utc, event_id
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.species.as_deref())
        .bind(filter.collector_id.as_deref())
        .bind(filter.from_utc)
        .bind(filter.to_utc)
        .bind(page.page_size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let items = rows
            .iter()
            .map(decode_event)
            .collect::<std::result::Result<_, _>>()
            .map_err(store_err)?;

        Ok(PageOf {
            items,
            total: total as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn list_events_by_batch(&self, batch_id: &str) -> Result<Vec<CollectionEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM collection_events WHERE batch_id = $1 ORDER BY timestamp_utc",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(decode_event).collect::<std::result::Result<_, _>>().map_err(store_err)
    }

    async fn insert_step(&self, step: &ProcessingStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_steps (
                step_id, batch_id, step_type, status, started_at, ended_at,
                params, metrics, notes, hash, chain_status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(step.step_id)
        .bind(&step.batch_id)
        .bind(&step.step_type)
        .bind(&step.status)
        .bind(step.started_at)
        .bind(step.ended_at)
        .bind(&step.params)
        .bind(&step.metrics)
        .bind(&step.notes)
        .bind(&step.hash)
        .bind(step.chain_status.map(|s| s.as_str()))
        .bind(step.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>> {
        let rows = sqlx::query(
            "SELECT * FROM processing_steps WHERE batch_id = $1 ORDER BY created_at",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(decode_step).collect::<std::result::Result<_, _>>().map_err(store_err)
    }

    async fn insert_lab_test(&self, test: &LabTest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_tests (
                test_id, batch_id, moisture_pct, pesticide_pass, pdf_url,
                gate, evaluated_at, hash, chain_status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(test.test_id)
        .bind(&test.batch_id)
        .bind(test.moisture_pct)
        .bind(test.pesticide_pass)
        .bind(&test.pdf_url)
        .bind(test.gate.as_str())
        .bind(test.evaluated_at)
        .bind(&test.hash)
        .bind(test.chain_status.map(|s| s.as_str()))
        .bind(test.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_lab_tests(&self, batch_id: &str, page: Page) -> Result<PageOf<LabTest>> {
        let page = page.clamped();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lab_tests WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM lab_tests
            WHERE batch_id = $1
            ORDER BY created_at
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(batch_id)
        .bind(page.page_size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let items = rows
            .iter()
            .map(decode_lab_test)
            .collect::<std::result::Result<_, _>>()
            .map_err(store_err)?;

        Ok(PageOf {
            items,
            total: total as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn set_chain_status(
        &self,
        entity: ChainEntity,
        entity_id: &str,
        status: Option<ChainStatus>,
        hash: Option<String>,
    ) -> Result<()> {
        let status_str = status.map(|s| s.as_str());

        let result = match entity {
            ChainEntity::Batch => {
                if hash.is_some() {
                    return Err(TraceError::validation("batch records carry no hash field"));
                }
                sqlx::query(
                    "UPDATE batches SET chain_status = COALESCE($1, chain_status) WHERE batch_id = $2",
                )
                .bind(status_str)
                .bind(entity_id)
                .execute(&self.pool)
                .await
            }
            ChainEntity::CollectionEvent => {
                let id = parse_entity_uuid(entity_id)?;
                sqlx::query(
                    r#"
                    UPDATE collection_events
                    SET chain_status = COALESCE($1, chain_status),
                        integrity_hash = COALESCE($2, integrity_hash)
                    WHERE event_id = $3
                    "#,
                )
                .bind(status_str)
                .bind(&hash)
                .bind(id)
                .execute(&self.pool)
                .await
            }
            ChainEntity::ProcessingStep => {
                let id = parse_entity_uuid(entity_id)?;
                sqlx::query(
                    r#"
                    UPDATE processing_steps
                    SET chain_status = COALESCE($1, chain_status),
                        hash = COALESCE($2, hash)
                    WHERE step_id = $3
                    "#,
                )
                .bind(status_str)
                .bind(&hash)
                .bind(id)
                .execute(&self.pool)
                .await
            }
            ChainEntity::LabTest => {
                let id = parse_entity_uuid(entity_id)?;
                sqlx::query(
                    r#"
                    UPDATE lab_tests
                    SET chain_status = COALESCE($1, chain_status),
                        hash = COALESCE($2, hash)
                    WHERE test_id = $3
                    "#,
                )
                .bind(status_str)
                .bind(&hash)
                .bind(id)
                .execute(&self.pool)
                .await
            }
        };

        let result = result.map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(TraceError::not_found(format!(
                "{} '{entity_id}'",
                entity.as_str()
            )));
        }
        Ok(())
    }
}
