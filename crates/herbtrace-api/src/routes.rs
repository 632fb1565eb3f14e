use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use herbtrace_core::error::TraceError;
use herbtrace_core::identity;
use herbtrace_core::operations::{
    self, ChainStatusUpdate, NewCollectionEvent, NewLabTest, NewProcessingStep, RecordedEvent,
    RecordedLabTest, RecordedStep,
};
use herbtrace_core::types::{
    BatchFilter, BatchPhase, BatchSummary, CollectionEvent, EventFilter, LabTest, Page, PageOf,
    ProvenanceBundle, DEFAULT_PAGE_SIZE,
};

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/collection-events", post(record_event).get(list_events))
        .route("/collection-events/{event_id}", get(fetch_event))
        .route("/processing-steps", post(record_step))
        .route("/batches", get(list_batches))
        .route("/lab-tests", post(record_lab_test).get(list_lab_tests))
        .route("/provenance/{batch_id}", get(provenance))
        .route("/chain-status", post(set_chain_status))
        .with_state(state)
}

/// Maps core errors onto the wire: validation 400, missing records 404,
/// an escaped duplicate-token 409, store failures 500.
pub struct ApiError(TraceError);

impl From<TraceError> for ApiError {
    fn from(err: TraceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            TraceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            TraceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            TraceError::DuplicateToken(_) => (StatusCode::CONFLICT, "DUPLICATE_TOKEN"),
            TraceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE"),
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let body = Json(json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn record_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewCollectionEvent>,
) -> Result<(StatusCode, Json<RecordedEvent>), ApiError> {
    let recorded =
        operations::record_collection_event(state.store.as_ref(), &state.config, payload).await?;
    let status = if recorded.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(recorded)))
}

async fn fetch_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<CollectionEvent>, ApiError> {
    let id = Uuid::parse_str(&event_id)
        .map_err(|_| TraceError::validation(format!("malformed event id '{event_id}'")))?;
    let event = operations::fetch_collection_event(state.store.as_ref(), id).await?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct EventListQuery {
    species: Option<String>,
    collector_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventListQuery>,
) -> Result<Json<PageOf<CollectionEvent>>, ApiError> {
    let filter = EventFilter {
        species: query.species,
        collector_id: query.collector_id,
        from_utc: query
            .from
            .as_deref()
            .map(identity::parse_range_start)
            .transpose()?,
        to_utc: query
            .to
            .as_deref()
            .map(identity::parse_range_end)
            .transpose()?,
    };
    let page = Page::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    let events = operations::list_collection_events(state.store.as_ref(), filter, page).await?;
    Ok(Json(events))
}

async fn record_step(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewProcessingStep>,
) -> Result<(StatusCode, Json<RecordedStep>), ApiError> {
    let recorded = operations::record_processing_step(state.store.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

#[derive(Debug, Deserialize)]
struct BatchListQuery {
    species: Option<String>,
    phase: Option<String>,
}

async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<Vec<BatchSummary>>, ApiError> {
    let phase = query
        .phase
        .as_deref()
        .map(|raw| {
            BatchPhase::from_str(raw)
                .ok_or_else(|| TraceError::validation(format!("unknown batch phase '{raw}'")))
        })
        .transpose()?;
    let filter = BatchFilter {
        species: query.species,
        phase,
    };
    let batches = operations::list_batches(state.store.as_ref(), filter).await?;
    Ok(Json(batches))
}

async fn record_lab_test(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewLabTest>,
) -> Result<(StatusCode, Json<RecordedLabTest>), ApiError> {
    let recorded =
        operations::record_lab_test(state.store.as_ref(), &state.config, payload).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

#[derive(Debug, Deserialize)]
struct LabListQuery {
    batch_id: String,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_lab_tests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LabListQuery>,
) -> Result<Json<PageOf<LabTest>>, ApiError> {
    let page = Page::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    let tests = operations::list_lab_tests(state.store.as_ref(), &query.batch_id, page).await?;
    Ok(Json(tests))
}

async fn provenance(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<ProvenanceBundle>, ApiError> {
    let bundle = operations::build_provenance_bundle(state.store.as_ref(), &batch_id).await?;
    Ok(Json(bundle))
}

async fn set_chain_status(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChainStatusUpdate>,
) -> Result<StatusCode, ApiError> {
    operations::set_external_status(state.store.as_ref(), payload).await?;
    Ok(StatusCode::NO_CONTENT)
}
