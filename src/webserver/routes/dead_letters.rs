/// Dead letter API routes
///
/// Inspection and manual re-submission of permanently failed deliveries.
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::broker::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use crate::webserver::state::AppState;
use crate::webserver::utils::{error_response, success_response};

#[derive(Debug, Deserialize)]
pub struct DeadLettersQuery {
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub since: Option<DateTime<Utc>>,

    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct DeadLettersListResponse {
    pub entries: Vec<DeadLetterEntry>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Create dead letter routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:id/retry", post(retry_dead_letter))
}

/// GET /api/dead-letters
async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLettersQuery>,
) -> Response {
    let filter = DeadLetterFilter {
        client_id: params.client_id,
        topic: params.topic,
        since: params.since,
        limit: Some(params.limit.min(1_000)),
    };

    match state.router.list_dead_letters(&filter) {
        Ok(entries) => success_response(DeadLettersListResponse {
            count: entries.len(),
            entries,
            timestamp: Utc::now(),
        }),
        Err(e) => error_response(&e),
    }
}

/// POST /api/dead-letters/:id/retry
async fn retry_dead_letter(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<i64>,
) -> Response {
    match state.router.retry_dead_letter(entry_id) {
        Ok(()) => success_response(serde_json::json!({
            "retried": entry_id,
        })),
        Err(e) => error_response(&e),
    }
}
