/// Events API routes
///
/// Publish over HTTP, query the event store, and drive crash-recovery
/// replay for a session.
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::broker::event::Priority;
use crate::broker::router::PublishRequest;
use crate::broker::store::ReadFilter;
use crate::webserver::state::AppState;
use crate::webserver::utils::{error_response, success_response};

/// Query parameters for the events endpoint
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Topic filter (exact; repeatable via comma separation)
    pub topic: Option<String>,

    /// Minimum priority level
    pub min_priority: Option<u8>,

    /// Exclusive lower version bound
    pub from_version: Option<u64>,

    /// Inclusive upper version bound
    pub to_version: Option<u64>,

    /// Time window
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Replay request: by session, or by time window
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    /// Replay for this session's subscriptions
    pub client_id: Option<String>,

    /// Override the starting version (defaults to the session's ack floor)
    pub from_version: Option<u64>,

    /// Time-window replay across all topics (crash recovery inspection)
    pub from_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsListResponse {
    pub events: Vec<crate::broker::Event>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Create events routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(publish_event).get(get_events))
        .route("/events/replay", post(replay_events))
}

/// POST /api/events
async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> Response {
    match state.router.publish(request).await {
        Ok(receipt) => success_response(receipt),
        Err(e) => error_response(&e),
    }
}

/// GET /api/events
async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Response {
    let filter = ReadFilter {
        from_version: params.from_version,
        to_version: params.to_version,
        topics: params
            .topic
            .map(|t| t.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        min_priority: params.min_priority.map(Priority),
        since: params.since,
        until: params.until,
        limit: Some(params.limit.min(1_000)),
    };

    match state.router.store().read_range(&filter) {
        Ok(events) => success_response(EventsListResponse {
            count: events.len(),
            events,
            timestamp: Utc::now(),
        }),
        Err(e) => error_response(&e),
    }
}

/// POST /api/events/replay
///
/// With client_id: the events that session's subscriptions missed above its
/// ack floor (or the given from_version). With from_timestamp: a raw time
/// window over the store.
async fn replay_events(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReplayRequest>,
) -> Response {
    if let Some(client_id) = request.client_id {
        let from_version = request.from_version.or_else(|| {
            state
                .router
                .sessions()
                .get(&client_id)
                .map(|s| s.last_ack_version())
        });

        let Some(from_version) = from_version else {
            return error_response(&crate::errors::RouterError::SubscriptionNotFound(format!(
                "no session for client {}",
                client_id
            )));
        };

        return match state
            .router
            .replay_for_client(&client_id, from_version, request.limit)
        {
            Ok(replayed) => {
                let events: Vec<crate::broker::Event> =
                    replayed.into_iter().map(|(event, _)| event).collect();
                success_response(EventsListResponse {
                    count: events.len(),
                    events,
                    timestamp: Utc::now(),
                })
            }
            Err(e) => error_response(&e),
        };
    }

    if let Some(from_timestamp) = request.from_timestamp {
        let filter = ReadFilter {
            since: Some(from_timestamp),
            limit: request.limit,
            ..Default::default()
        };
        return match state.router.store().read_range(&filter) {
            Ok(events) => success_response(EventsListResponse {
                count: events.len(),
                events,
                timestamp: Utc::now(),
            }),
            Err(e) => error_response(&e),
        };
    }

    error_response(&crate::errors::RouterError::PublishRejected(
        "replay needs client_id or from_timestamp".to_string(),
    ))
}
