/// Response helpers shared by route handlers
use crate::errors::RouterError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// 200 with a JSON body
pub fn success_response<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// Map a router error to its HTTP status and a JSON error body
pub fn error_response(error: &RouterError) -> Response {
    let status = match error {
        RouterError::InvalidTopicPattern(_) | RouterError::PublishRejected(_) => {
            StatusCode::BAD_REQUEST
        }
        RouterError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        RouterError::SubscriptionNotFound(_) | RouterError::DeadLetterNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        RouterError::DeliveryTimeout { .. }
        | RouterError::DeadLettered { .. }
        | RouterError::ConnectionLost(_) => StatusCode::CONFLICT,
        RouterError::StoreAppendFailure(_) | RouterError::StoreQueryFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let body = serde_json::json!({
        "error": error.to_string(),
        "code": error.code(),
    });

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                RouterError::InvalidTopicPattern("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                RouterError::QueueFull { capacity: 1 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                RouterError::DeadLetterNotFound(3),
                StatusCode::NOT_FOUND,
            ),
            (
                RouterError::StoreAppendFailure("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error_response(&error).status(), expected);
        }
    }
}
