use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

use evalhub_infra::jobs::EnqueueRequest;

use crate::app::errors;
use crate::app::services::AppServices;

const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue))
        .route("/status", get(status))
        .route("/deadletters", get(list_dead_letters))
}

pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };

    match services.enqueuer.enqueue(&request).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => {
            error!(set = %request.set, error = %e, "set resolution failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "resolution_error", e.to_string())
        }
    }
}

pub async fn status() -> axum::response::Response {
    errors::json_error(
        StatusCode::NOT_IMPLEMENTED,
        "not_implemented",
        "evaluation status is not available yet",
    )
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<DeadLetterQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);
    match services.dead_letters.list(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string()),
    }
}
