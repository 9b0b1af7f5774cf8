use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};

use evalhub_catalog::{AppendOutcome, Comparison, EvalResult, NewExperiment};
use evalhub_core::{ExperimentName, ProjectName};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:project/experiments", get(list_experiments).post(add_experiment))
        .route("/:project/experiments/:experiment/baseline", patch(set_baseline))
        .route("/:project/experiments/:experiment/results", post(append_result))
        .route("/:project/experiments/:experiment/compare", get(compare))
}

fn parse_project(raw: String) -> Result<ProjectName, axum::response::Response> {
    ProjectName::new(raw).map_err(errors::domain_error_to_response)
}

fn parse_pair(
    (project, experiment): (String, String),
) -> Result<(ProjectName, ExperimentName), axum::response::Response> {
    let project = parse_project(project)?;
    let experiment = ExperimentName::new(experiment).map_err(errors::domain_error_to_response)?;
    Ok((project, experiment))
}

pub async fn list_experiments(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
) -> axum::response::Response {
    let project = match parse_project(project) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.store.list_experiments(&project).await {
        Ok(experiments) => Json(experiments).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn add_experiment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    body: Result<Json<NewExperiment>, JsonRejection>,
) -> axum::response::Response {
    let project = match parse_project(project) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };

    match services.store.add_experiment(&project, body).await {
        Ok(experiment) => (StatusCode::CREATED, Json(experiment)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn set_baseline(
    Extension(services): Extension<Arc<AppServices>>,
    Path(names): Path<(String, String)>,
) -> axum::response::Response {
    let (project, experiment) = match parse_pair(names) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match services.store.set_baseline(&project, &experiment).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn append_result(
    Extension(services): Extension<Arc<AppServices>>,
    Path(names): Path<(String, String)>,
    body: Result<Json<EvalResult>, JsonRejection>,
) -> axum::response::Response {
    let (project, experiment) = match parse_pair(names) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let Json(result) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };

    match services.store.append_result(&project, &experiment, result).await {
        Ok(outcome) => {
            let status = match outcome {
                AppendOutcome::Appended => StatusCode::CREATED,
                AppendOutcome::Duplicate => StatusCode::OK,
            };
            (status, Json(serde_json::json!({ "outcome": outcome }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Chosen experiment's last and own-baseline sets against the project baseline.
pub async fn compare(
    Extension(services): Extension<Arc<AppServices>>,
    Path(names): Path<(String, String)>,
) -> axum::response::Response {
    let (project, experiment) = match parse_pair(names) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let chosen = match services.store.get_experiment(&project, &experiment).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("experiment {experiment} not found in project {project}"),
            );
        }
        Err(e) => return errors::store_error_to_response(e),
    };

    let baseline = match services.store.get_baseline(&project).await {
        Ok(b) => b,
        Err(e) => return errors::store_error_to_response(e),
    };

    Json(Comparison::between(baseline.as_ref(), &chosen)).into_response()
}
