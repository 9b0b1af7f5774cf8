use axum::Router;

pub mod evaluations;
pub mod projects;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .nest("/evaluations", evaluations::router())
        .nest("/projects", projects::router())
}
