use axum::{routing::get, Router};

pub mod loans;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(loans::router())
}
