use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use circulation_loans::{LoanDraft, TransitionParams};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/circulation/loan/", post(create_loan))
        .route("/circulation/loan/:id", get(get_loan))
        .route("/circulation/loan/:id/:action", post(loan_action))
}

pub async fn create_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Bytes,
) -> axum::response::Response {
    if let Err(e) = authz::require(&principal, authz::LOAN_CREATE) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let draft: LoanDraft = match dto::json_body_or_default(&body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    match services.dispatcher().create(draft) {
        Ok(loan) => (StatusCode::CREATED, Json(dto::loan_response(&loan))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&principal, authz::LOAN_READ) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let loan_id = match dto::parse_loan_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatcher().get(loan_id) {
        Ok(loan) => (StatusCode::OK, Json(dto::loan_response(&loan))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// `POST /circulation/loan/{id}/{action}`: run a loan action.
///
/// 202 with the updated loan on success, 405 when the action is not valid for
/// the loan right now, 403 when the caller may not perform it.
pub async fn loan_action(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, action)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let loan_id = match dto::parse_loan_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let params: TransitionParams = match dto::json_body_or_default(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let caller = authz::principal(&principal);
    match services.dispatcher().dispatch(loan_id, &action, &params, &caller) {
        Ok(loan) => (StatusCode::ACCEPTED, Json(dto::loan_response(&loan))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
