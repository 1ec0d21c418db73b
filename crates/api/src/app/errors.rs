use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use circulation_infra::action_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::InvalidTrigger(trigger) => json_error(
            StatusCode::NOT_FOUND,
            "invalid_trigger",
            format!("unknown loan action '{trigger}'"),
        ),
        DispatchError::InvalidAction(msg) => {
            json_error(StatusCode::METHOD_NOT_ALLOWED, "invalid_action", msg)
        }
        DispatchError::AuthorizationDenied(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        DispatchError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("loan {id} not found"))
        }
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::Policy(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "policy_error", msg),
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
