use axum::body::Bytes;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use circulation_core::{AggregateRoot, LoanId};
use circulation_loans::{Loan, LoanFields, LoanState};

use crate::app::errors;

// -------------------------
// Response DTOs
// -------------------------

/// Loan record as served over HTTP.
#[derive(Debug, Serialize)]
pub struct LoanResponse<'a> {
    pub id: String,
    pub revision: u64,
    pub metadata: LoanMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub struct LoanMetadata<'a> {
    pub loan_pid: String,
    pub state: LoanState,
    #[serde(flatten)]
    pub fields: &'a LoanFields,
}

pub fn loan_response(loan: &Loan) -> LoanResponse<'_> {
    let id = loan.loan_id().to_string();
    LoanResponse {
        revision: loan.version(),
        metadata: LoanMetadata {
            loan_pid: id.clone(),
            state: loan.state(),
            fields: loan.fields(),
        },
        id,
    }
}

// -------------------------
// Request helpers
// -------------------------

pub fn parse_loan_id(raw: &str) -> Result<LoanId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid loan id"))
}

/// Decode an optional JSON body; an empty body yields `T::default()`.
pub fn json_body_or_default<T>(body: &Bytes) -> Result<T, axum::response::Response>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use circulation_core::Pid;
    use circulation_loans::{LoanDraft, TransitionParams};

    #[test]
    fn loan_response_nests_fields_under_metadata() {
        let draft = LoanDraft {
            state: None,
            fields: LoanFields {
                item_pid: Some(Pid::new("item-1")),
                ..LoanFields::default()
            },
        };
        let loan = Loan::create(LoanId::new(), draft, LoanState::Created);

        let json = serde_json::to_value(loan_response(&loan)).unwrap();
        assert_eq!(json["id"], loan.loan_id().to_string());
        assert_eq!(json["revision"], 1);
        assert_eq!(json["metadata"]["state"], "CREATED");
        assert_eq!(json["metadata"]["item_pid"], "item-1");
        assert!(json["metadata"].get("patron_pid").is_none());
    }

    #[test]
    fn empty_body_means_no_parameters() {
        let params: TransitionParams = json_body_or_default(&Bytes::from_static(b"  ")).unwrap();
        assert_eq!(params, TransitionParams::default());
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = json_body_or_default::<TransitionParams>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
