//! Loan entity: the mutable record moved through the circulation lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use circulation_core::{AggregateRoot, LoanId, Pid};

use crate::state::LoanState;

/// Transaction fields of a loan.
///
/// Identifier fields are written by pre-actions from trigger parameters; the
/// date fields are computed by policies during guard evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patron_pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_user_pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_location_pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location_pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_expire_date: Option<DateTime<Utc>>,
}

/// Values produced by a passing guard.
///
/// Only `Some` entries are written; a guard that merely approves returns
/// `ComputedFields::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedFields {
    pub pickup_location_pid: Option<Pid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub request_expire_date: Option<DateTime<Utc>>,
}

impl ComputedFields {
    pub fn merge_into(self, fields: &mut LoanFields) {
        if let Some(pid) = self.pickup_location_pid {
            fields.pickup_location_pid = Some(pid);
        }
        if let Some(date) = self.start_date {
            fields.start_date = Some(date);
        }
        if let Some(date) = self.end_date {
            fields.end_date = Some(date);
        }
        if let Some(date) = self.request_expire_date {
            fields.request_expire_date = Some(date);
        }
    }
}

/// Initial payload of a new loan.
///
/// `state` is optional; when absent the loan starts in the first declared
/// state of the transition table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LoanState>,
    #[serde(flatten)]
    pub fields: LoanFields,
}

/// Aggregate root: Loan.
///
/// `state` is only ever changed by the transition engine; the revision is
/// assigned by the store on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loan {
    id: LoanId,
    state: LoanState,
    #[serde(flatten)]
    fields: LoanFields,
    #[serde(rename = "revision")]
    version: u64,
}

impl Loan {
    /// Build a brand-new loan (revision 1) from its initial payload.
    pub fn create(id: LoanId, draft: LoanDraft, initial_state: LoanState) -> Self {
        Self {
            id,
            state: draft.state.unwrap_or(initial_state),
            fields: draft.fields,
            version: 1,
        }
    }

    /// Rebuild a loan from persisted data.
    ///
    /// Intended for storage adapters only; domain code changes state through
    /// the transition engine.
    pub fn restore(id: LoanId, state: LoanState, fields: LoanFields, version: u64) -> Self {
        Self {
            id,
            state,
            fields,
            version,
        }
    }

    pub fn loan_id(&self) -> LoanId {
        self.id
    }

    pub fn state(&self) -> LoanState {
        self.state
    }

    pub fn fields(&self) -> &LoanFields {
        &self.fields
    }

    /// Successor of this loan with a new state and field set, same revision.
    pub(crate) fn successor(&self, state: LoanState, fields: LoanFields) -> Self {
        Self {
            id: self.id,
            state,
            fields,
            version: self.version,
        }
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl AggregateRoot for Loan {
    type Id = LoanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
