//! Transition engine.
//!
//! ```text
//! apply(loan, trigger, params)
//!   ↓
//! 1. candidates = definitions with this trigger whose source is loan.state
//!   ↓
//! 2. per candidate, in declaration order, on a staged copy of the fields:
//!      pre-action → guards (all must pass) → unless (all must fail)
//!   ↓
//! 3. first passing candidate: commit {dest, staged fields} with an
//!    optimistic revision check, then install it on the in-memory loan
//! ```
//!
//! Pre-action writes and guard outputs only ever touch the staged copy. A
//! rejected candidate, a policy failure or a stale commit leaves the loan
//! exactly as it was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use circulation_core::{AggregateRoot, ExpectedVersion, LoanId};

use crate::loan::{Loan, LoanFields};
use crate::params::TransitionParams;
use crate::policy::PolicyError;
use crate::registry::GuardContext;
use crate::state::LoanState;
use crate::table::{TransitionDefinition, TransitionTable};

/// Failure of a trigger call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The trigger is not declared by any transition.
    #[error("invalid trigger '{0}'")]
    InvalidTrigger(String),

    /// No definition of the trigger starts from the loan's current state.
    #[error("no transition '{trigger}' from state {state}")]
    NoMatchingTransition { trigger: String, state: LoanState },

    /// Definitions matched, but every candidate was rejected by its guards.
    #[error("no valid transition '{trigger}' from state {state}")]
    NoValidTransition { trigger: String, state: LoanState },

    /// A policy provider failed while a guard was evaluated.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The loan changed since it was read.
    #[error("concurrent modification of loan {loan_id}: {message}")]
    ConcurrentModification { loan_id: LoanId, message: String },

    #[error("commit failed: {0}")]
    Commit(String),
}

impl TransitionError {
    /// Wrong state and policy rejection are reported identically to callers.
    pub fn is_invalid_action(&self) -> bool {
        matches!(
            self,
            TransitionError::NoMatchingTransition { .. } | TransitionError::NoValidTransition { .. }
        )
    }
}

/// Failure reported by the persistence side of a commit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("stale revision: {0}")]
    Conflict(String),

    #[error("{0}")]
    Backend(String),
}

/// Persistence hook invoked exactly once per successful transition.
///
/// Implementations must reject the write when the stored revision differs
/// from `expected`, and return the new revision otherwise.
pub trait LoanCommitter {
    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, CommitError>;
}

impl<C: LoanCommitter + ?Sized> LoanCommitter for Arc<C> {
    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, CommitError> {
        (**self).commit(loan, expected)
    }
}

/// Outcome of evaluating a trigger against a loan, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTransition {
    loan_id: LoanId,
    trigger: String,
    from: LoanState,
    to: LoanState,
    fields: LoanFields,
    base_version: u64,
    candidate: usize,
}

impl StagedTransition {
    pub fn loan_id(&self) -> LoanId {
        self.loan_id
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn from(&self) -> LoanState {
        self.from
    }

    pub fn to(&self) -> LoanState {
        self.to
    }

    /// Field values the loan will carry once committed.
    pub fn fields(&self) -> &LoanFields {
        &self.fields
    }

    /// Revision of the loan the evaluation was based on.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Index of the selected definition among the candidates.
    pub fn candidate(&self) -> usize {
        self.candidate
    }
}

/// Summary of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub loan_id: LoanId,
    pub trigger: String,
    pub from: LoanState,
    pub to: LoanState,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct TransitionEngine {
    table: Arc<TransitionTable>,
}

impl TransitionEngine {
    pub fn new(table: Arc<TransitionTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Run `trigger` on `loan` and commit the result through `committer`.
    ///
    /// `transaction_date` defaults to the time of this call.
    pub fn apply<C>(
        &self,
        loan: &mut Loan,
        trigger: &str,
        params: &TransitionParams,
        committer: &C,
    ) -> Result<AppliedTransition, TransitionError>
    where
        C: LoanCommitter + ?Sized,
    {
        self.apply_at(loan, trigger, params, Utc::now(), committer)
    }

    /// [`apply`](Self::apply) with an explicit "now".
    pub fn apply_at<C>(
        &self,
        loan: &mut Loan,
        trigger: &str,
        params: &TransitionParams,
        now: DateTime<Utc>,
        committer: &C,
    ) -> Result<AppliedTransition, TransitionError>
    where
        C: LoanCommitter + ?Sized,
    {
        let staged = self.evaluate(loan, trigger, params, now)?;
        self.commit(loan, staged, committer)
    }

    /// Select the transition `trigger` would take, without mutating `loan`.
    pub fn evaluate(
        &self,
        loan: &Loan,
        trigger: &str,
        params: &TransitionParams,
        now: DateTime<Utc>,
    ) -> Result<StagedTransition, TransitionError> {
        if !self.table.has_trigger(trigger) {
            return Err(TransitionError::InvalidTrigger(trigger.to_string()));
        }

        let from = loan.state();
        let params = params.with_default_transaction_date(now);
        let mut matched = false;

        for (index, definition) in self.table.candidates(trigger, from).enumerate() {
            matched = true;

            let mut staged = loan.fields().clone();
            if let Some(pre_action) = definition.pre_action() {
                (pre_action.action())(&mut staged, &params);
            }

            if guards_pass(definition, from, &mut staged, &params)? {
                return Ok(StagedTransition {
                    loan_id: loan.loan_id(),
                    trigger: trigger.to_string(),
                    from,
                    to: definition.dest(),
                    fields: staged,
                    base_version: loan.version(),
                    candidate: index,
                });
            }

            debug!(
                loan_id = %loan.loan_id(),
                trigger,
                candidate = index,
                dest = %definition.dest(),
                "transition candidate rejected"
            );
        }

        let trigger = trigger.to_string();
        if matched {
            Err(TransitionError::NoValidTransition { trigger, state: from })
        } else {
            Err(TransitionError::NoMatchingTransition { trigger, state: from })
        }
    }

    /// Persist a staged transition and install it on `loan`.
    ///
    /// `loan` is only updated after the committer accepted the write.
    pub fn commit<C>(
        &self,
        loan: &mut Loan,
        staged: StagedTransition,
        committer: &C,
    ) -> Result<AppliedTransition, TransitionError>
    where
        C: LoanCommitter + ?Sized,
    {
        if staged.loan_id != loan.loan_id() || staged.base_version != loan.version() {
            return Err(TransitionError::ConcurrentModification {
                loan_id: loan.loan_id(),
                message: format!(
                    "staged against revision {}, loan is at revision {}",
                    staged.base_version,
                    loan.version()
                ),
            });
        }

        let mut next = loan.successor(staged.to, staged.fields);
        let version = committer
            .commit(&next, ExpectedVersion::Exact(staged.base_version))
            .map_err(|e| match e {
                CommitError::Conflict(message) => TransitionError::ConcurrentModification {
                    loan_id: staged.loan_id,
                    message,
                },
                CommitError::Backend(message) => TransitionError::Commit(message),
            })?;
        next.set_version(version);
        *loan = next;

        info!(
            loan_id = %staged.loan_id,
            trigger = %staged.trigger,
            from = %staged.from,
            to = %staged.to,
            version,
            "loan transition applied"
        );

        Ok(AppliedTransition {
            loan_id: staged.loan_id,
            trigger: staged.trigger,
            from: staged.from,
            to: staged.to,
            version,
        })
    }
}

fn guards_pass(
    definition: &TransitionDefinition,
    state: LoanState,
    staged: &mut LoanFields,
    params: &TransitionParams,
) -> Result<bool, PolicyError> {
    for named in definition.guards() {
        let outcome = (named.guard())(&GuardContext {
            state,
            fields: &*staged,
            params,
        })?;
        match outcome {
            Some(computed) => computed.merge_into(staged),
            None => return Ok(false),
        }
    }

    for named in definition.unless() {
        let outcome = (named.guard())(&GuardContext {
            state,
            fields: &*staged,
            params,
        })?;
        if outcome.is_some() {
            return Ok(false);
        }
    }

    Ok(true)
}
