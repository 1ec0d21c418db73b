use std::sync::Arc;

use thiserror::Error;

use circulation_core::{ExpectedVersion, LoanId};
use circulation_loans::{CommitError, Loan, LoanCommitter};

/// Loan store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// transition errors raised by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoanStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("loan {0} not found")]
    NotFound(LoanId),

    #[error("loan {0} already exists")]
    Duplicate(LoanId),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Snapshot store for loans.
///
/// ## Commit Semantics
///
/// `commit()`:
/// - Rejects the write when the stored revision does not match `expected`
/// - Assigns the next revision (current + 1) and returns it
/// - Replaces the stored state and fields atomically
///
/// Implementations must handle concurrent commits against the same loan
/// correctly: of two writers based on the same revision, exactly one wins.
pub trait LoanStore: Send + Sync {
    /// Persist a brand-new loan at its current revision.
    fn insert(&self, loan: &Loan) -> Result<(), LoanStoreError>;

    /// Load the latest committed snapshot of a loan.
    fn get(&self, loan_id: LoanId) -> Result<Option<Loan>, LoanStoreError>;

    /// Replace a loan's snapshot, guarded by its expected revision.
    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, LoanStoreError>;
}

impl<S> LoanStore for Arc<S>
where
    S: LoanStore + ?Sized,
{
    fn insert(&self, loan: &Loan) -> Result<(), LoanStoreError> {
        (**self).insert(loan)
    }

    fn get(&self, loan_id: LoanId) -> Result<Option<Loan>, LoanStoreError> {
        (**self).get(loan_id)
    }

    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, LoanStoreError> {
        (**self).commit(loan, expected)
    }
}

/// Adapter handing a [`LoanStore`] to the transition engine as its committer.
#[derive(Debug)]
pub struct StoreCommitter<'a, S: ?Sized>(pub &'a S);

impl<S> LoanCommitter for StoreCommitter<'_, S>
where
    S: LoanStore + ?Sized,
{
    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, CommitError> {
        self.0.commit(loan, expected).map_err(|e| match e {
            LoanStoreError::Concurrency(msg) => CommitError::Conflict(msg),
            other => CommitError::Backend(other.to_string()),
        })
    }
}
