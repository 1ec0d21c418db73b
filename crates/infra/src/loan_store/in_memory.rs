use std::collections::HashMap;
use std::sync::RwLock;

use circulation_core::{AggregateRoot, ExpectedVersion, LoanId};
use circulation_loans::Loan;

use super::r#trait::{LoanStore, LoanStoreError};

/// In-memory loan store.
///
/// Intended for tests/dev. The version check and the write happen under the
/// same write lock, so concurrent commits are serialized.
#[derive(Debug, Default)]
pub struct InMemoryLoanStore {
    loans: RwLock<HashMap<LoanId, Loan>>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored loans.
    pub fn count(&self) -> Result<usize, LoanStoreError> {
        self.loans
            .read()
            .map(|loans| loans.len())
            .map_err(|_| LoanStoreError::Backend("lock poisoned".to_string()))
    }
}

impl LoanStore for InMemoryLoanStore {
    fn insert(&self, loan: &Loan) -> Result<(), LoanStoreError> {
        let mut loans = self
            .loans
            .write()
            .map_err(|_| LoanStoreError::Backend("lock poisoned".to_string()))?;

        if loans.contains_key(&loan.loan_id()) {
            return Err(LoanStoreError::Duplicate(loan.loan_id()));
        }
        loans.insert(loan.loan_id(), loan.clone());
        Ok(())
    }

    fn get(&self, loan_id: LoanId) -> Result<Option<Loan>, LoanStoreError> {
        let loans = self
            .loans
            .read()
            .map_err(|_| LoanStoreError::Backend("lock poisoned".to_string()))?;

        Ok(loans.get(&loan_id).cloned())
    }

    fn commit(&self, loan: &Loan, expected: ExpectedVersion) -> Result<u64, LoanStoreError> {
        let mut loans = self
            .loans
            .write()
            .map_err(|_| LoanStoreError::Backend("lock poisoned".to_string()))?;

        let stored = loans
            .get_mut(&loan.loan_id())
            .ok_or(LoanStoreError::NotFound(loan.loan_id()))?;
        let current = stored.version();

        if !expected.matches(current) {
            return Err(LoanStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        let next = current + 1;
        *stored = Loan::restore(loan.loan_id(), loan.state(), loan.fields().clone(), next);
        Ok(next)
    }
}
