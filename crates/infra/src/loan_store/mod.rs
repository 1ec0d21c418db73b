//! Loan persistence boundary.
//!
//! Stores hold the latest committed snapshot of each loan and enforce
//! optimistic concurrency on every write through its revision.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLoanStore;
pub use r#trait::{LoanStore, LoanStoreError, StoreCommitter};
