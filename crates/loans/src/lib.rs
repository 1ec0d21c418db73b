//! Loan circulation domain module.
//!
//! A loan moves through a fixed set of states driven by named triggers
//! (`request`, `validate_request`, `checkout`, `checkin`). Every edge of the
//! lifecycle is declared in a [`TransitionTable`] and gated by guards that
//! consult pluggable circulation policies. This crate is pure domain logic:
//! no IO, no HTTP, no storage.

pub mod engine;
pub mod loan;
pub mod params;
pub mod policy;
pub mod registry;
pub mod state;
pub mod table;

pub use engine::{
    AppliedTransition, CommitError, LoanCommitter, StagedTransition, TransitionEngine,
    TransitionError,
};
pub use loan::{ComputedFields, Loan, LoanDraft, LoanFields};
pub use params::TransitionParams;
pub use policy::{
    CirculationPolicy, DefaultPolicy, InMemoryItemLocations, ItemLocations, LoanPeriod,
    PolicyError, RequestTerms,
};
pub use registry::{GuardContext, GuardFn, GuardResult, PreAction, Registry};
pub use state::LoanState;
pub use table::{TableError, TransitionConfig, TransitionDefinition, TransitionSpec, TransitionTable};
