//! Loan action execution pipeline (application-level orchestration).
//!
//! ## Action Execution Flow
//!
//! ```text
//! (loan_id, trigger, params, caller)
//!   ↓
//! 1. Reject triggers the transition table does not declare
//!   ↓
//! 2. Load the latest loan snapshot from the store
//!   ↓
//! 3. Authorize the caller for the action (before the engine runs)
//!   ↓
//! 4. Evaluate + commit through the transition engine (optimistic revision check)
//!   ↓
//! 5. Return the committed loan
//! ```
//!
//! This module contains no IO itself; it composes the store trait with the
//! transition engine and the permission check.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use circulation_auth::{ActionAuthorization, AuthzError, Permission, Principal, authorize};
use circulation_core::LoanId;
use circulation_loans::{
    Loan, LoanDraft, LoanState, TransitionEngine, TransitionError, TransitionParams, TransitionTable,
};

use crate::loan_store::{LoanStore, LoanStoreError, StoreCommitter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The action name is not a declared trigger.
    #[error("invalid trigger '{0}'")]
    InvalidTrigger(String),

    /// Wrong state or policy rejection; the two are not told apart.
    #[error("{0}")]
    InvalidAction(String),

    /// The caller lacks the permission the action requires.
    #[error(transparent)]
    AuthorizationDenied(#[from] AuthzError),

    #[error("loan {0} not found")]
    NotFound(LoanId),

    /// Optimistic concurrency failure (the loan changed since it was read).
    #[error("conflict: {0}")]
    Concurrency(String),

    /// Malformed input (bad identifiers, undeclared initial state).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A policy provider failed while evaluating a guard.
    #[error("policy failure: {0}")]
    Policy(String),

    /// Persisting to the loan store failed.
    #[error(transparent)]
    Store(LoanStoreError),
}

impl From<LoanStoreError> for DispatchError {
    fn from(value: LoanStoreError) -> Self {
        match value {
            LoanStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            LoanStoreError::NotFound(id) => DispatchError::NotFound(id),
            other => DispatchError::Store(other),
        }
    }
}

impl From<TransitionError> for DispatchError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::InvalidTrigger(trigger) => DispatchError::InvalidTrigger(trigger),
            TransitionError::NoMatchingTransition { trigger, state }
            | TransitionError::NoValidTransition { trigger, state } => {
                DispatchError::InvalidAction(invalid_action_message(&trigger, state))
            }
            TransitionError::Policy(e) => DispatchError::Policy(e.to_string()),
            TransitionError::ConcurrentModification { message, .. } => DispatchError::Concurrency(message),
            TransitionError::Commit(msg) => DispatchError::Store(LoanStoreError::Backend(msg)),
        }
    }
}

fn invalid_action_message(trigger: &str, state: LoanState) -> String {
    format!("Invalid loan action '{trigger}' for a loan in state {state}")
}

/// One invocation of a loan action together with the permissions it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanAction {
    trigger: String,
    required: Vec<Permission>,
}

impl LoanAction {
    /// Resolve the permission of `trigger`: its declared tag, otherwise
    /// `circulation.loan.<trigger>`.
    pub fn resolve(table: &TransitionTable, trigger: &str) -> Self {
        let permission = match table.permission_tag(trigger) {
            Some(tag) => Permission::new(tag.to_string()),
            None => Permission::loan_action(trigger),
        };

        Self {
            trigger: trigger.to_string(),
            required: vec![permission],
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }
}

impl ActionAuthorization for LoanAction {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Permission factory consulted before an action reaches the engine.
pub trait PermissionCheck {
    fn check(&self, action: &LoanAction, loan: &Loan) -> Result<(), AuthzError>;
}

impl PermissionCheck for Principal {
    fn check(&self, action: &LoanAction, _loan: &Loan) -> Result<(), AuthzError> {
        for permission in action.required_permissions() {
            authorize(self, permission)?;
        }
        Ok(())
    }
}

/// Runs loan actions against a [`LoanStore`].
///
/// ## Error Semantics
///
/// - Undeclared trigger → `DispatchError::InvalidTrigger` (checked first)
/// - Missing loan → `DispatchError::NotFound`
/// - Permission denied → `DispatchError::AuthorizationDenied`; the engine never runs
/// - Wrong state / guard rejection → `DispatchError::InvalidAction`
/// - Stale revision → `DispatchError::Concurrency`; nothing is retried here
#[derive(Debug)]
pub struct ActionDispatcher<S> {
    store: S,
    engine: TransitionEngine,
}

impl<S> ActionDispatcher<S> {
    pub fn new(store: S, engine: TransitionEngine) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }
}

impl<S> ActionDispatcher<S>
where
    S: LoanStore,
{
    /// Create and persist a new loan.
    ///
    /// The loan starts in the draft's state, or the table's first declared
    /// state when the draft names none.
    pub fn create(&self, draft: LoanDraft) -> Result<Loan, DispatchError> {
        let table = self.engine.table();
        if let Some(state) = draft.state {
            if !table.states().contains(&state) {
                return Err(DispatchError::Validation(format!(
                    "state {state} is not declared by the transition table"
                )));
            }
        }

        let loan = Loan::create(LoanId::new(), draft, table.initial_state());
        self.store.insert(&loan)?;
        info!(loan_id = %loan.loan_id(), state = %loan.state(), "loan created");
        Ok(loan)
    }

    pub fn get(&self, loan_id: LoanId) -> Result<Loan, DispatchError> {
        self.store.get(loan_id)?.ok_or(DispatchError::NotFound(loan_id))
    }

    /// Run `trigger` on a stored loan on behalf of `caller`.
    pub fn dispatch<P>(
        &self,
        loan_id: LoanId,
        trigger: &str,
        params: &TransitionParams,
        caller: &P,
    ) -> Result<Loan, DispatchError>
    where
        P: PermissionCheck + ?Sized,
    {
        self.dispatch_at(loan_id, trigger, params, caller, Utc::now())
    }

    /// [`dispatch`](Self::dispatch) with an explicit "now".
    pub fn dispatch_at<P>(
        &self,
        loan_id: LoanId,
        trigger: &str,
        params: &TransitionParams,
        caller: &P,
        now: DateTime<Utc>,
    ) -> Result<Loan, DispatchError>
    where
        P: PermissionCheck + ?Sized,
    {
        let table = self.engine.table();
        if !table.has_trigger(trigger) {
            return Err(DispatchError::InvalidTrigger(trigger.to_string()));
        }

        let mut loan = self.get(loan_id)?;

        let action = LoanAction::resolve(table, trigger);
        if let Err(e) = caller.check(&action, &loan) {
            warn!(loan_id = %loan_id, trigger, error = %e, "loan action denied");
            return Err(e.into());
        }

        let committer = StoreCommitter(&self.store);
        match self.engine.apply_at(&mut loan, trigger, params, now, &committer) {
            Ok(_) => Ok(loan),
            Err(e @ TransitionError::ConcurrentModification { .. }) => {
                warn!(loan_id = %loan_id, trigger, error = %e, "loan action lost a concurrent update");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use circulation_auth::{PrincipalId, Role};
    use circulation_core::{AggregateRoot, Pid};
    use circulation_loans::{
        DefaultPolicy, InMemoryItemLocations, Registry, TransitionConfig, TransitionSpec,
    };

    use crate::loan_store::InMemoryLoanStore;

    fn principal(permissions: &[&str]) -> Principal {
        Principal {
            principal_id: PrincipalId::new(),
            roles: vec![Role::new("librarian")],
            permissions: permissions.iter().map(|p| Permission::new(p.to_string())).collect(),
        }
    }

    fn dispatcher_with(config: TransitionConfig) -> ActionDispatcher<InMemoryLoanStore> {
        let registry = Registry::circulation(
            Arc::new(DefaultPolicy::default()),
            Arc::new(InMemoryItemLocations::new().with("item-1", "lib-a")),
        );
        let table = TransitionTable::build(&config, &registry).unwrap();
        ActionDispatcher::new(InMemoryLoanStore::new(), TransitionEngine::new(Arc::new(table)))
    }

    fn dispatcher() -> ActionDispatcher<InMemoryLoanStore> {
        dispatcher_with(TransitionConfig::circulation_default())
    }

    fn checkout_params() -> TransitionParams {
        TransitionParams::new()
            .patron("patron-1")
            .item("item-1")
            .transaction_user("librarian-1")
            .transaction_location("lib-a")
    }

    struct DenyAll;

    impl PermissionCheck for DenyAll {
        fn check(&self, action: &LoanAction, _loan: &Loan) -> Result<(), AuthzError> {
            Err(AuthzError::Forbidden(action.trigger().to_string()))
        }
    }

    #[test]
    fn create_defaults_to_first_declared_state() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();

        assert_eq!(loan.state(), LoanState::Created);
        assert_eq!(loan.version(), 1);
        assert_eq!(d.get(loan.loan_id()).unwrap(), loan);
    }

    #[test]
    fn create_rejects_undeclared_state() {
        let config = TransitionConfig {
            states: vec!["CREATED".to_string(), "ITEM_ON_LOAN".to_string()],
            transitions: vec![
                TransitionSpec::new("checkout", LoanState::Created, LoanState::ItemOnLoan)
                    .before("set_parameters")
                    .conditions(&["is_checkout_valid"]),
            ],
            triggers: vec![],
        };
        let d = dispatcher_with(config);
        let draft = LoanDraft {
            state: Some(LoanState::Pending),
            ..LoanDraft::default()
        };

        assert!(matches!(d.create(draft), Err(DispatchError::Validation(_))));
    }

    #[test]
    fn checkout_commits_and_returns_updated_loan() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();

        let updated = d
            .dispatch(loan.loan_id(), "checkout", &checkout_params(), &principal(&["*"]))
            .unwrap();

        assert_eq!(updated.state(), LoanState::ItemOnLoan);
        assert_eq!(updated.version(), 2);
        assert!(updated.fields().end_date.is_some());
        assert_eq!(d.get(loan.loan_id()).unwrap(), updated);
    }

    #[test]
    fn checkout_dated_at_calendar_end_fails_without_commit() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();
        let params = checkout_params().at(chrono::DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1));

        let err = d
            .dispatch(loan.loan_id(), "checkout", &params, &principal(&["*"]))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Policy(msg) if msg.contains("checkout")));
        assert_eq!(d.get(loan.loan_id()).unwrap(), loan);
    }

    #[test]
    fn unknown_trigger_is_rejected_before_lookup() {
        let d = dispatcher();
        let err = d
            .dispatch(LoanId::new(), "renew", &checkout_params(), &principal(&["*"]))
            .unwrap_err();
        assert_eq!(err, DispatchError::InvalidTrigger("renew".to_string()));
    }

    #[test]
    fn missing_loan_is_not_found() {
        let d = dispatcher();
        let id = LoanId::new();
        let err = d.dispatch(id, "checkout", &checkout_params(), &principal(&["*"])).unwrap_err();
        assert_eq!(err, DispatchError::NotFound(id));
    }

    #[test]
    fn denied_action_never_reaches_engine() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();

        let err = d.dispatch(loan.loan_id(), "checkout", &checkout_params(), &DenyAll).unwrap_err();
        assert!(matches!(err, DispatchError::AuthorizationDenied(_)));

        let stored = d.get(loan.loan_id()).unwrap();
        assert_eq!(stored.state(), LoanState::Created);
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.fields().patron_pid, None);
    }

    #[test]
    fn default_permission_is_derived_from_trigger() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();
        let patron = principal(&["circulation.loan.request"]);

        let err = d.dispatch(loan.loan_id(), "checkout", &checkout_params(), &patron).unwrap_err();
        assert_eq!(
            err,
            DispatchError::AuthorizationDenied(AuthzError::Forbidden("circulation.loan.checkout".to_string()))
        );
    }

    #[test]
    fn declared_permission_tag_is_required() {
        let mut config = TransitionConfig::circulation_default();
        for spec in config.transitions.iter_mut().filter(|t| t.trigger == "checkout") {
            spec.permission = Some("desk.checkout".to_string());
        }
        let d = dispatcher_with(config);
        let loan = d.create(LoanDraft::default()).unwrap();

        let generic = principal(&["circulation.loan.checkout"]);
        assert!(matches!(
            d.dispatch(loan.loan_id(), "checkout", &checkout_params(), &generic),
            Err(DispatchError::AuthorizationDenied(_))
        ));

        let desk = principal(&["desk.checkout"]);
        let updated = d.dispatch(loan.loan_id(), "checkout", &checkout_params(), &desk).unwrap();
        assert_eq!(updated.state(), LoanState::ItemOnLoan);
    }

    #[test]
    fn wrong_state_and_rejected_guard_read_the_same() {
        let d = dispatcher();
        let admin = principal(&["*"]);

        let created = d.create(LoanDraft::default()).unwrap();
        let wrong_state = d
            .dispatch(created.loan_id(), "checkin", &checkout_params(), &admin)
            .unwrap_err();

        let on_loan = d
            .create(LoanDraft {
                state: Some(LoanState::ItemOnLoan),
                ..LoanDraft::default()
            })
            .unwrap();
        // checkin without an item is refused by the default policy.
        let rejected = d
            .dispatch(on_loan.loan_id(), "checkin", &TransitionParams::new(), &admin)
            .unwrap_err();

        match (wrong_state, rejected) {
            (DispatchError::InvalidAction(a), DispatchError::InvalidAction(b)) => {
                assert!(a.starts_with("Invalid loan action 'checkin'"));
                assert!(b.starts_with("Invalid loan action 'checkin'"));
            }
            other => panic!("expected two invalid actions, got {other:?}"),
        }
        assert_eq!(d.get(on_loan.loan_id()).unwrap().state(), LoanState::ItemOnLoan);
    }

    #[test]
    fn request_at_home_library_lands_at_desk() {
        let d = dispatcher();
        let loan = d.create(LoanDraft::default()).unwrap();
        let params = TransitionParams::new()
            .patron("patron-1")
            .item("item-1")
            .transaction_location("lib-a")
            .pickup_location("lib-a");

        let updated = d.dispatch(loan.loan_id(), "request", &params, &principal(&["*"])).unwrap();
        assert_eq!(updated.state(), LoanState::ItemAtDesk);
        assert_eq!(updated.fields().pickup_location_pid, Some(Pid::new("lib-a")));
        assert!(updated.fields().request_expire_date.is_some());
    }

    #[test]
    fn store_errors_map_to_dispatch_errors() {
        let id = LoanId::new();
        assert_eq!(
            DispatchError::from(LoanStoreError::Concurrency("stale".to_string())),
            DispatchError::Concurrency("stale".to_string())
        );
        assert_eq!(DispatchError::from(LoanStoreError::NotFound(id)), DispatchError::NotFound(id));
        assert!(matches!(
            DispatchError::from(LoanStoreError::Duplicate(id)),
            DispatchError::Store(LoanStoreError::Duplicate(_))
        ));
    }
}
