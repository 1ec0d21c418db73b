//! Named guards and pre-actions available to transition definitions.
//!
//! Transition configuration refers to behavior by name (`"is_checkout_valid"`,
//! `"set_parameters"`). The registry resolves those names to typed callables
//! once, when the [`TransitionTable`](crate::TransitionTable) is built, so the
//! engine never performs string dispatch at run time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::loan::{ComputedFields, LoanFields};
use crate::params::TransitionParams;
use crate::policy::{CirculationPolicy, ItemLocations, PolicyError};
use crate::state::LoanState;

/// Names of the built-in guards and pre-actions.
pub mod names {
    pub const SET_PARAMETERS: &str = "set_parameters";
    pub const SET_REQUEST_PARAMETERS: &str = "set_request_parameters";

    pub const IS_REQUEST_VALID: &str = "is_request_valid";
    pub const IS_VALIDATE_REQUEST_VALID: &str = "is_validate_request_valid";
    pub const IS_PICKUP_AT_SAME_LIBRARY: &str = "is_pickup_at_same_library";
    pub const IS_CHECKOUT_VALID: &str = "is_checkout_valid";
    pub const IS_CHECKIN_VALID: &str = "is_checkin_valid";
}

/// What a guard sees: the loan's current state, the staged field values of
/// the candidate under evaluation, and the call parameters.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub state: LoanState,
    pub fields: &'a LoanFields,
    pub params: &'a TransitionParams,
}

/// `Ok(None)`: guard fails. `Ok(Some(fields))`: guard passes and contributes
/// `fields`. `Err`: the whole call aborts.
pub type GuardResult = Result<Option<ComputedFields>, PolicyError>;

pub type GuardFn = Arc<dyn Fn(&GuardContext<'_>) -> GuardResult + Send + Sync>;

/// Unconditional field extraction from the call parameters.
pub type PreAction = fn(&mut LoanFields, &TransitionParams);

/// Name → callable lookup for guards and pre-actions.
#[derive(Clone, Default)]
pub struct Registry {
    guards: HashMap<String, GuardFn>,
    pre_actions: HashMap<String, PreAction>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut guards: Vec<&str> = self.guards.keys().map(String::as_str).collect();
        guards.sort_unstable();
        let mut pre_actions: Vec<&str> = self.pre_actions.keys().map(String::as_str).collect();
        pre_actions.sort_unstable();
        f.debug_struct("Registry")
            .field("guards", &guards)
            .field("pre_actions", &pre_actions)
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the circulation pre-actions and guards backed by the
    /// given policy and item location lookup.
    pub fn circulation(
        policy: Arc<dyn CirculationPolicy>,
        locations: Arc<dyn ItemLocations>,
    ) -> Self {
        let request_policy = policy.clone();
        let validate_policy = policy.clone();
        let checkout_policy = policy.clone();
        let checkin_policy = policy;

        Self::new()
            .with_pre_action(names::SET_PARAMETERS, set_parameters)
            .with_pre_action(names::SET_REQUEST_PARAMETERS, set_request_parameters)
            .with_guard(names::IS_REQUEST_VALID, move |ctx| {
                Ok(request_policy.request(ctx.params)?.map(|terms| ComputedFields {
                    pickup_location_pid: Some(terms.pickup_location_pid),
                    request_expire_date: Some(terms.request_expire_date),
                    ..ComputedFields::default()
                }))
            })
            .with_guard(names::IS_VALIDATE_REQUEST_VALID, move |ctx| {
                Ok(validate_policy
                    .validate_request(ctx.params)?
                    .then(ComputedFields::default))
            })
            .with_guard(names::IS_PICKUP_AT_SAME_LIBRARY, move |ctx| {
                is_pickup_at_same_library(locations.as_ref(), ctx)
            })
            .with_guard(names::IS_CHECKOUT_VALID, move |ctx| {
                Ok(checkout_policy.checkout(ctx.params)?.map(|period| ComputedFields {
                    start_date: Some(period.start_date),
                    end_date: Some(period.end_date),
                    ..ComputedFields::default()
                }))
            })
            .with_guard(names::IS_CHECKIN_VALID, move |ctx| {
                Ok(checkin_policy.checkin(ctx.params)?.map(|end_date| ComputedFields {
                    end_date: Some(end_date),
                    ..ComputedFields::default()
                }))
            })
    }

    pub fn with_guard<F>(mut self, name: impl Into<String>, guard: F) -> Self
    where
        F: Fn(&GuardContext<'_>) -> GuardResult + Send + Sync + 'static,
    {
        self.register_guard(name, guard);
        self
    }

    pub fn register_guard<F>(&mut self, name: impl Into<String>, guard: F)
    where
        F: Fn(&GuardContext<'_>) -> GuardResult + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(guard));
    }

    pub fn with_pre_action(mut self, name: impl Into<String>, action: PreAction) -> Self {
        self.register_pre_action(name, action);
        self
    }

    pub fn register_pre_action(&mut self, name: impl Into<String>, action: PreAction) {
        self.pre_actions.insert(name.into(), action);
    }

    pub fn guard(&self, name: &str) -> Option<GuardFn> {
        self.guards.get(name).cloned()
    }

    pub fn pre_action(&self, name: &str) -> Option<PreAction> {
        self.pre_actions.get(name).copied()
    }
}

/// Copy the transaction identifiers and date from the call parameters.
///
/// Parameters missing from the call clear the corresponding field.
pub fn set_parameters(fields: &mut LoanFields, params: &TransitionParams) {
    fields.transaction_user_pid = params.transaction_user_pid.clone();
    fields.patron_pid = params.patron_pid.clone();
    fields.item_pid = params.item_pid.clone();
    fields.transaction_location_pid = params.transaction_location_pid.clone();
    fields.transaction_date = params.transaction_date;
}

/// [`set_parameters`] plus the requested pickup location.
pub fn set_request_parameters(fields: &mut LoanFields, params: &TransitionParams) {
    set_parameters(fields, params);
    fields.pickup_location_pid = params.pickup_location_pid.clone();
}

fn is_pickup_at_same_library(locations: &dyn ItemLocations, ctx: &GuardContext<'_>) -> GuardResult {
    let (Some(item_pid), Some(pickup)) = (ctx.fields.item_pid.as_ref(), ctx.fields.pickup_location_pid.as_ref())
    else {
        return Ok(None);
    };
    let home = locations.item_location(item_pid)?;
    Ok((home.as_ref() == Some(pickup)).then(ComputedFields::default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DefaultPolicy, InMemoryItemLocations};
    use chrono::{TimeZone, Utc};
    use circulation_core::Pid;

    fn registry() -> Registry {
        Registry::circulation(
            Arc::new(DefaultPolicy::from_days(30, 10)),
            Arc::new(InMemoryItemLocations::new().with("item-1", "loc-main")),
        )
    }

    fn call_params() -> TransitionParams {
        TransitionParams::new()
            .patron("patron-1")
            .item("item-1")
            .transaction_user("librarian-1")
            .transaction_location("loc-main")
            .pickup_location("loc-main")
            .at(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap())
    }

    #[test]
    fn set_parameters_copies_ids_but_not_pickup() {
        let mut fields = LoanFields::default();
        set_parameters(&mut fields, &call_params());

        assert_eq!(fields.patron_pid, Some(Pid::new("patron-1")));
        assert_eq!(fields.item_pid, Some(Pid::new("item-1")));
        assert_eq!(fields.transaction_user_pid, Some(Pid::new("librarian-1")));
        assert_eq!(fields.transaction_location_pid, Some(Pid::new("loc-main")));
        assert_eq!(fields.pickup_location_pid, None);
        assert!(fields.transaction_date.is_some());
    }

    #[test]
    fn set_parameters_clears_missing_ids() {
        let mut fields = LoanFields {
            patron_pid: Some(Pid::new("old")),
            ..LoanFields::default()
        };
        set_parameters(&mut fields, &TransitionParams::new().item("item-1"));
        assert_eq!(fields.patron_pid, None);
    }

    #[test]
    fn set_request_parameters_copies_pickup() {
        let mut fields = LoanFields::default();
        set_request_parameters(&mut fields, &call_params());
        assert_eq!(fields.pickup_location_pid, Some(Pid::new("loc-main")));
    }

    #[test]
    fn pickup_guard_reads_staged_fields() {
        let registry = registry();
        let guard = registry.guard(names::IS_PICKUP_AT_SAME_LIBRARY).unwrap();
        let params = call_params();

        let mut fields = LoanFields::default();
        set_request_parameters(&mut fields, &params);
        let ctx = GuardContext {
            state: LoanState::Pending,
            fields: &fields,
            params: &params,
        };
        assert_eq!(guard(&ctx).unwrap(), Some(ComputedFields::default()));

        fields.pickup_location_pid = Some(Pid::new("loc-branch"));
        let ctx = GuardContext {
            state: LoanState::Pending,
            fields: &fields,
            params: &params,
        };
        assert_eq!(guard(&ctx).unwrap(), None);
    }

    #[test]
    fn checkout_guard_computes_loan_period() {
        let registry = registry();
        let guard = registry.guard(names::IS_CHECKOUT_VALID).unwrap();
        let params = call_params();
        let fields = LoanFields::default();
        let ctx = GuardContext {
            state: LoanState::Created,
            fields: &fields,
            params: &params,
        };

        let computed = guard(&ctx).unwrap().unwrap();
        let start = params.transaction_date.unwrap();
        assert_eq!(computed.start_date, Some(start));
        assert_eq!(computed.end_date, Some(start + chrono::Duration::days(30)));
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let registry = registry();
        assert!(registry.guard("is_item_available").is_none());
        assert!(registry.pre_action("set_everything").is_none());
    }
}
