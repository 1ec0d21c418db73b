//! Circulation policy providers.
//!
//! Policies decide whether a business condition holds for a trigger call and
//! compute the values the loan should carry afterwards (loan period, request
//! expiry). They are pure functions of the call parameters plus read-only
//! lookups; they never touch the loan directly.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use circulation_core::Pid;

use crate::params::TransitionParams;

/// Failure raised by a policy provider.
///
/// Distinct from a policy *rejection* (`None`/`false`): an error aborts the
/// whole trigger call and is never masked by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy '{policy}' failed: {message}")]
    Failed { policy: String, message: String },

    #[error("item location lookup failed for '{item}': {message}")]
    Lookup { item: Pid, message: String },
}

impl PolicyError {
    pub fn failed(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            policy: policy.into(),
            message: message.into(),
        }
    }
}

/// Loan period granted by the checkout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanPeriod {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Terms granted by the request policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTerms {
    pub pickup_location_pid: Pid,
    pub request_expire_date: DateTime<Utc>,
}

/// Business rules consulted by the built-in circulation guards.
///
/// Each method receives the full parameter bag of the trigger call, with
/// `transaction_date` already defaulted. `Ok(None)` / `Ok(false)` rejects the
/// transition; `Err` aborts the call.
pub trait CirculationPolicy: Send + Sync {
    fn checkout(&self, params: &TransitionParams) -> Result<Option<LoanPeriod>, PolicyError>;

    /// Returns the effective end date of the loan when the return is accepted.
    fn checkin(&self, params: &TransitionParams) -> Result<Option<DateTime<Utc>>, PolicyError>;

    fn request(&self, params: &TransitionParams) -> Result<Option<RequestTerms>, PolicyError>;

    fn validate_request(&self, params: &TransitionParams) -> Result<bool, PolicyError>;
}

/// Read-only lookup of an item's home location.
pub trait ItemLocations: Send + Sync {
    fn item_location(&self, item_pid: &Pid) -> Result<Option<Pid>, PolicyError>;
}

/// Duration-based policy used when no institution-specific rules are plugged in.
///
/// - checkout: loan runs from the transaction date for `loan_duration`
/// - checkin: the loan ends on the transaction date
/// - request: the pickup location is required, the request expires after
///   `request_duration`
/// - validate_request: holds whenever an item is identified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultPolicy {
    loan_duration: Duration,
    request_duration: Duration,
}

impl DefaultPolicy {
    pub fn new(loan_duration: Duration, request_duration: Duration) -> Self {
        Self {
            loan_duration,
            request_duration,
        }
    }

    /// Day counts beyond the representable range saturate; the policies then
    /// fail on the date arithmetic instead of granting a period.
    pub fn from_days(loan_days: i64, request_days: i64) -> Self {
        Self::new(saturating_days(loan_days), saturating_days(request_days))
    }

    pub fn loan_duration(&self) -> Duration {
        self.loan_duration
    }

    pub fn request_duration(&self) -> Duration {
        self.request_duration
    }
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::from_days(30, 30)
    }
}

fn saturating_days(days: i64) -> Duration {
    Duration::try_days(days).unwrap_or(if days < 0 { Duration::MIN } else { Duration::MAX })
}

fn shift(policy: &str, from: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, PolicyError> {
    from.checked_add_signed(by)
        .ok_or_else(|| PolicyError::failed(policy, format!("{from} + {} days is out of range", by.num_days())))
}

fn transaction_date(policy: &str, params: &TransitionParams) -> Result<DateTime<Utc>, PolicyError> {
    params
        .transaction_date
        .ok_or_else(|| PolicyError::failed(policy, "transaction_date missing"))
}

impl CirculationPolicy for DefaultPolicy {
    fn checkout(&self, params: &TransitionParams) -> Result<Option<LoanPeriod>, PolicyError> {
        if params.patron_pid.is_none() || params.item_pid.is_none() {
            return Ok(None);
        }
        let start_date = transaction_date("checkout", params)?;
        Ok(Some(LoanPeriod {
            start_date,
            end_date: shift("checkout", start_date, self.loan_duration)?,
        }))
    }

    fn checkin(&self, params: &TransitionParams) -> Result<Option<DateTime<Utc>>, PolicyError> {
        if params.item_pid.is_none() {
            return Ok(None);
        }
        transaction_date("checkin", params).map(Some)
    }

    fn request(&self, params: &TransitionParams) -> Result<Option<RequestTerms>, PolicyError> {
        let (Some(pickup), Some(_), Some(_)) = (
            params.pickup_location_pid.as_ref(),
            params.patron_pid.as_ref(),
            params.item_pid.as_ref(),
        ) else {
            return Ok(None);
        };
        let requested_at = transaction_date("request", params)?;
        Ok(Some(RequestTerms {
            pickup_location_pid: pickup.clone(),
            request_expire_date: shift("request", requested_at, self.request_duration)?,
        }))
    }

    fn validate_request(&self, params: &TransitionParams) -> Result<bool, PolicyError> {
        Ok(params.item_pid.is_some())
    }
}

/// In-memory item → home location directory.
#[derive(Debug, Default)]
pub struct InMemoryItemLocations {
    inner: RwLock<HashMap<Pid, Pid>>,
}

impl InMemoryItemLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item_pid: impl Into<Pid>, location_pid: impl Into<Pid>) -> Result<(), PolicyError> {
        let item_pid = item_pid.into();
        let mut map = self.inner.write().map_err(|_| PolicyError::Lookup {
            item: item_pid.clone(),
            message: "lock poisoned".to_string(),
        })?;
        map.insert(item_pid, location_pid.into());
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert) for a directory not yet shared.
    pub fn with(self, item_pid: impl Into<Pid>, location_pid: impl Into<Pid>) -> Self {
        let mut map = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        map.insert(item_pid.into(), location_pid.into());
        Self {
            inner: RwLock::new(map),
        }
    }
}

impl ItemLocations for InMemoryItemLocations {
    fn item_location(&self, item_pid: &Pid) -> Result<Option<Pid>, PolicyError> {
        let map = self.inner.read().map_err(|_| PolicyError::Lookup {
            item: item_pid.clone(),
            message: "lock poisoned".to_string(),
        })?;
        Ok(map.get(item_pid).cloned())
    }
}
