//! Parameter bag carried by a trigger call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use circulation_core::Pid;

/// Keyword-style parameters of a trigger call.
///
/// The well-known identifiers are typed; anything else the caller sends is
/// kept in `extra` so custom policies can read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionParams {
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
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TransitionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patron(mut self, pid: impl Into<Pid>) -> Self {
        self.patron_pid = Some(pid.into());
        self
    }

    pub fn item(mut self, pid: impl Into<Pid>) -> Self {
        self.item_pid = Some(pid.into());
        self
    }

    pub fn transaction_user(mut self, pid: impl Into<Pid>) -> Self {
        self.transaction_user_pid = Some(pid.into());
        self
    }

    pub fn transaction_location(mut self, pid: impl Into<Pid>) -> Self {
        self.transaction_location_pid = Some(pid.into());
        self
    }

    pub fn pickup_location(mut self, pid: impl Into<Pid>) -> Self {
        self.pickup_location_pid = Some(pid.into());
        self
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.transaction_date = Some(when);
        self
    }

    /// Copy of these parameters with `transaction_date` filled in when the
    /// caller did not supply one.
    pub fn with_default_transaction_date(&self, now: DateTime<Utc>) -> Self {
        let mut params = self.clone();
        params.transaction_date.get_or_insert(now);
        params
    }
}
