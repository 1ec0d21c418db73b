//! Loan lifecycle states.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use circulation_core::DomainError;

/// State of a loan.
///
/// Serialized with the upper-case names used on the wire and in transition
/// configuration (`"ITEM_ON_LOAN"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanState {
    Created,
    Pending,
    ItemOnLoan,
    ItemReturned,
    ItemInTransit,
    ItemAtDesk,
}

impl LoanState {
    /// Every state, in canonical declaration order.
    pub const ALL: [LoanState; 6] = [
        LoanState::Created,
        LoanState::Pending,
        LoanState::ItemOnLoan,
        LoanState::ItemReturned,
        LoanState::ItemInTransit,
        LoanState::ItemAtDesk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LoanState::Created => "CREATED",
            LoanState::Pending => "PENDING",
            LoanState::ItemOnLoan => "ITEM_ON_LOAN",
            LoanState::ItemReturned => "ITEM_RETURNED",
            LoanState::ItemInTransit => "ITEM_IN_TRANSIT",
            LoanState::ItemAtDesk => "ITEM_AT_DESK",
        }
    }
}

impl core::fmt::Display for LoanState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoanState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown loan state '{s}'")))
    }
}
