use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ReservationId, TransactionId};
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionDirection {
    Credit,
    Debit,
}

impl TransactionDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// Split breakdown carried on settlement transactions for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueShareBreakdown {
    pub provider_amount: Money,
    pub platform_amount: Money,
}

/// Immutable once appended; insertion order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub transaction_id: TransactionId,
    pub direction: TransactionDirection,
    pub amount: Money,
    pub description: String,
    pub related_reservation_id: Option<ReservationId>,
    pub revenue_share: Option<RevenueShareBreakdown>,
    pub created_at: DateTime<Utc>,
}
