use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PatientId, ProviderId, ReservationId};
use crate::money::Money;

/// The contended resource: one provider, one calendar day, one start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub provider_id: ProviderId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Patient,
    Provider,
    Platform,
}

impl CancelActor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Provider => "provider",
            Self::Platform => "platform",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gateway,
    Wallet,
}

impl PaymentMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Wallet => "wallet",
        }
    }
}

/// Patient display data frozen into the reservation at lock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub name: String,
    pub contact: String,
}

/// Provider display data and consultation fee frozen into the reservation at
/// lock time. Fee changes after locking do not affect a pending reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub speciality: String,
    pub fee: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub slot: SlotKey,
    pub patient_id: PatientId,
    pub state: ReservationState,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub paid: bool,
    pub amount: Money,
    pub payment_method: Option<PaymentMethod>,
    pub cancelled_by: Option<CancelActor>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub patient_snapshot: PatientSnapshot,
    pub provider_snapshot: ProviderSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationRecord {
    /// An active reservation holds the slot: confirmed, pending and already
    /// paid (the capture keeps the hold alive through settlement), or pending
    /// with an unexpired lock.
    #[must_use]
    pub fn holds_slot_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ReservationState::Confirmed => true,
            ReservationState::Pending => {
                self.paid || self.lock_expires_at.is_some_and(|expires| expires > now)
            }
            ReservationState::Cancelled => false,
        }
    }

    /// A record is reclaimable when cancelled or pending with a lapsed lock.
    #[must_use]
    pub fn is_reclaimable_at(&self, now: DateTime<Utc>) -> bool {
        !self.holds_slot_at(now)
    }
}
