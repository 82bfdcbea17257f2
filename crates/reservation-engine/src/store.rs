use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use booking_domain::{
    CancelActor, PatientId, PatientSnapshot, PaymentMethod, ProviderId, ProviderSnapshot,
    ReservationId, ReservationRecord, ReservationState, SlotKey,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReservationStoreError {
    #[error("reservation not found")]
    NotFound,
    #[error("invalid transition for reservation {reservation_id}: {from:?} -> {attempted}")]
    InvalidTransition {
        reservation_id: ReservationId,
        from: ReservationState,
        attempted: &'static str,
    },
    #[error("pending lock for reservation {reservation_id} has lapsed")]
    LockExpired { reservation_id: ReservationId },
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Database(String),
}

/// Everything captured into a reservation at lock time. The fee inside the
/// provider snapshot becomes the reservation amount; later fee changes do not
/// reach a pending reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLockRequest {
    pub patient_id: PatientId,
    pub slot: SlotKey,
    pub patient_snapshot: PatientSnapshot,
    pub provider_snapshot: ProviderSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLockOutcome {
    Locked {
        record: ReservationRecord,
        reused: bool,
    },
    Conflict {
        holder_state: ReservationState,
        lock_expires_at: Option<DateTime<Utc>>,
    },
}

/// Owns reservation records and their state transitions. Every method is one
/// atomic unit: `try_lock` in particular runs the full check-then-act for a
/// slot key inside a single critical section, so two concurrent calls for the
/// same key resolve to exactly one `Locked` and one `Conflict`.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn try_lock(
        &self,
        request: SlotLockRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<SlotLockOutcome, ReservationStoreError>;

    async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationRecord>, ReservationStoreError>;

    /// Valid only from `Pending` while the record still holds the slot at
    /// `now`; a lapsed unpaid lock is `LockExpired`, since another patient
    /// may have re-locked the slot under a new record.
    async fn mark_paid(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError>;

    /// Valid only from `Pending` while the record still holds the slot at
    /// `now` (a paid pending record always does).
    async fn confirm(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError>;

    /// Abandonment path: valid only from `Pending`; no payment involved.
    async fn release(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError>;

    /// Valid from `Pending` or `Confirmed`.
    async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: CancelActor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError>;

    /// Pending and confirmed reservations for one provider on one date; feeds
    /// the provider-leave bulk cancellation.
    async fn list_active_for_provider_date(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, ReservationStoreError>;
}

#[async_trait]
impl<R: ReservationRepository + ?Sized> ReservationRepository for Arc<R> {
    async fn try_lock(
        &self,
        request: SlotLockRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<SlotLockOutcome, ReservationStoreError> {
        (**self).try_lock(request, now, expires_at).await
    }

    async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationRecord>, ReservationStoreError> {
        (**self).get(reservation_id).await
    }

    async fn mark_paid(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        (**self).mark_paid(reservation_id, method, now).await
    }

    async fn confirm(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        (**self).confirm(reservation_id, now).await
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        (**self).release(reservation_id, now).await
    }

    async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: CancelActor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        (**self).cancel(reservation_id, actor, reason, now).await
    }

    async fn list_active_for_provider_date(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, ReservationStoreError> {
        (**self)
            .list_active_for_provider_date(provider_id, date)
            .await
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_slot: HashMap<SlotKey, Vec<ReservationId>>,
    records: HashMap<ReservationId, ReservationRecord>,
}

/// Single-instance store: the map mutex is the per-key critical section.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReservationRepository {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryReservationRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn fresh_record(
    request: SlotLockRequest,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> ReservationRecord {
    let amount = request.provider_snapshot.fee;
    ReservationRecord {
        reservation_id: ReservationId::new(),
        slot: request.slot,
        patient_id: request.patient_id,
        state: ReservationState::Pending,
        lock_expires_at: Some(expires_at),
        paid: false,
        amount,
        payment_method: None,
        cancelled_by: None,
        cancelled_at: None,
        cancellation_reason: None,
        patient_snapshot: request.patient_snapshot,
        provider_snapshot: request.provider_snapshot,
        created_at: now,
        updated_at: now,
    }
}

/// Overwrite a reclaimable record in place, keeping its identity. The slot
/// key is the true contention identity, so the record is reused rather than
/// a new row inserted.
fn reuse_record(
    record: &mut ReservationRecord,
    request: SlotLockRequest,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) {
    record.state = ReservationState::Pending;
    record.lock_expires_at = Some(expires_at);
    record.paid = false;
    record.amount = request.provider_snapshot.fee;
    record.payment_method = None;
    record.cancelled_by = None;
    record.cancelled_at = None;
    record.cancellation_reason = None;
    record.patient_snapshot = request.patient_snapshot;
    record.provider_snapshot = request.provider_snapshot;
    record.updated_at = now;
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn try_lock(
        &self,
        request: SlotLockRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<SlotLockOutcome, ReservationStoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let Inner { by_slot, records } = &mut *inner;
        let ids = by_slot.entry(request.slot).or_default();

        for id in ids.iter() {
            if let Some(existing) = records.get(id) {
                if existing.holds_slot_at(now) {
                    return Ok(SlotLockOutcome::Conflict {
                        holder_state: existing.state,
                        lock_expires_at: existing.lock_expires_at,
                    });
                }
            }
        }

        let reusable = ids.iter().copied().find(|id| {
            records.get(id).is_some_and(|existing| {
                existing.patient_id == request.patient_id && existing.is_reclaimable_at(now)
            })
        });
        if let Some(id) = reusable {
            let record = records
                .get_mut(&id)
                .ok_or(ReservationStoreError::NotFound)?;
            reuse_record(record, request, now, expires_at);
            return Ok(SlotLockOutcome::Locked {
                record: record.clone(),
                reused: true,
            });
        }

        let record = fresh_record(request, now, expires_at);
        ids.push(record.reservation_id);
        records.insert(record.reservation_id, record.clone());
        Ok(SlotLockOutcome::Locked {
            record,
            reused: false,
        })
    }

    async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationRecord>, ReservationStoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        Ok(inner.records.get(&reservation_id).cloned())
    }

    async fn mark_paid(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let record = inner
            .records
            .get_mut(&reservation_id)
            .ok_or(ReservationStoreError::NotFound)?;
        if record.state != ReservationState::Pending {
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id,
                from: record.state,
                attempted: "mark_paid",
            });
        }
        if !record.holds_slot_at(now) {
            return Err(ReservationStoreError::LockExpired { reservation_id });
        }
        record.paid = true;
        record.payment_method = Some(method);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn confirm(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let record = inner
            .records
            .get_mut(&reservation_id)
            .ok_or(ReservationStoreError::NotFound)?;
        if record.state != ReservationState::Pending {
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id,
                from: record.state,
                attempted: "confirm",
            });
        }
        if !record.holds_slot_at(now) {
            return Err(ReservationStoreError::LockExpired { reservation_id });
        }
        record.state = ReservationState::Confirmed;
        record.lock_expires_at = None;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let record = inner
            .records
            .get_mut(&reservation_id)
            .ok_or(ReservationStoreError::NotFound)?;
        if record.state != ReservationState::Pending {
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id,
                from: record.state,
                attempted: "release",
            });
        }
        record.state = ReservationState::Cancelled;
        record.cancelled_by = Some(CancelActor::Patient);
        record.cancelled_at = Some(now);
        record.cancellation_reason = Some("checkout abandoned".to_string());
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: CancelActor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let record = inner
            .records
            .get_mut(&reservation_id)
            .ok_or(ReservationStoreError::NotFound)?;
        if record.state == ReservationState::Cancelled {
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id,
                from: record.state,
                attempted: "cancel",
            });
        }
        record.state = ReservationState::Cancelled;
        record.cancelled_by = Some(actor);
        record.cancelled_at = Some(now);
        record.cancellation_reason = reason;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn list_active_for_provider_date(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, ReservationStoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ReservationStoreError::LockPoisoned)?;
        let mut active: Vec<ReservationRecord> = inner
            .records
            .values()
            .filter(|record| {
                record.slot.provider_id == provider_id
                    && record.slot.date == date
                    && record.state != ReservationState::Cancelled
            })
            .cloned()
            .collect();
        active.sort_by_key(|record| record.slot.start_time);
        Ok(active)
    }
}
