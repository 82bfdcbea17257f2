use booking_domain::{
    CancelActor, Money, PaymentMethod, ProviderId, ReservationId, ReservationRecord,
    ReservationState,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::store::{
    ReservationRepository, ReservationStoreError, SlotLockOutcome, SlotLockRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// How long a pending lock holds the slot before it lapses.
    pub lock_ttl: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("slot is held by a {holder_state:?} reservation")]
    SlotConflict {
        holder_state: ReservationState,
        lock_expires_at: Option<DateTime<Utc>>,
    },
    #[error("reservation not found")]
    NotFound,
    #[error("invalid transition: cannot {attempted} a {from:?} reservation")]
    InvalidTransition {
        from: ReservationState,
        attempted: &'static str,
    },
    #[error("pending lock has lapsed; the slot must be locked again")]
    LockExpired,
    #[error("consultation fee must be positive")]
    ZeroFee,
    #[error("store error: {0}")]
    Store(ReservationStoreError),
}

impl From<ReservationStoreError> for ReservationError {
    fn from(err: ReservationStoreError) -> Self {
        match err {
            ReservationStoreError::NotFound => Self::NotFound,
            ReservationStoreError::InvalidTransition {
                from, attempted, ..
            } => Self::InvalidTransition { from, attempted },
            ReservationStoreError::LockExpired { .. } => Self::LockExpired,
            other => Self::Store(other),
        }
    }
}

/// What a successful lock hands back to checkout: the identity to pay
/// against, the deadline, and the amount frozen at lock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLock {
    pub reservation_id: ReservationId,
    pub lock_expires_at: DateTime<Utc>,
    pub amount: Money,
}

/// Drives the reservation lifecycle over a [`ReservationRepository`]. The
/// repository carries the atomicity; this layer applies the lock TTL and the
/// fee guard, and logs transitions.
#[derive(Debug, Clone)]
pub struct ReservationEngine<R> {
    repo: R,
    config: ReservationConfig,
}

impl<R: ReservationRepository> ReservationEngine<R> {
    pub fn new(repo: R, config: ReservationConfig) -> Self {
        Self { repo, config }
    }

    #[must_use]
    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub async fn lock(&self, request: SlotLockRequest) -> Result<SlotLock, ReservationError> {
        self.lock_at(request, Utc::now()).await
    }

    /// Lock with an explicit clock, used by expiry tests and replays.
    pub async fn lock_at(
        &self,
        request: SlotLockRequest,
        now: DateTime<Utc>,
    ) -> Result<SlotLock, ReservationError> {
        if request.provider_snapshot.fee.is_zero() {
            return Err(ReservationError::ZeroFee);
        }
        let expires_at = now + self.config.lock_ttl;
        let outcome = self.repo.try_lock(request, now, expires_at).await?;
        match outcome {
            SlotLockOutcome::Locked { record, reused } => {
                info!(
                    reservation_id = %record.reservation_id,
                    provider_id = %record.slot.provider_id,
                    date = %record.slot.date,
                    start_time = %record.slot.start_time,
                    reused,
                    "slot locked"
                );
                Ok(SlotLock {
                    reservation_id: record.reservation_id,
                    lock_expires_at: expires_at,
                    amount: record.amount,
                })
            }
            SlotLockOutcome::Conflict {
                holder_state,
                lock_expires_at,
            } => Err(ReservationError::SlotConflict {
                holder_state,
                lock_expires_at,
            }),
        }
    }

    pub async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ReservationRecord, ReservationError> {
        self.repo
            .get(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound)
    }

    /// The payment capture. Rejected once the pending lock has lapsed, since
    /// the slot may already be held by a newer reservation.
    pub async fn mark_paid(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
    ) -> Result<ReservationRecord, ReservationError> {
        let record = self
            .repo
            .mark_paid(reservation_id, method, Utc::now())
            .await?;
        info!(
            reservation_id = %reservation_id,
            method = method.as_str(),
            "reservation marked paid"
        );
        Ok(record)
    }

    pub async fn confirm(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ReservationRecord, ReservationError> {
        let record = self.repo.confirm(reservation_id, Utc::now()).await?;
        info!(reservation_id = %reservation_id, "reservation confirmed");
        Ok(record)
    }

    pub async fn release(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ReservationRecord, ReservationError> {
        let record = self.repo.release(reservation_id, Utc::now()).await?;
        info!(reservation_id = %reservation_id, "reservation released");
        Ok(record)
    }

    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: CancelActor,
        reason: Option<String>,
    ) -> Result<ReservationRecord, ReservationError> {
        let record = self
            .repo
            .cancel(reservation_id, actor, reason, Utc::now())
            .await?;
        info!(
            reservation_id = %reservation_id,
            actor = actor.as_str(),
            "reservation cancelled"
        );
        Ok(record)
    }

    pub async fn active_for_provider_date(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, ReservationError> {
        Ok(self
            .repo
            .list_active_for_provider_date(provider_id, date)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use booking_domain::{PatientId, PatientSnapshot, ProviderSnapshot, SlotKey};
    use chrono::{NaiveTime, Utc};

    use super::*;
    use crate::store::InMemoryReservationRepository;

    fn engine() -> ReservationEngine<InMemoryReservationRepository> {
        ReservationEngine::new(
            InMemoryReservationRepository::new(),
            ReservationConfig::default(),
        )
    }

    fn slot(provider_id: ProviderId) -> SlotKey {
        SlotKey {
            provider_id,
            date: NaiveDate::from_ymd_opt(2025, 3, 3).expect("date"),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
        }
    }

    fn request(patient_id: PatientId, slot: SlotKey, fee: Money) -> SlotLockRequest {
        SlotLockRequest {
            patient_id,
            slot,
            patient_snapshot: PatientSnapshot {
                name: "pat".to_string(),
                contact: "pat@example.com".to_string(),
            },
            provider_snapshot: ProviderSnapshot {
                name: "dr".to_string(),
                speciality: "gp".to_string(),
                fee,
            },
        }
    }

    #[tokio::test]
    async fn lock_freezes_the_fee_into_the_amount() {
        let engine = engine();
        let lock = engine
            .lock(request(
                PatientId::new(),
                slot(ProviderId::new()),
                Money(75_000),
            ))
            .await
            .expect("lock");
        assert_eq!(lock.amount, Money(75_000));
        let record = engine.get(lock.reservation_id).await.expect("get");
        assert_eq!(record.state, ReservationState::Pending);
        assert_eq!(record.amount, Money(75_000));
    }

    #[tokio::test]
    async fn zero_fee_provider_cannot_be_booked() {
        let engine = engine();
        let err = engine
            .lock(request(
                PatientId::new(),
                slot(ProviderId::new()),
                Money::ZERO,
            ))
            .await
            .expect_err("zero fee");
        assert!(matches!(err, ReservationError::ZeroFee));
    }

    #[tokio::test]
    async fn conflicting_lock_reports_holder_state_and_deadline() {
        let engine = engine();
        let key = slot(ProviderId::new());
        let lock = engine
            .lock(request(PatientId::new(), key, Money(10_000)))
            .await
            .expect("lock");

        let err = engine
            .lock(request(PatientId::new(), key, Money(10_000)))
            .await
            .expect_err("conflict");
        let ReservationError::SlotConflict {
            holder_state,
            lock_expires_at,
        } = err
        else {
            panic!("expected conflict");
        };
        assert_eq!(holder_state, ReservationState::Pending);
        assert_eq!(lock_expires_at, Some(lock.lock_expires_at));
    }

    #[tokio::test]
    async fn concurrent_lock_attempts_admit_exactly_one() {
        let engine = std::sync::Arc::new(engine());
        let key = slot(ProviderId::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .lock(request(PatientId::new(), key, Money(10_000)))
                    .await
            }));
        }
        let mut won = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => won += 1,
                Err(ReservationError::SlotConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn lapsed_lock_is_reclaimable_after_the_ttl() {
        let engine = engine();
        let key = slot(ProviderId::new());
        let patient_id = PatientId::new();
        let t0 = Utc::now();

        let first = engine
            .lock_at(request(patient_id, key, Money(10_000)), t0)
            .await
            .expect("lock");

        // Still inside the TTL: conflict.
        let t1 = t0 + Duration::minutes(4);
        assert!(matches!(
            engine
                .lock_at(request(patient_id, key, Money(10_000)), t1)
                .await,
            Err(ReservationError::SlotConflict { .. })
        ));

        // Past the TTL: same patient reclaims the same reservation.
        let t2 = t0 + Duration::minutes(5) + Duration::seconds(1);
        let second = engine
            .lock_at(request(patient_id, key, Money(12_000)), t2)
            .await
            .expect("reclaim");
        assert_eq!(second.reservation_id, first.reservation_id);
        assert_eq!(second.amount, Money(12_000));
    }

    #[tokio::test]
    async fn confirmed_reservation_blocks_the_slot_indefinitely() {
        let engine = engine();
        let key = slot(ProviderId::new());
        let t0 = Utc::now();
        let lock = engine
            .lock_at(request(PatientId::new(), key, Money(10_000)), t0)
            .await
            .expect("lock");
        engine.confirm(lock.reservation_id).await.expect("confirm");

        let t1 = t0 + Duration::days(1);
        let err = engine
            .lock_at(request(PatientId::new(), key, Money(10_000)), t1)
            .await
            .expect_err("held");
        assert!(matches!(
            err,
            ReservationError::SlotConflict {
                holder_state: ReservationState::Confirmed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn release_then_relock_by_another_patient() {
        let engine = engine();
        let key = slot(ProviderId::new());
        let lock = engine
            .lock(request(PatientId::new(), key, Money(10_000)))
            .await
            .expect("lock");
        engine.release(lock.reservation_id).await.expect("release");

        let relock = engine
            .lock(request(PatientId::new(), key, Money(10_000)))
            .await
            .expect("relock");
        assert_ne!(relock.reservation_id, lock.reservation_id);
    }

    #[tokio::test]
    async fn mark_paid_then_confirm_records_the_method() {
        let engine = engine();
        let lock = engine
            .lock(request(
                PatientId::new(),
                slot(ProviderId::new()),
                Money(10_000),
            ))
            .await
            .expect("lock");
        engine
            .mark_paid(lock.reservation_id, PaymentMethod::Wallet)
            .await
            .expect("mark paid");
        let record = engine.confirm(lock.reservation_id).await.expect("confirm");
        assert!(record.paid);
        assert_eq!(record.payment_method, Some(PaymentMethod::Wallet));
        assert_eq!(record.lock_expires_at, None);
    }

    #[tokio::test]
    async fn stale_payment_cannot_confirm_a_relocked_slot() {
        let engine = engine();
        let key = slot(ProviderId::new());

        // First patient locked long ago; the lock has lapsed in real time.
        let t0 = Utc::now() - Duration::minutes(10);
        let stale = engine
            .lock_at(request(PatientId::new(), key, Money(10_000)), t0)
            .await
            .expect("lock");

        // Second patient holds the slot now.
        let live = engine
            .lock(request(PatientId::new(), key, Money(10_000)))
            .await
            .expect("relock");

        let err = engine
            .mark_paid(stale.reservation_id, PaymentMethod::Wallet)
            .await
            .expect_err("stale capture");
        assert!(matches!(err, ReservationError::LockExpired));
        let err = engine
            .confirm(stale.reservation_id)
            .await
            .expect_err("stale confirm");
        assert!(matches!(err, ReservationError::LockExpired));

        // The live reservation proceeds normally.
        engine
            .mark_paid(live.reservation_id, PaymentMethod::Wallet)
            .await
            .expect("mark paid");
        let record = engine.confirm(live.reservation_id).await.expect("confirm");
        assert_eq!(record.state, ReservationState::Confirmed);
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.get(ReservationId::new()).await,
            Err(ReservationError::NotFound)
        ));
        assert!(matches!(
            engine.confirm(ReservationId::new()).await,
            Err(ReservationError::NotFound)
        ));
    }
}
