use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use booking_domain::{
    CancelActor, Money, PatientId, PatientSnapshot, PaymentMethod, ProviderId, ProviderSnapshot,
    ReservationId, ReservationRecord, ReservationState, SlotKey,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::store::{
    ReservationRepository, ReservationStoreError, SlotLockOutcome, SlotLockRequest,
};

/// `reservations` table, one row per reservation. Slot contention is
/// serialized with a transaction-scoped advisory lock derived from the slot
/// key, so the conflict check and the insert/update run without a unique
/// constraint on live rows.
#[derive(Debug, Clone)]
pub struct PostgresReservationRepository {
    pool: PgPool,
}

impl PostgresReservationRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(err: sqlx::Error) -> ReservationStoreError {
    ReservationStoreError::Database(err.to_string())
}

fn slot_lock_key(slot: &SlotKey) -> i64 {
    let mut hasher = DefaultHasher::new();
    slot.provider_id.0.hash(&mut hasher);
    slot.date.hash(&mut hasher);
    slot.start_time.hash(&mut hasher);
    hasher.finish() as i64
}

fn state_from_str(value: &str) -> Result<ReservationState, ReservationStoreError> {
    match value {
        "pending" => Ok(ReservationState::Pending),
        "confirmed" => Ok(ReservationState::Confirmed),
        "cancelled" => Ok(ReservationState::Cancelled),
        other => Err(ReservationStoreError::Database(format!(
            "unknown reservation state {other}"
        ))),
    }
}

fn actor_from_str(value: &str) -> Result<CancelActor, ReservationStoreError> {
    match value {
        "patient" => Ok(CancelActor::Patient),
        "provider" => Ok(CancelActor::Provider),
        "platform" => Ok(CancelActor::Platform),
        other => Err(ReservationStoreError::Database(format!(
            "unknown cancel actor {other}"
        ))),
    }
}

fn method_from_str(value: &str) -> Result<PaymentMethod, ReservationStoreError> {
    match value {
        "gateway" => Ok(PaymentMethod::Gateway),
        "wallet" => Ok(PaymentMethod::Wallet),
        other => Err(ReservationStoreError::Database(format!(
            "unknown payment method {other}"
        ))),
    }
}

fn money_to_bigint(amount: Money) -> Result<i64, ReservationStoreError> {
    i64::try_from(amount.0)
        .map_err(|_| ReservationStoreError::Database("amount exceeds bigint range".to_string()))
}

fn bigint_to_money(raw: i64) -> Result<Money, ReservationStoreError> {
    u64::try_from(raw)
        .map(Money)
        .map_err(|_| ReservationStoreError::Database("negative amount in storage".to_string()))
}

fn row_to_record(row: &PgRow) -> Result<ReservationRecord, ReservationStoreError> {
    let state: String = row.try_get("state").map_err(db_err)?;
    let cancelled_by: Option<String> = row.try_get("cancelled_by").map_err(db_err)?;
    let payment_method: Option<String> = row.try_get("payment_method").map_err(db_err)?;
    Ok(ReservationRecord {
        reservation_id: ReservationId(row.try_get::<Uuid, _>("reservation_id").map_err(db_err)?),
        slot: SlotKey {
            provider_id: ProviderId(row.try_get::<Uuid, _>("provider_id").map_err(db_err)?),
            date: row.try_get("slot_date").map_err(db_err)?,
            start_time: row.try_get("slot_start_time").map_err(db_err)?,
        },
        patient_id: PatientId(row.try_get::<Uuid, _>("patient_id").map_err(db_err)?),
        state: state_from_str(&state)?,
        lock_expires_at: row.try_get("lock_expires_at").map_err(db_err)?,
        paid: row.try_get("paid").map_err(db_err)?,
        amount: bigint_to_money(row.try_get("amount").map_err(db_err)?)?,
        payment_method: payment_method.as_deref().map(method_from_str).transpose()?,
        cancelled_by: cancelled_by.as_deref().map(actor_from_str).transpose()?,
        cancelled_at: row.try_get("cancelled_at").map_err(db_err)?,
        cancellation_reason: row.try_get("cancellation_reason").map_err(db_err)?,
        patient_snapshot: PatientSnapshot {
            name: row.try_get("patient_name").map_err(db_err)?,
            contact: row.try_get("patient_contact").map_err(db_err)?,
        },
        provider_snapshot: ProviderSnapshot {
            name: row.try_get("provider_name").map_err(db_err)?,
            speciality: row.try_get("provider_speciality").map_err(db_err)?,
            fee: bigint_to_money(row.try_get("provider_fee").map_err(db_err)?)?,
        },
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

const SELECT_COLUMNS: &str = "reservation_id, provider_id, slot_date, slot_start_time, \
     patient_id, state, lock_expires_at, paid, amount, payment_method, cancelled_by, \
     cancelled_at, cancellation_reason, patient_name, patient_contact, provider_name, \
     provider_speciality, provider_fee, created_at, updated_at";

async fn fetch_slot_rows(
    tx: &mut Transaction<'_, Postgres>,
    slot: &SlotKey,
) -> Result<Vec<ReservationRecord>, ReservationStoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM reservations \
         WHERE provider_id = $1 AND slot_date = $2 AND slot_start_time = $3"
    ))
    .bind(slot.provider_id.0)
    .bind(slot.date)
    .bind(slot.start_time)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_err)?;
    rows.iter().map(row_to_record).collect()
}

async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &ReservationRecord,
) -> Result<(), ReservationStoreError> {
    sqlx::query(
        "INSERT INTO reservations (reservation_id, provider_id, slot_date, slot_start_time, \
         patient_id, state, lock_expires_at, paid, amount, payment_method, cancelled_by, \
         cancelled_at, cancellation_reason, patient_name, patient_contact, provider_name, \
         provider_speciality, provider_fee, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
         $18, $19, $20)",
    )
    .bind(record.reservation_id.0)
    .bind(record.slot.provider_id.0)
    .bind(record.slot.date)
    .bind(record.slot.start_time)
    .bind(record.patient_id.0)
    .bind(record.state.as_str())
    .bind(record.lock_expires_at)
    .bind(record.paid)
    .bind(money_to_bigint(record.amount)?)
    .bind(record.payment_method.map(PaymentMethod::as_str))
    .bind(record.cancelled_by.map(CancelActor::as_str))
    .bind(record.cancelled_at)
    .bind(record.cancellation_reason.as_deref())
    .bind(record.patient_snapshot.name.as_str())
    .bind(record.patient_snapshot.contact.as_str())
    .bind(record.provider_snapshot.name.as_str())
    .bind(record.provider_snapshot.speciality.as_str())
    .bind(money_to_bigint(record.provider_snapshot.fee)?)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn reuse_existing(
    tx: &mut Transaction<'_, Postgres>,
    reservation_id: ReservationId,
    request: &SlotLockRequest,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), ReservationStoreError> {
    sqlx::query(
        "UPDATE reservations SET state = 'pending', lock_expires_at = $2, paid = FALSE, \
         amount = $3, payment_method = NULL, cancelled_by = NULL, cancelled_at = NULL, \
         cancellation_reason = NULL, patient_name = $4, patient_contact = $5, \
         provider_name = $6, provider_speciality = $7, provider_fee = $3, updated_at = $8 \
         WHERE reservation_id = $1",
    )
    .bind(reservation_id.0)
    .bind(expires_at)
    .bind(money_to_bigint(request.provider_snapshot.fee)?)
    .bind(request.patient_snapshot.name.as_str())
    .bind(request.patient_snapshot.contact.as_str())
    .bind(request.provider_snapshot.name.as_str())
    .bind(request.provider_snapshot.speciality.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

impl PostgresReservationRepository {
    async fn fetch_one(
        &self,
        reservation_id: ReservationId,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM reservations WHERE reservation_id = $1"
        ))
        .bind(reservation_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(ReservationStoreError::NotFound)?;
        row_to_record(&row)
    }

    /// A conditional update that touched no row lost to a state change or a
    /// lapsed lock; surface which one in the error.
    async fn check_transition(
        &self,
        reservation_id: ReservationId,
        attempted: &'static str,
        rows_affected: u64,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        if rows_affected == 0 {
            let current = self.fetch_one(reservation_id).await?;
            if current.state == ReservationState::Pending && !current.holds_slot_at(now) {
                return Err(ReservationStoreError::LockExpired { reservation_id });
            }
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id,
                from: current.state,
                attempted,
            });
        }
        self.fetch_one(reservation_id).await
    }
}

#[async_trait]
impl ReservationRepository for PostgresReservationRepository {
    async fn try_lock(
        &self,
        request: SlotLockRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<SlotLockOutcome, ReservationStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Released at commit or rollback; serializes all lock attempts for
        // this slot key.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(slot_lock_key(&request.slot))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let existing = fetch_slot_rows(&mut tx, &request.slot).await?;
        for record in &existing {
            if record.holds_slot_at(now) {
                let outcome = SlotLockOutcome::Conflict {
                    holder_state: record.state,
                    lock_expires_at: record.lock_expires_at,
                };
                tx.rollback().await.map_err(db_err)?;
                return Ok(outcome);
            }
        }

        if let Some(reusable) = existing
            .iter()
            .find(|record| record.patient_id == request.patient_id && record.is_reclaimable_at(now))
        {
            reuse_existing(&mut tx, reusable.reservation_id, &request, now, expires_at).await?;
            tx.commit().await.map_err(db_err)?;
            let record = self.fetch_one(reusable.reservation_id).await?;
            return Ok(SlotLockOutcome::Locked {
                record,
                reused: true,
            });
        }

        let mut record = ReservationRecord {
            reservation_id: ReservationId::new(),
            slot: request.slot,
            patient_id: request.patient_id,
            state: ReservationState::Pending,
            lock_expires_at: Some(expires_at),
            paid: false,
            amount: request.provider_snapshot.fee,
            payment_method: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            patient_snapshot: request.patient_snapshot,
            provider_snapshot: request.provider_snapshot,
            created_at: now,
            updated_at: now,
        };
        insert_record(&mut tx, &record).await?;
        tx.commit().await.map_err(db_err)?;
        record.updated_at = now;
        Ok(SlotLockOutcome::Locked {
            record,
            reused: false,
        })
    }

    async fn get(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationRecord>, ReservationStoreError> {
        match self.fetch_one(reservation_id).await {
            Ok(record) => Ok(Some(record)),
            Err(ReservationStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn mark_paid(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET paid = TRUE, payment_method = $2, updated_at = $3 \
             WHERE reservation_id = $1 AND state = 'pending' AND lock_expires_at > $3",
        )
        .bind(reservation_id.0)
        .bind(method.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.check_transition(reservation_id, "mark_paid", result.rows_affected(), now)
            .await
    }

    async fn confirm(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = 'confirmed', lock_expires_at = NULL, \
             updated_at = $2 \
             WHERE reservation_id = $1 AND state = 'pending' \
               AND (paid OR lock_expires_at > $2)",
        )
        .bind(reservation_id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.check_transition(reservation_id, "confirm", result.rows_affected(), now)
            .await
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = 'cancelled', cancelled_by = 'patient', \
             cancelled_at = $2, cancellation_reason = 'checkout abandoned', updated_at = $2 \
             WHERE reservation_id = $1 AND state = 'pending'",
        )
        .bind(reservation_id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.check_transition(reservation_id, "release", result.rows_affected(), now)
            .await
    }

    async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: CancelActor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReservationRecord, ReservationStoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = 'cancelled', cancelled_by = $2, cancelled_at = $3, \
             cancellation_reason = $4, updated_at = $3 \
             WHERE reservation_id = $1 AND state IN ('pending', 'confirmed')",
        )
        .bind(reservation_id.0)
        .bind(actor.as_str())
        .bind(now)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.check_transition(reservation_id, "cancel", result.rows_affected(), now)
            .await
    }

    async fn list_active_for_provider_date(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, ReservationStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE provider_id = $1 AND slot_date = $2 AND state <> 'cancelled' \
             ORDER BY slot_start_time"
        ))
        .bind(provider_id.0)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }
}
