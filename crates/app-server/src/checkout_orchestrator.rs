use booking_domain::{
    CancelActor, Money, PatientId, PaymentMethod, ProviderId, ReservationId, ReservationRecord,
    ReservationState, SlotKey, TransactionDirection, WalletKey,
};
use chrono::{NaiveDate, Utc};
use ledger_store::LedgerRepository;
use payment_gateway::{GatewayError, GatewayOrder, GatewayOrderStatus, PaymentGateway};
use reservation_engine::{
    ReservationEngine, ReservationError, ReservationRepository, SlotLock, SlotLockRequest,
};
use settlement::{RevenueSettlementService, SettlementError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use wallet_service::{WalletError, WalletService};

use crate::directory_port::DirectoryPort;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),
    #[error("reservation is not awaiting payment")]
    NotPayable,
    #[error("paid reservation cannot be released, cancel it instead")]
    PaidReservation,
    #[error("directory error: {0}")]
    Directory(String),
    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Lock a slot for a patient. Snapshots are taken here, so later profile or
/// fee edits never reach the reservation.
pub async fn lock_slot<R, D>(
    reservations: &ReservationEngine<R>,
    directory: &D,
    patient_id: PatientId,
    slot: SlotKey,
) -> Result<SlotLock, CheckoutError>
where
    R: ReservationRepository,
    D: DirectoryPort,
{
    let patient = directory
        .patient_profile(patient_id)
        .await
        .map_err(CheckoutError::Directory)?;
    let provider = directory
        .provider_profile(slot.provider_id)
        .await
        .map_err(CheckoutError::Directory)?;
    let lock = reservations
        .lock(SlotLockRequest {
            patient_id,
            slot,
            patient_snapshot: patient.snapshot(),
            provider_snapshot: provider.snapshot(),
        })
        .await?;
    Ok(lock)
}

/// Create the provider-side order for a pending reservation. The receipt is
/// the reservation id, which ties the later verification back to it.
pub async fn begin_gateway_checkout<R, G>(
    reservations: &ReservationEngine<R>,
    gateway: &G,
    reservation_id: ReservationId,
) -> Result<GatewayOrder, CheckoutError>
where
    R: ReservationRepository,
    G: PaymentGateway,
{
    let record = reservations.get(reservation_id).await?;
    if record.paid || record.payment_method.is_some() {
        return Err(CheckoutError::NotPayable);
    }
    let order = gateway
        .create_order(record.amount, &reservation_id.to_string())
        .await?;
    info!(
        %reservation_id,
        order_id = %order.order_id,
        amount = %order.amount,
        "gateway order created"
    );
    Ok(order)
}

/// Server-side verification of a gateway payment, then settlement and
/// confirmation. The client's claim of success is never trusted: the order is
/// re-fetched and must be `Paid`, match the reservation amount, and carry the
/// reservation id as its receipt.
pub async fn process_gateway_payment<R, L, G>(
    reservations: &ReservationEngine<R>,
    settlement: &RevenueSettlementService<L>,
    gateway: &G,
    order_id: &str,
) -> Result<ReservationRecord, CheckoutError>
where
    R: ReservationRepository,
    L: LedgerRepository + Clone,
    G: PaymentGateway,
{
    let order = gateway.fetch_order(order_id).await?;
    if order.status != GatewayOrderStatus::Paid {
        return Err(CheckoutError::PaymentVerificationFailed(format!(
            "order {order_id} is {:?}, not paid",
            order.status
        )));
    }
    let reservation_id = Uuid::parse_str(&order.receipt)
        .map(ReservationId)
        .map_err(|_| {
            CheckoutError::PaymentVerificationFailed(format!(
                "order {order_id} receipt does not name a reservation"
            ))
        })?;
    let record = reservations.get(reservation_id).await?;
    if order.amount != record.amount {
        return Err(CheckoutError::PaymentVerificationFailed(format!(
            "order {order_id} paid {}, reservation expects {}",
            order.amount, record.amount
        )));
    }

    // A resubmitted proof for an already-completed checkout is a success.
    if record.state == ReservationState::Confirmed && record.paid {
        return Ok(record);
    }
    match record.payment_method {
        // A paid-but-pending record means an earlier run failed between the
        // capture and confirmation; resume from settlement.
        Some(PaymentMethod::Gateway) => {}
        Some(PaymentMethod::Wallet) => return Err(CheckoutError::NotPayable),
        None => {
            reservations
                .mark_paid(reservation_id, PaymentMethod::Gateway)
                .await?;
        }
    }
    settlement
        .settle(reservation_id, record.slot.provider_id, record.amount)
        .await?;
    let confirmed = reservations.confirm(reservation_id).await?;
    info!(
        %reservation_id,
        order_id = %order_id,
        amount = %record.amount,
        "gateway payment captured and confirmed"
    );
    Ok(confirmed)
}

/// Pre-flight check for the wallet path so a doomed checkout fails before
/// any mutation.
pub async fn validate_wallet_balance<L>(
    wallets: &WalletService<L>,
    patient_id: PatientId,
    amount: Money,
) -> Result<(), CheckoutError>
where
    L: LedgerRepository + Clone,
{
    let key = WalletKey::patient(patient_id);
    let available = wallets.balance(&key).await?;
    if available < amount {
        return Err(CheckoutError::Wallet(WalletError::InsufficientBalance {
            requested: amount,
            available,
        }));
    }
    Ok(())
}

/// Wallet path: debit the patient wallet for the full amount, then settle and
/// confirm. The debit is the capture; a failed debit leaves the reservation
/// pending and untouched. Retrying after a partial failure resumes from
/// wherever the previous run stopped, and a rerun of a completed checkout is
/// a no-op success.
pub async fn process_wallet_payment<R, L>(
    reservations: &ReservationEngine<R>,
    wallets: &WalletService<L>,
    settlement: &RevenueSettlementService<L>,
    reservation_id: ReservationId,
) -> Result<ReservationRecord, CheckoutError>
where
    R: ReservationRepository,
    L: LedgerRepository + Clone,
{
    let record = reservations.get(reservation_id).await?;
    if record.state == ReservationState::Confirmed && record.paid {
        return Ok(record);
    }
    let patient_wallet = WalletKey::patient(record.patient_id);
    match record.payment_method {
        Some(PaymentMethod::Wallet) => {}
        Some(PaymentMethod::Gateway) => return Err(CheckoutError::NotPayable),
        None => {
            if record.state == ReservationState::Pending && !record.holds_slot_at(Utc::now()) {
                return Err(CheckoutError::Reservation(ReservationError::LockExpired));
            }
            // The debit is only replayed if no earlier attempt left the
            // patient out of pocket for this reservation.
            let debits = wallets
                .transactions_for_reservation(
                    &patient_wallet,
                    reservation_id,
                    TransactionDirection::Debit,
                )
                .await?;
            let refunds = wallets
                .transactions_for_reservation(
                    &patient_wallet,
                    reservation_id,
                    TransactionDirection::Credit,
                )
                .await?;
            let captured = debits.len() > refunds.len();
            if !captured {
                wallets
                    .debit(
                        &patient_wallet,
                        record.amount,
                        Some(reservation_id),
                        None,
                        format!("wallet payment for appointment {reservation_id}"),
                    )
                    .await?;
            }
            if let Err(err) = reservations
                .mark_paid(reservation_id, PaymentMethod::Wallet)
                .await
            {
                // The slot was lost while the money moved; hand the debit
                // straight back before surfacing the failure.
                wallets
                    .credit(
                        &patient_wallet,
                        record.amount,
                        Some(reservation_id),
                        None,
                        format!("returned payment for appointment {reservation_id}"),
                    )
                    .await?;
                return Err(err.into());
            }
        }
    }
    settlement
        .settle(reservation_id, record.slot.provider_id, record.amount)
        .await?;
    let confirmed = reservations.confirm(reservation_id).await?;
    info!(
        %reservation_id,
        amount = %record.amount,
        "wallet payment captured and confirmed"
    );
    Ok(confirmed)
}

/// Cancel an appointment. For a paid reservation the refund runs first and
/// the slot is surrendered only once the money has moved; a failed reversal
/// leaves the reservation standing.
pub async fn cancel_appointment<R, L>(
    reservations: &ReservationEngine<R>,
    settlement: &RevenueSettlementService<L>,
    reservation_id: ReservationId,
    actor: CancelActor,
    reason: Option<String>,
) -> Result<ReservationRecord, CheckoutError>
where
    R: ReservationRepository,
    L: LedgerRepository + Clone,
{
    let record = reservations.get(reservation_id).await?;
    if record.paid {
        settlement
            .reverse(
                reservation_id,
                record.slot.provider_id,
                record.patient_id,
                record.amount,
            )
            .await?;
    }
    let cancelled = reservations.cancel(reservation_id, actor, reason).await?;
    info!(
        %reservation_id,
        actor = actor.as_str(),
        refunded = record.paid,
        "appointment cancelled"
    );
    Ok(cancelled)
}

/// Abandonment: give the slot back without any money movement. Only valid
/// while the reservation is still pending and unpaid.
pub async fn release_slot<R>(
    reservations: &ReservationEngine<R>,
    reservation_id: ReservationId,
) -> Result<ReservationRecord, CheckoutError>
where
    R: ReservationRepository,
{
    let record = reservations.get(reservation_id).await?;
    if record.paid {
        return Err(CheckoutError::PaidReservation);
    }
    Ok(reservations.release(reservation_id).await?)
}

#[derive(Debug, Clone)]
pub struct LeaveFailure {
    pub reservation_id: ReservationId,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct LeaveReport {
    pub cancelled_count: usize,
    pub refunded_amount: Money,
    pub failures: Vec<LeaveFailure>,
}

/// Provider leave: cancel and refund every active reservation for the day,
/// best effort. One failed refund does not block the rest; failures come back
/// in the report for manual follow-up.
pub async fn handle_provider_leave<R, L>(
    reservations: &ReservationEngine<R>,
    settlement: &RevenueSettlementService<L>,
    provider_id: ProviderId,
    date: NaiveDate,
    reason: impl Into<String>,
) -> Result<LeaveReport, CheckoutError>
where
    R: ReservationRepository,
    L: LedgerRepository + Clone,
{
    let reason = reason.into();
    let active = reservations
        .active_for_provider_date(provider_id, date)
        .await?;
    let mut report = LeaveReport::default();
    for record in active {
        match cancel_appointment(
            reservations,
            settlement,
            record.reservation_id,
            CancelActor::Provider,
            Some(reason.clone()),
        )
        .await
        {
            Ok(_) => {
                report.cancelled_count += 1;
                if record.paid {
                    report.refunded_amount = report.refunded_amount.saturating_add(record.amount);
                }
            }
            Err(err) => {
                warn!(
                    reservation_id = %record.reservation_id,
                    error = %err,
                    "leave cancellation failed, continuing"
                );
                report.failures.push(LeaveFailure {
                    reservation_id: record.reservation_id,
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        provider_id = %provider_id,
        %date,
        cancelled = report.cancelled_count,
        refunded = %report.refunded_amount,
        failed = report.failures.len(),
        "provider leave processed"
    );
    Ok(report)
}
