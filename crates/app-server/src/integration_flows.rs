//! End-to-end checkout flows over the in-memory stores.

use std::sync::Arc;

use booking_domain::{
    CancelActor, Money, PatientId, PatientSnapshot, PaymentMethod, PrincipalId, ProviderId,
    ProviderSnapshot, ReservationState, SlotKey, WalletKey,
};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use ledger_store::{InMemoryLedgerRepository, LedgerRepository};
use payment_gateway::{InMemoryPaymentGateway, PaymentGateway};
use reservation_engine::{
    InMemoryReservationRepository, ReservationConfig, ReservationEngine, ReservationError,
    ReservationRepository, SlotLockRequest,
};
use settlement::{RevenueSettlementService, RevenueSplitPolicy, SettlementConfig, SettlementError};
use wallet_service::{WalletError, WalletService};

use crate::checkout_orchestrator::{
    CheckoutError, begin_gateway_checkout, cancel_appointment, handle_provider_leave, lock_slot,
    process_gateway_payment, process_wallet_payment, release_slot, validate_wallet_balance,
};
use crate::directory_port::{InMemoryDirectory, PatientProfile, ProviderProfile};

struct Harness {
    wallets: WalletService<Arc<dyn LedgerRepository>>,
    reservations: ReservationEngine<Arc<dyn ReservationRepository>>,
    settlement: RevenueSettlementService<Arc<dyn LedgerRepository>>,
    gateway: InMemoryPaymentGateway,
    directory: InMemoryDirectory,
    platform_account: PrincipalId,
}

fn harness() -> Harness {
    let ledger: Arc<dyn LedgerRepository> = Arc::new(InMemoryLedgerRepository::new());
    let repo: Arc<dyn ReservationRepository> = Arc::new(InMemoryReservationRepository::new());
    let wallets = WalletService::new(ledger);
    let platform_account = PrincipalId::new();
    let settlement = RevenueSettlementService::new(
        wallets.clone(),
        SettlementConfig {
            platform_account,
            policy: RevenueSplitPolicy::default(),
        },
    );
    Harness {
        wallets,
        reservations: ReservationEngine::new(repo, ReservationConfig::default()),
        settlement,
        gateway: InMemoryPaymentGateway::new(),
        directory: InMemoryDirectory::new(),
        platform_account,
    }
}

fn seed_patient(harness: &Harness) -> PatientId {
    let patient_id = PatientId::new();
    harness
        .directory
        .upsert_patient(PatientProfile {
            patient_id,
            name: "pat".to_string(),
            contact: "pat@example.com".to_string(),
        })
        .expect("seed patient");
    patient_id
}

fn seed_provider(harness: &Harness, fee: Money) -> ProviderId {
    let provider_id = ProviderId::new();
    harness
        .directory
        .upsert_provider(ProviderProfile {
            provider_id,
            name: "dr".to_string(),
            speciality: "gp".to_string(),
            fee,
        })
        .expect("seed provider");
    provider_id
}

fn slot(provider_id: ProviderId, hour: u32) -> SlotKey {
    SlotKey {
        provider_id,
        date: NaiveDate::from_ymd_opt(2025, 9, 1).expect("date"),
        start_time: NaiveTime::from_hms_opt(hour, 0, 0).expect("time"),
    }
}

async fn top_up(harness: &Harness, patient_id: PatientId, amount: Money) {
    let key = WalletKey::patient(patient_id);
    harness.wallets.ensure_wallet(&key).await.expect("ensure");
    harness
        .wallets
        .credit(&key, amount, None, None, "top-up")
        .await
        .expect("credit");
}

#[tokio::test]
async fn gateway_checkout_settles_and_confirms() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 10))
        .await
        .expect("lock");
    let order = begin_gateway_checkout(&h.reservations, &h.gateway, lock.reservation_id)
        .await
        .expect("order");
    assert_eq!(order.amount, Money(50_000));

    // Verification must fail while the provider side has not captured.
    let err = process_gateway_payment(&h.reservations, &h.settlement, &h.gateway, &order.order_id)
        .await
        .expect_err("unpaid order");
    assert!(matches!(err, CheckoutError::PaymentVerificationFailed(_)));

    h.gateway.mark_paid(&order.order_id).expect("provider side");
    let confirmed =
        process_gateway_payment(&h.reservations, &h.settlement, &h.gateway, &order.order_id)
            .await
            .expect("verify");
    assert_eq!(confirmed.state, ReservationState::Confirmed);
    assert!(confirmed.paid);

    assert_eq!(
        h.wallets
            .balance(&WalletKey::provider(provider_id))
            .await
            .expect("balance"),
        Money(40_000)
    );
    assert_eq!(
        h.wallets
            .balance(&WalletKey::platform(h.platform_account))
            .await
            .expect("balance"),
        Money(10_000)
    );
}

#[tokio::test]
async fn gateway_amount_mismatch_is_rejected() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 10))
        .await
        .expect("lock");
    // Order created out-of-band for the wrong amount.
    let order = h
        .gateway
        .create_order(Money(1), &lock.reservation_id.to_string())
        .await
        .expect("order");
    h.gateway.mark_paid(&order.order_id).expect("provider side");

    let err = process_gateway_payment(&h.reservations, &h.settlement, &h.gateway, &order.order_id)
        .await
        .expect_err("amount mismatch");
    assert!(matches!(err, CheckoutError::PaymentVerificationFailed(_)));

    // The reservation is untouched and still pending.
    let record = h.reservations.get(lock.reservation_id).await.expect("get");
    assert_eq!(record.state, ReservationState::Pending);
    assert!(!record.paid);
}

#[tokio::test]
async fn wallet_checkout_moves_the_full_amount_through_the_ledger() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));
    top_up(&h, patient_id, Money(80_000)).await;

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 11))
        .await
        .expect("lock");
    validate_wallet_balance(&h.wallets, patient_id, lock.amount)
        .await
        .expect("funds available");
    let confirmed =
        process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
            .await
            .expect("pay");
    assert_eq!(confirmed.state, ReservationState::Confirmed);

    let patient = h
        .wallets
        .balance(&WalletKey::patient(patient_id))
        .await
        .expect("balance");
    let provider = h
        .wallets
        .balance(&WalletKey::provider(provider_id))
        .await
        .expect("balance");
    let platform = h
        .wallets
        .balance(&WalletKey::platform(h.platform_account))
        .await
        .expect("balance");
    assert_eq!(patient, Money(30_000));
    assert_eq!(provider, Money(40_000));
    assert_eq!(platform, Money(10_000));
}

#[tokio::test]
async fn short_wallet_fails_validation_before_any_mutation() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));
    top_up(&h, patient_id, Money(10_000)).await;

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 11))
        .await
        .expect("lock");
    let err = validate_wallet_balance(&h.wallets, patient_id, lock.amount)
        .await
        .expect_err("short");
    assert!(matches!(
        err,
        CheckoutError::Wallet(WalletError::InsufficientBalance { .. })
    ));
    assert_eq!(
        h.wallets
            .balance(&WalletKey::patient(patient_id))
            .await
            .expect("balance"),
        Money(10_000)
    );
}

#[tokio::test]
async fn cancellation_refunds_in_full_and_frees_the_slot() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));
    top_up(&h, patient_id, Money(50_000)).await;

    let key = slot(provider_id, 12);
    let lock = lock_slot(&h.reservations, &h.directory, patient_id, key)
        .await
        .expect("lock");
    process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
        .await
        .expect("pay");

    let cancelled = cancel_appointment(
        &h.reservations,
        &h.settlement,
        lock.reservation_id,
        CancelActor::Patient,
        Some("feeling better".to_string()),
    )
    .await
    .expect("cancel");
    assert_eq!(cancelled.state, ReservationState::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelActor::Patient));

    // The full fee came back, not the patient's 80% share of it.
    assert_eq!(
        h.wallets
            .balance(&WalletKey::patient(patient_id))
            .await
            .expect("balance"),
        Money(50_000)
    );

    // Another patient can now take the same slot.
    let other = seed_patient(&h);
    let relock = lock_slot(&h.reservations, &h.directory, other, key)
        .await
        .expect("relock");
    assert_ne!(relock.reservation_id, lock.reservation_id);
}

#[tokio::test]
async fn failed_refund_keeps_the_reservation_standing() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));
    top_up(&h, patient_id, Money(50_000)).await;

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 9))
        .await
        .expect("lock");
    process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
        .await
        .expect("pay");

    // Provider withdrew their share; the reversal debit cannot be covered.
    h.wallets
        .debit(
            &WalletKey::provider(provider_id),
            Money(40_000),
            None,
            None,
            "withdrawal",
        )
        .await
        .expect("drain");

    let err = cancel_appointment(
        &h.reservations,
        &h.settlement,
        lock.reservation_id,
        CancelActor::Patient,
        None,
    )
    .await
    .expect_err("refund impossible");
    assert!(matches!(
        err,
        CheckoutError::Settlement(SettlementError::ReversalShortfall { .. })
    ));

    // Money moved nowhere and the slot stays held.
    let record = h.reservations.get(lock.reservation_id).await.expect("get");
    assert_eq!(record.state, ReservationState::Confirmed);
    assert_eq!(
        h.wallets
            .balance(&WalletKey::patient(patient_id))
            .await
            .expect("balance"),
        Money::ZERO
    );
}

#[tokio::test]
async fn released_pending_lock_never_touches_wallets() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));

    let key = slot(provider_id, 16);
    let lock = lock_slot(&h.reservations, &h.directory, patient_id, key)
        .await
        .expect("lock");
    let released = release_slot(&h.reservations, lock.reservation_id)
        .await
        .expect("release");
    assert_eq!(released.state, ReservationState::Cancelled);

    let other = seed_patient(&h);
    lock_slot(&h.reservations, &h.directory, other, key)
        .await
        .expect("slot is free again");
}

#[tokio::test]
async fn lapsed_lock_payment_cannot_double_book_a_relocked_slot() {
    let h = harness();
    let patient_a = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(10_000));
    top_up(&h, patient_a, Money(10_000)).await;
    let key = slot(provider_id, 10);

    // Patient A locked long ago and never finished checkout.
    let stale = h
        .reservations
        .lock_at(
            SlotLockRequest {
                patient_id: patient_a,
                slot: key,
                patient_snapshot: PatientSnapshot {
                    name: "pat".to_string(),
                    contact: "pat@example.com".to_string(),
                },
                provider_snapshot: ProviderSnapshot {
                    name: "dr".to_string(),
                    speciality: "gp".to_string(),
                    fee: Money(10_000),
                },
            },
            Utc::now() - Duration::minutes(10),
        )
        .await
        .expect("lock");

    // Patient B legitimately holds the slot now.
    let patient_b = seed_patient(&h);
    top_up(&h, patient_b, Money(10_000)).await;
    let live = lock_slot(&h.reservations, &h.directory, patient_b, key)
        .await
        .expect("relock");

    // A's late payment must not produce a second active reservation.
    let err = process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, stale.reservation_id)
        .await
        .expect_err("stale payment");
    assert!(matches!(
        err,
        CheckoutError::Reservation(ReservationError::LockExpired)
    ));
    assert_eq!(
        h.wallets
            .balance(&WalletKey::patient(patient_a))
            .await
            .expect("balance"),
        Money(10_000)
    );

    process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, live.reservation_id)
        .await
        .expect("pay");
    let stale_record = h.reservations.get(stale.reservation_id).await.expect("get");
    assert_eq!(stale_record.state, ReservationState::Pending);
    assert!(!stale_record.paid);
    let live_record = h.reservations.get(live.reservation_id).await.expect("get");
    assert_eq!(live_record.state, ReservationState::Confirmed);
}

#[tokio::test]
async fn resubmitted_gateway_proof_is_a_noop_success() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(50_000));

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 10))
        .await
        .expect("lock");
    let order = begin_gateway_checkout(&h.reservations, &h.gateway, lock.reservation_id)
        .await
        .expect("order");
    h.gateway.mark_paid(&order.order_id).expect("provider side");
    process_gateway_payment(&h.reservations, &h.settlement, &h.gateway, &order.order_id)
        .await
        .expect("verify");

    // The client retries with the same verified order.
    let again = process_gateway_payment(&h.reservations, &h.settlement, &h.gateway, &order.order_id)
        .await
        .expect("rerun");
    assert_eq!(again.state, ReservationState::Confirmed);
    assert_eq!(again.reservation_id, lock.reservation_id);

    // No wallet moved twice.
    assert_eq!(
        h.wallets
            .balance(&WalletKey::provider(provider_id))
            .await
            .expect("balance"),
        Money(40_000)
    );
    assert_eq!(
        h.wallets
            .balance(&WalletKey::platform(h.platform_account))
            .await
            .expect("balance"),
        Money(10_000)
    );
}

#[tokio::test]
async fn interrupted_wallet_checkout_resumes_after_the_capture() {
    let h = harness();
    let patient_id = seed_patient(&h);
    let provider_id = seed_provider(&h, Money(10_000));
    top_up(&h, patient_id, Money(10_000)).await;

    let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, 10))
        .await
        .expect("lock");

    // A previous run stopped right after the capture: debit and mark_paid
    // applied, settlement and confirmation never ran.
    let patient_wallet = WalletKey::patient(patient_id);
    h.wallets
        .debit(
            &patient_wallet,
            Money(10_000),
            Some(lock.reservation_id),
            None,
            "wallet payment",
        )
        .await
        .expect("debit");
    h.reservations
        .mark_paid(lock.reservation_id, PaymentMethod::Wallet)
        .await
        .expect("mark paid");

    let confirmed =
        process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
            .await
            .expect("resume");
    assert_eq!(confirmed.state, ReservationState::Confirmed);

    // Debited exactly once, settled exactly once.
    assert_eq!(
        h.wallets.balance(&patient_wallet).await.expect("balance"),
        Money::ZERO
    );
    assert_eq!(
        h.wallets
            .balance(&WalletKey::provider(provider_id))
            .await
            .expect("balance"),
        Money(8_000)
    );
    assert_eq!(
        h.wallets
            .balance(&WalletKey::platform(h.platform_account))
            .await
            .expect("balance"),
        Money(2_000)
    );

    // A full rerun after completion changes nothing.
    let again =
        process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
            .await
            .expect("rerun");
    assert_eq!(again.state, ReservationState::Confirmed);
    assert_eq!(
        h.wallets.balance(&patient_wallet).await.expect("balance"),
        Money::ZERO
    );
}

#[tokio::test]
async fn provider_leave_cancels_the_day_and_reports_failed_refunds() {
    let h = harness();
    let provider_id = seed_provider(&h, Money(10_000));
    let date = NaiveDate::from_ymd_opt(2025, 9, 1).expect("date");

    // Two paid appointments and one still-pending lock.
    let mut paid_ids = Vec::new();
    for hour in [9, 10] {
        let patient_id = seed_patient(&h);
        top_up(&h, patient_id, Money(10_000)).await;
        let lock = lock_slot(&h.reservations, &h.directory, patient_id, slot(provider_id, hour))
            .await
            .expect("lock");
        process_wallet_payment(&h.reservations, &h.wallets, &h.settlement, lock.reservation_id)
            .await
            .expect("pay");
        paid_ids.push(lock.reservation_id);
    }
    let pending_patient = seed_patient(&h);
    let pending = lock_slot(
        &h.reservations,
        &h.directory,
        pending_patient,
        slot(provider_id, 11),
    )
    .await
    .expect("lock");

    // Provider wallet holds 16000 after two settlements; withdraw 6000 so
    // only one 8000 reversal fits.
    h.wallets
        .debit(
            &WalletKey::provider(provider_id),
            Money(6_000),
            None,
            None,
            "withdrawal",
        )
        .await
        .expect("drain");

    let report = handle_provider_leave(
        &h.reservations,
        &h.settlement,
        provider_id,
        date,
        "on leave",
    )
    .await
    .expect("leave");

    assert_eq!(report.cancelled_count, 2);
    assert_eq!(report.refunded_amount, Money(10_000));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].reservation_id, paid_ids[1]);
    assert!(
        report.failures[0].error.contains("reversal shortfall"),
        "unexpected failure reason: {}",
        report.failures[0].error
    );

    // The failed one still holds its slot for manual follow-up.
    let stuck = h.reservations.get(paid_ids[1]).await.expect("get");
    assert_eq!(stuck.state, ReservationState::Confirmed);
    let cancelled_pending = h.reservations.get(pending.reservation_id).await.expect("get");
    assert_eq!(cancelled_pending.state, ReservationState::Cancelled);
}
