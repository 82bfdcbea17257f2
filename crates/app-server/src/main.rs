mod checkout_orchestrator;
mod composition;
mod directory_port;
#[cfg(test)]
mod integration_flows;

use anyhow::Result;
use booking_domain::{CancelActor, Money, PatientId, ProviderId, SlotKey, WalletKey};
use chrono::{NaiveDate, NaiveTime};
use checkout_orchestrator::{
    begin_gateway_checkout, cancel_appointment, handle_provider_leave, lock_slot,
    process_gateway_payment, process_wallet_payment, release_slot, validate_wallet_balance,
};
use composition::build_services;
use directory_port::{PatientProfile, ProviderProfile};
use observability::init_tracing;
use platform_core::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.app.service_name, &config.observability.log_filter);

    let services = build_services(&config);

    let patient_id = PatientId::new();
    let provider_id = ProviderId::new();
    services
        .directory
        .upsert_patient(PatientProfile {
            patient_id,
            name: "Asha Rao".to_string(),
            contact: "asha@example.com".to_string(),
        })
        .map_err(anyhow::Error::msg)?;
    services
        .directory
        .upsert_provider(ProviderProfile {
            provider_id,
            name: "Dr. Mehta".to_string(),
            speciality: "dermatology".to_string(),
            fee: Money::from_major(500)?,
        })
        .map_err(anyhow::Error::msg)?;

    let date = NaiveDate::from_ymd_opt(2025, 7, 14).ok_or_else(|| anyhow::anyhow!("bad date"))?;
    let morning = SlotKey {
        provider_id,
        date,
        start_time: NaiveTime::from_hms_opt(10, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("bad time"))?,
    };
    let afternoon = SlotKey {
        start_time: NaiveTime::from_hms_opt(15, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("bad time"))?,
        ..morning
    };

    // Gateway path: lock, pay on the provider side, verify and confirm.
    let demo_gateway = services
        .demo_gateway
        .clone()
        .ok_or_else(|| anyhow::anyhow!("demo flows need a non-prod gateway"))?;
    let lock = lock_slot(&services.reservations, &services.directory, patient_id, morning).await?;
    let order =
        begin_gateway_checkout(&services.reservations, &services.gateway, lock.reservation_id)
            .await?;
    demo_gateway
        .mark_paid(&order.order_id)
        .map_err(anyhow::Error::msg)?;
    let confirmed = process_gateway_payment(
        &services.reservations,
        &services.settlement,
        &services.gateway,
        &order.order_id,
    )
    .await?;
    info!(reservation_id = %confirmed.reservation_id, "gateway checkout confirmed");

    // Wallet path: top up, validate, pay from balance.
    let patient_wallet = WalletKey::patient(patient_id);
    services.wallets.ensure_wallet(&patient_wallet).await?;
    services
        .wallets
        .credit(
            &patient_wallet,
            Money::from_major(1_000)?,
            None,
            None,
            "demo top-up",
        )
        .await?;
    let lock = lock_slot(
        &services.reservations,
        &services.directory,
        patient_id,
        afternoon,
    )
    .await?;
    validate_wallet_balance(&services.wallets, patient_id, lock.amount).await?;
    let confirmed = process_wallet_payment(
        &services.reservations,
        &services.wallets,
        &services.settlement,
        lock.reservation_id,
    )
    .await?;
    info!(reservation_id = %confirmed.reservation_id, "wallet checkout confirmed");

    // Patient cancels the wallet-paid appointment; refund lands in the wallet.
    cancel_appointment(
        &services.reservations,
        &services.settlement,
        confirmed.reservation_id,
        CancelActor::Patient,
        Some("schedule conflict".to_string()),
    )
    .await?;
    let balance = services.wallets.balance(&patient_wallet).await?;
    info!(balance = %balance, "patient wallet after refund");

    // Abandoned checkout: lock and give the slot back untouched.
    let evening = SlotKey {
        start_time: NaiveTime::from_hms_opt(17, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("bad time"))?,
        ..morning
    };
    let lock = lock_slot(
        &services.reservations,
        &services.directory,
        patient_id,
        evening,
    )
    .await?;
    release_slot(&services.reservations, lock.reservation_id).await?;

    // The provider goes on leave; the remaining gateway-paid appointment is
    // cancelled and refunded to the patient wallet.
    let report = handle_provider_leave(
        &services.reservations,
        &services.settlement,
        provider_id,
        date,
        "demo leave",
    )
    .await?;
    info!(
        cancelled = report.cancelled_count,
        refunded = %report.refunded_amount,
        failed = report.failures.len(),
        "provider leave report"
    );

    let ops_router = ops_http::build_router(services.ops_state());
    let listener = tokio::net::TcpListener::bind(&config.app.ops_http_bind_addr).await?;
    info!(addr = %config.app.ops_http_bind_addr, "ops http listening");
    axum::serve(listener, ops_router).await?;
    Ok(())
}
