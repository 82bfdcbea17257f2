//! Operational read surface: wallet balances, transaction history, and
//! reservation lookups over HTTP. Write paths stay in the checkout flows.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use booking_domain::{
    Money, PrincipalId, PrincipalRole, ProviderId, ReservationId, ReservationRecord,
    TransactionDirection, WalletKey,
};
use chrono::NaiveDate;
use ledger_store::LedgerRepository;
use platform_core::{ErrorCode, ResponseEnvelope};
use reservation_engine::{ReservationEngine, ReservationError, ReservationRepository};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use wallet_service::{TransactionPage, TransactionQuery, WalletDetails, WalletError, WalletService};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletBalanceResponse {
    pub principal_id: PrincipalId,
    pub role: PrincipalRole,
    pub balance: Money,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransactionQueryParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub direction: Option<TransactionDirection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderDayResponse {
    pub provider_id: ProviderId,
    pub date: NaiveDate,
    pub reservations: Vec<ReservationRecord>,
}

#[derive(Clone)]
pub struct OpsState {
    pub wallets: WalletService<Arc<dyn LedgerRepository>>,
    pub reservations: ReservationEngine<Arc<dyn ReservationRepository>>,
}

impl std::fmt::Debug for OpsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsState").finish_non_exhaustive()
    }
}

pub fn build_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/wallets/{principal_id}/{role}", get(wallet_details))
        .route("/wallets/{principal_id}/{role}/balance", get(wallet_balance))
        .route(
            "/wallets/{principal_id}/{role}/transactions",
            get(wallet_transactions),
        )
        .route("/reservations/{id}", get(reservation))
        .route(
            "/providers/{id}/reservations/{date}",
            get(provider_reservations),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    info!(route = "/health", "ops http request");
    Json(HealthResponse {
        ok: true,
        service: "ops-http",
    })
}

fn parse_wallet_key(principal_id: &str, role: &str) -> Result<WalletKey, &'static str> {
    let principal_id = Uuid::parse_str(principal_id)
        .map(PrincipalId)
        .map_err(|_| "principal id must be a uuid")?;
    let role =
        PrincipalRole::from_str(role).map_err(|_| "role must be patient, provider or platform")?;
    Ok(WalletKey::new(principal_id, role))
}

fn wallet_error_envelope<T>(err: &WalletError) -> ResponseEnvelope<T> {
    match err {
        WalletError::NotFound => ResponseEnvelope::err(ErrorCode::WalletNotFound, err.to_string()),
        WalletError::InsufficientBalance { .. } => {
            ResponseEnvelope::err(ErrorCode::InsufficientBalance, err.to_string())
        }
        WalletError::InvalidAmount => {
            ResponseEnvelope::err(ErrorCode::RequestInvalid, err.to_string())
        }
        WalletError::Store(_) => ResponseEnvelope::err(ErrorCode::InternalError, err.to_string()),
    }
}

async fn wallet_balance(
    State(state): State<OpsState>,
    Path((principal_id, role)): Path<(String, String)>,
) -> Json<ResponseEnvelope<WalletBalanceResponse>> {
    info!(route = "/wallets/:principal_id/:role/balance", principal_id = %principal_id, "ops http request");
    let key = match parse_wallet_key(&principal_id, &role) {
        Ok(key) => key,
        Err(message) => return Json(ResponseEnvelope::err(ErrorCode::RequestInvalid, message)),
    };
    match state.wallets.balance(&key).await {
        Ok(balance) => Json(ResponseEnvelope::ok(WalletBalanceResponse {
            principal_id: key.principal_id,
            role: key.role,
            balance,
        })),
        Err(err) => Json(wallet_error_envelope(&err)),
    }
}

async fn wallet_details(
    State(state): State<OpsState>,
    Path((principal_id, role)): Path<(String, String)>,
) -> Json<ResponseEnvelope<WalletDetails>> {
    info!(route = "/wallets/:principal_id/:role", principal_id = %principal_id, "ops http request");
    let key = match parse_wallet_key(&principal_id, &role) {
        Ok(key) => key,
        Err(message) => return Json(ResponseEnvelope::err(ErrorCode::RequestInvalid, message)),
    };
    match state.wallets.wallet_details(&key, 10).await {
        Ok(details) => Json(ResponseEnvelope::ok(details)),
        Err(err) => Json(wallet_error_envelope(&err)),
    }
}

async fn wallet_transactions(
    State(state): State<OpsState>,
    Path((principal_id, role)): Path<(String, String)>,
    Query(params): Query<TransactionQueryParams>,
) -> Json<ResponseEnvelope<TransactionPage>> {
    info!(
        route = "/wallets/:principal_id/:role/transactions",
        principal_id = %principal_id,
        "ops http request"
    );
    let key = match parse_wallet_key(&principal_id, &role) {
        Ok(key) => key,
        Err(message) => return Json(ResponseEnvelope::err(ErrorCode::RequestInvalid, message)),
    };
    let defaults = TransactionQuery::default();
    let query = TransactionQuery {
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
        direction: params.direction,
        ..defaults
    };
    match state.wallets.transactions(&key, query).await {
        Ok(page) => Json(ResponseEnvelope::ok(page)),
        Err(err) => Json(wallet_error_envelope(&err)),
    }
}

async fn reservation(
    State(state): State<OpsState>,
    Path(id): Path<String>,
) -> Json<ResponseEnvelope<ReservationRecord>> {
    info!(route = "/reservations/:id", reservation_id = %id, "ops http request");
    let Ok(reservation_id) = Uuid::parse_str(&id).map(ReservationId) else {
        return Json(ResponseEnvelope::err(
            ErrorCode::RequestInvalid,
            "reservation id must be a uuid",
        ));
    };
    match state.reservations.get(reservation_id).await {
        Ok(record) => Json(ResponseEnvelope::ok(record)),
        Err(ReservationError::NotFound) => Json(ResponseEnvelope::err(
            ErrorCode::ReservationNotFound,
            "reservation not found",
        )),
        Err(err) => Json(ResponseEnvelope::err(
            ErrorCode::InternalError,
            err.to_string(),
        )),
    }
}

async fn provider_reservations(
    State(state): State<OpsState>,
    Path((id, date)): Path<(String, String)>,
) -> Json<ResponseEnvelope<ProviderDayResponse>> {
    info!(route = "/providers/:id/reservations/:date", provider_id = %id, "ops http request");
    let Ok(provider_id) = Uuid::parse_str(&id).map(ProviderId) else {
        return Json(ResponseEnvelope::err(
            ErrorCode::RequestInvalid,
            "provider id must be a uuid",
        ));
    };
    let Ok(date) = NaiveDate::from_str(&date) else {
        return Json(ResponseEnvelope::err(
            ErrorCode::RequestInvalid,
            "date must be YYYY-MM-DD",
        ));
    };
    match state
        .reservations
        .active_for_provider_date(provider_id, date)
        .await
    {
        Ok(reservations) => Json(ResponseEnvelope::ok(ProviderDayResponse {
            provider_id,
            date,
            reservations,
        })),
        Err(err) => Json(ResponseEnvelope::err(
            ErrorCode::InternalError,
            err.to_string(),
        )),
    }
}
