use std::sync::Arc;

use booking_domain::PrincipalId;
use chrono::Duration;
use ledger_store::{InMemoryLedgerRepository, LedgerRepository};
use ops_http::OpsState;
use payment_gateway::{InMemoryPaymentGateway, PaymentGateway, RestPaymentGateway};
use platform_core::{AppConfig, AppEnv};
use reservation_engine::{
    InMemoryReservationRepository, ReservationConfig, ReservationEngine, ReservationRepository,
};
use settlement::{RevenueSettlementService, RevenueSplitPolicy, SettlementConfig};
use wallet_service::WalletService;

use crate::directory_port::InMemoryDirectory;

/// Every service constructed once from config, all sharing the same stores.
pub struct Services {
    pub wallets: WalletService<Arc<dyn LedgerRepository>>,
    pub reservations: ReservationEngine<Arc<dyn ReservationRepository>>,
    pub settlement: RevenueSettlementService<Arc<dyn LedgerRepository>>,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Concrete handle to the simulated provider side; absent in prod.
    pub demo_gateway: Option<InMemoryPaymentGateway>,
    pub directory: InMemoryDirectory,
}

impl Services {
    #[must_use]
    pub fn ops_state(&self) -> OpsState {
        OpsState {
            wallets: self.wallets.clone(),
            reservations: self.reservations.clone(),
        }
    }
}

#[must_use]
pub fn build_services(config: &AppConfig) -> Services {
    let ledger: Arc<dyn LedgerRepository> = Arc::new(InMemoryLedgerRepository::new());
    let reservation_repo: Arc<dyn ReservationRepository> =
        Arc::new(InMemoryReservationRepository::new());

    let wallets = WalletService::new(ledger);
    let reservations = ReservationEngine::new(
        reservation_repo,
        ReservationConfig {
            lock_ttl: Duration::minutes(config.booking.lock_ttl_minutes),
        },
    );
    let settlement = RevenueSettlementService::new(
        wallets.clone(),
        SettlementConfig {
            platform_account: PrincipalId(config.booking.platform_account_id),
            policy: RevenueSplitPolicy {
                provider_share_bps: config.booking.provider_share_bps,
                platform_share_bps: config.booking.platform_share_bps,
            },
        },
    );

    // Outside prod the provider side is simulated in process.
    let (gateway, demo_gateway): (Arc<dyn PaymentGateway>, Option<InMemoryPaymentGateway>) =
        match config.app.env {
            AppEnv::Prod => (
                Arc::new(RestPaymentGateway::new(
                    config.gateway.endpoint.clone(),
                    config.gateway.key_id.clone(),
                    config.gateway.key_secret.clone(),
                )),
                None,
            ),
            _ => {
                let demo = InMemoryPaymentGateway::new();
                (Arc::new(demo.clone()), Some(demo))
            }
        };

    Services {
        wallets,
        reservations,
        settlement,
        gateway,
        demo_gateway,
        directory: InMemoryDirectory::new(),
    }
}
