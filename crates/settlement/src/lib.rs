use booking_domain::{
    Money, PatientId, PrincipalId, ProviderId, ReservationId, RevenueShareBreakdown,
    TransactionDirection, WalletKey,
};
use ledger_store::LedgerRepository;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use wallet_service::{WalletError, WalletService};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid split policy: provider {provider_bps} + platform {platform_bps} bps")]
    InvalidSplitPolicy { provider_bps: u16, platform_bps: u16 },
    #[error("share amount overflow")]
    ShareOverflow,
    #[error("reversal shortfall in {role} wallet: {source}")]
    ReversalShortfall {
        role: &'static str,
        #[source]
        source: WalletError,
    },
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Provider/platform revenue split in basis points. Each share is rounded
/// half-up to a whole minor unit independently of the other; the sum is never
/// corrected toward the total, so non-complementary policies may drift by one
/// minor unit (accepted tolerance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplitPolicy {
    pub provider_share_bps: u16,
    pub platform_share_bps: u16,
}

impl Default for RevenueSplitPolicy {
    fn default() -> Self {
        Self {
            provider_share_bps: 8_000,
            platform_share_bps: 2_000,
        }
    }
}

impl RevenueSplitPolicy {
    pub fn shares_for(&self, total: Money) -> Result<RevenueShareBreakdown, SettlementError> {
        if self.provider_share_bps > 10_000 || self.platform_share_bps > 10_000 {
            return Err(SettlementError::InvalidSplitPolicy {
                provider_bps: self.provider_share_bps,
                platform_bps: self.platform_share_bps,
            });
        }
        Ok(RevenueShareBreakdown {
            provider_amount: share_of(total, self.provider_share_bps)?,
            platform_amount: share_of(total, self.platform_share_bps)?,
        })
    }
}

fn share_of(total: Money, bps: u16) -> Result<Money, SettlementError> {
    let scaled = u128::from(total.as_minor()) * u128::from(bps);
    let rounded = (scaled + 5_000) / 10_000;
    u64::try_from(rounded)
        .map(Money)
        .map_err(|_| SettlementError::ShareOverflow)
}

/// Settlement configuration, injected at construction (no ambient globals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub platform_account: PrincipalId,
    pub policy: RevenueSplitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub shares: RevenueShareBreakdown,
    /// False when every leg had already been applied by an earlier call.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalOutcome {
    pub shares: RevenueShareBreakdown,
    pub refunded: Money,
    pub applied: bool,
}

/// Computes and applies the provider/platform split of a captured payment,
/// and its symmetric reversal. Every leg is individually idempotent: a leg
/// whose transaction (same reservation id, same direction, same wallet)
/// already exists is skipped, so a retry after a partial failure completes
/// only the missing legs.
#[derive(Debug, Clone)]
pub struct RevenueSettlementService<L> {
    wallets: WalletService<L>,
    config: SettlementConfig,
}

impl<L: LedgerRepository + Clone> RevenueSettlementService<L> {
    #[must_use]
    pub fn new(wallets: WalletService<L>, config: SettlementConfig) -> Self {
        Self { wallets, config }
    }

    #[must_use]
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    fn platform_wallet(&self) -> WalletKey {
        WalletKey::platform(self.config.platform_account)
    }

    async fn leg_already_applied(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<bool, SettlementError> {
        let existing = self
            .wallets
            .transactions_for_reservation(key, reservation_id, direction)
            .await?;
        Ok(!existing.is_empty())
    }

    /// Forward settlement: credit the provider and platform shares.
    pub async fn settle(
        &self,
        reservation_id: ReservationId,
        provider_id: ProviderId,
        total: Money,
    ) -> Result<SettlementOutcome, SettlementError> {
        let shares = self.config.policy.shares_for(total)?;
        let provider_wallet = WalletKey::provider(provider_id);
        let platform_wallet = self.platform_wallet();
        self.wallets.ensure_wallet(&provider_wallet).await?;
        self.wallets.ensure_wallet(&platform_wallet).await?;

        let mut applied = false;
        if self
            .leg_already_applied(&provider_wallet, reservation_id, TransactionDirection::Credit)
            .await?
        {
            warn!(%reservation_id, "provider settlement credit already applied, skipping");
        } else {
            self.wallets
                .credit(
                    &provider_wallet,
                    shares.provider_amount,
                    Some(reservation_id),
                    Some(shares),
                    format!("revenue share for appointment {reservation_id}"),
                )
                .await?;
            applied = true;
        }

        if self
            .leg_already_applied(&platform_wallet, reservation_id, TransactionDirection::Credit)
            .await?
        {
            warn!(%reservation_id, "platform settlement credit already applied, skipping");
        } else {
            self.wallets
                .credit(
                    &platform_wallet,
                    shares.platform_amount,
                    Some(reservation_id),
                    Some(shares),
                    format!("platform fee for appointment {reservation_id}"),
                )
                .await?;
            applied = true;
        }

        info!(
            %reservation_id,
            provider_id = %provider_id,
            total = %total,
            provider_share = %shares.provider_amount,
            platform_share = %shares.platform_amount,
            applied,
            "revenue settlement applied"
        );
        Ok(SettlementOutcome { shares, applied })
    }

    /// Reversal: debit both shares back and refund the patient the full
    /// total. A shortfall in the provider or platform wallet is a hard error;
    /// a refund must not create money from nothing.
    pub async fn reverse(
        &self,
        reservation_id: ReservationId,
        provider_id: ProviderId,
        patient_id: PatientId,
        total: Money,
    ) -> Result<ReversalOutcome, SettlementError> {
        let shares = self.config.policy.shares_for(total)?;
        let provider_wallet = WalletKey::provider(provider_id);
        let platform_wallet = self.platform_wallet();
        let patient_wallet = WalletKey::patient(patient_id);
        self.wallets.ensure_wallet(&patient_wallet).await?;

        let mut applied = false;
        if self
            .leg_already_applied(&provider_wallet, reservation_id, TransactionDirection::Debit)
            .await?
        {
            warn!(%reservation_id, "provider reversal debit already applied, skipping");
        } else {
            self.wallets
                .debit(
                    &provider_wallet,
                    shares.provider_amount,
                    Some(reservation_id),
                    Some(shares),
                    format!("revenue share reversal for appointment {reservation_id}"),
                )
                .await
                .map_err(|source| SettlementError::ReversalShortfall {
                    role: "provider",
                    source,
                })?;
            applied = true;
        }

        if self
            .leg_already_applied(&platform_wallet, reservation_id, TransactionDirection::Debit)
            .await?
        {
            warn!(%reservation_id, "platform reversal debit already applied, skipping");
        } else {
            self.wallets
                .debit(
                    &platform_wallet,
                    shares.platform_amount,
                    Some(reservation_id),
                    Some(shares),
                    format!("platform fee reversal for appointment {reservation_id}"),
                )
                .await
                .map_err(|source| SettlementError::ReversalShortfall {
                    role: "platform",
                    source,
                })?;
            applied = true;
        }

        if self
            .leg_already_applied(&patient_wallet, reservation_id, TransactionDirection::Credit)
            .await?
        {
            warn!(%reservation_id, "patient refund credit already applied, skipping");
        } else {
            self.wallets
                .credit(
                    &patient_wallet,
                    total,
                    Some(reservation_id),
                    Some(shares),
                    format!("refund for appointment {reservation_id}"),
                )
                .await?;
            applied = true;
        }

        info!(
            %reservation_id,
            provider_id = %provider_id,
            patient_id = %patient_id,
            refunded = %total,
            applied,
            "revenue settlement reversed"
        );
        Ok(ReversalOutcome {
            shares,
            refunded: total,
            applied,
        })
    }
}
