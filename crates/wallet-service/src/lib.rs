use booking_domain::{
    LedgerTransaction, Money, ReservationId, RevenueShareBreakdown, TransactionDirection,
    WalletKey,
};
use chrono::{DateTime, Utc};
use ledger_store::{LedgerRepository, LedgerStoreError, TransactionInsert};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet not found")]
    NotFound,
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },
    #[error("transaction amount must be positive")]
    InvalidAmount,
    #[error("ledger store error: {0}")]
    Store(LedgerStoreError),
}

impl From<LedgerStoreError> for WalletError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::AccountNotFound => Self::NotFound,
            LedgerStoreError::InsufficientBalance {
                requested,
                available,
            } => Self::InsufficientBalance {
                requested,
                available,
            },
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionQuery {
    /// 1-based page index.
    pub page: u32,
    pub page_size: u32,
    pub direction: Option<TransactionDirection>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            direction: None,
            from: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub items: Vec<LedgerTransaction>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: usize,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDetails {
    pub key: WalletKey,
    pub balance: Money,
    pub recent_transactions: Vec<LedgerTransaction>,
}

/// Wraps the ledger store with amount validation and read conveniences. All
/// atomicity guarantees live in the repository; this layer never splits a
/// balance mutation from its log append.
#[derive(Debug, Clone)]
pub struct WalletService<L> {
    ledger: L,
}

impl<L: LedgerRepository + Clone> WalletService<L> {
    #[must_use]
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn ensure_wallet(&self, key: &WalletKey) -> Result<(), WalletError> {
        self.ledger.ensure_account(key).await?;
        Ok(())
    }

    pub async fn credit(
        &self,
        key: &WalletKey,
        amount: Money,
        related_reservation_id: Option<ReservationId>,
        revenue_share: Option<RevenueShareBreakdown>,
        description: impl Into<String>,
    ) -> Result<LedgerTransaction, WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }
        let transaction = self
            .ledger
            .apply_credit(
                key,
                TransactionInsert {
                    amount,
                    description: description.into(),
                    related_reservation_id,
                    revenue_share,
                },
            )
            .await?;
        debug!(
            principal_id = %key.principal_id,
            role = key.role.as_str(),
            amount = %amount,
            "wallet credited"
        );
        Ok(transaction)
    }

    pub async fn debit(
        &self,
        key: &WalletKey,
        amount: Money,
        related_reservation_id: Option<ReservationId>,
        revenue_share: Option<RevenueShareBreakdown>,
        description: impl Into<String>,
    ) -> Result<LedgerTransaction, WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }
        let transaction = self
            .ledger
            .apply_debit(
                key,
                TransactionInsert {
                    amount,
                    description: description.into(),
                    related_reservation_id,
                    revenue_share,
                },
            )
            .await?;
        debug!(
            principal_id = %key.principal_id,
            role = key.role.as_str(),
            amount = %amount,
            "wallet debited"
        );
        Ok(transaction)
    }

    pub async fn balance(&self, key: &WalletKey) -> Result<Money, WalletError> {
        Ok(self.ledger.balance(key).await?)
    }

    /// Paged, filtered view over the transaction log. Filtering operates on
    /// the log itself, never on the running balance.
    pub async fn transactions(
        &self,
        key: &WalletKey,
        query: TransactionQuery,
    ) -> Result<TransactionPage, WalletError> {
        let page = query.page.max(1);
        let page_size = query.page_size.max(1);
        let mut items: Vec<LedgerTransaction> = self
            .ledger
            .transactions(key)
            .await?
            .into_iter()
            .filter(|tx| {
                query.direction.is_none_or(|d| tx.direction == d)
                    && query.from.is_none_or(|from| tx.created_at >= from)
                    && query.to.is_none_or(|to| tx.created_at <= to)
            })
            .collect();
        // Most recent first for the read surface.
        items.reverse();

        let total_items = items.len();
        let total_pages = (total_items as u32).div_ceil(page_size).max(1);
        let offset = ((page - 1) as usize).saturating_mul(page_size as usize);
        let items = items
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok(TransactionPage {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        })
    }

    pub async fn wallet_details(
        &self,
        key: &WalletKey,
        recent_limit: usize,
    ) -> Result<WalletDetails, WalletError> {
        let balance = self.balance(key).await?;
        let mut transactions = self.ledger.transactions(key).await?;
        transactions.reverse();
        transactions.truncate(recent_limit);
        Ok(WalletDetails {
            key: *key,
            balance,
            recent_transactions: transactions,
        })
    }

    /// Settlement idempotency probe (see the settlement service).
    pub async fn transactions_for_reservation(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<Vec<LedgerTransaction>, WalletError> {
        Ok(self
            .ledger
            .transactions_for_reservation(key, reservation_id, direction)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use booking_domain::{PrincipalId, PrincipalRole};
    use ledger_store::InMemoryLedgerRepository;

    use super::*;

    fn service() -> WalletService<InMemoryLedgerRepository> {
        WalletService::new(InMemoryLedgerRepository::new())
    }

    fn wallet() -> WalletKey {
        WalletKey::new(PrincipalId::new(), PrincipalRole::Patient)
    }

    #[tokio::test]
    async fn zero_amount_mutations_are_rejected() {
        let service = service();
        let key = wallet();
        service.ensure_wallet(&key).await.expect("ensure");
        assert!(matches!(
            service.credit(&key, Money::ZERO, None, None, "noop").await,
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            service.debit(&key, Money::ZERO, None, None, "noop").await,
            Err(WalletError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn debit_beyond_balance_is_insufficient_balance() {
        let service = service();
        let key = wallet();
        service.ensure_wallet(&key).await.expect("ensure");
        service
            .credit(&key, Money(5_000), None, None, "top-up")
            .await
            .expect("credit");
        let err = service
            .debit(&key, Money(5_001), None, None, "too much")
            .await
            .expect_err("overdraft");
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        assert_eq!(service.balance(&key).await.expect("balance"), Money(5_000));
    }

    #[tokio::test]
    async fn unknown_wallet_reads_are_not_found() {
        let service = service();
        let err = service.balance(&wallet()).await.expect_err("missing");
        assert!(matches!(err, WalletError::NotFound));
    }

    #[tokio::test]
    async fn transactions_are_paged_most_recent_first() {
        let service = service();
        let key = wallet();
        service.ensure_wallet(&key).await.expect("ensure");
        for i in 1..=5 {
            service
                .credit(&key, Money(i), None, None, format!("credit {i}"))
                .await
                .expect("credit");
        }

        let page = service
            .transactions(
                &key,
                TransactionQuery {
                    page: 1,
                    page_size: 2,
                    ..TransactionQuery::default()
                },
            )
            .await
            .expect("page");
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].amount, Money(5));
        assert_eq!(page.items[1].amount, Money(4));

        let last = service
            .transactions(
                &key,
                TransactionQuery {
                    page: 3,
                    page_size: 2,
                    ..TransactionQuery::default()
                },
            )
            .await
            .expect("page");
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].amount, Money(1));
    }

    #[tokio::test]
    async fn transactions_filter_by_direction() {
        let service = service();
        let key = wallet();
        service.ensure_wallet(&key).await.expect("ensure");
        service
            .credit(&key, Money(100), None, None, "credit")
            .await
            .expect("credit");
        service
            .debit(&key, Money(40), None, None, "debit")
            .await
            .expect("debit");

        let debits = service
            .transactions(
                &key,
                TransactionQuery {
                    direction: Some(TransactionDirection::Debit),
                    ..TransactionQuery::default()
                },
            )
            .await
            .expect("page");
        assert_eq!(debits.total_items, 1);
        assert_eq!(debits.items[0].amount, Money(40));
    }

    #[tokio::test]
    async fn wallet_details_carries_balance_and_recent_log() {
        let service = service();
        let key = wallet();
        service.ensure_wallet(&key).await.expect("ensure");
        for i in 1..=4 {
            service
                .credit(&key, Money(i * 10), None, None, "credit")
                .await
                .expect("credit");
        }
        let details = service.wallet_details(&key, 2).await.expect("details");
        assert_eq!(details.balance, Money(100));
        assert_eq!(details.recent_transactions.len(), 2);
        assert_eq!(details.recent_transactions[0].amount, Money(40));
    }
}
