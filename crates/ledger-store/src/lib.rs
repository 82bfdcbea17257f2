use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use booking_domain::{
    LedgerTransaction, Money, ReservationId, RevenueShareBreakdown, TransactionDirection,
    TransactionId, WalletKey,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod postgres;

pub use postgres::PostgresLedgerRepository;

#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error("wallet account not found")]
    AccountNotFound,
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },
    #[error("balance overflow")]
    BalanceOverflow,
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Database(String),
}

/// Fields the caller supplies for one ledger entry; the store assigns the
/// transaction id and timestamp at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInsert {
    pub amount: Money,
    pub description: String,
    pub related_reservation_id: Option<ReservationId>,
    pub revenue_share: Option<RevenueShareBreakdown>,
}

impl TransactionInsert {
    fn into_transaction(self, direction: TransactionDirection) -> LedgerTransaction {
        LedgerTransaction {
            transaction_id: TransactionId::new(),
            direction,
            amount: self.amount,
            description: self.description,
            related_reservation_id: self.related_reservation_id,
            revenue_share: self.revenue_share,
            created_at: Utc::now(),
        }
    }
}

/// Durable per-principal account: balance plus append-only transaction log.
///
/// Every method is atomic per wallet. `apply_debit` is a single guarded
/// decrement: the balance check and the mutation happen inside one critical
/// section, so two concurrent debits can never both pass a stale check.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Upsert semantics: concurrent creators converge on exactly one account.
    async fn ensure_account(&self, key: &WalletKey) -> Result<(), LedgerStoreError>;

    async fn apply_credit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError>;

    /// Fails closed when `balance < amount`: no transaction is appended and
    /// the balance is untouched.
    async fn apply_debit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError>;

    async fn balance(&self, key: &WalletKey) -> Result<Money, LedgerStoreError>;

    /// Full log in chronological (insertion) order.
    async fn transactions(&self, key: &WalletKey)
        -> Result<Vec<LedgerTransaction>, LedgerStoreError>;

    /// Idempotency probe: entries in this wallet tagged with the reservation
    /// id and direction.
    async fn transactions_for_reservation(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError>;
}

#[async_trait]
impl<L: LedgerRepository + ?Sized> LedgerRepository for Arc<L> {
    async fn ensure_account(&self, key: &WalletKey) -> Result<(), LedgerStoreError> {
        (**self).ensure_account(key).await
    }

    async fn apply_credit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        (**self).apply_credit(key, insert).await
    }

    async fn apply_debit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        (**self).apply_debit(key, insert).await
    }

    async fn balance(&self, key: &WalletKey) -> Result<Money, LedgerStoreError> {
        (**self).balance(key).await
    }

    async fn transactions(
        &self,
        key: &WalletKey,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        (**self).transactions(key).await
    }

    async fn transactions_for_reservation(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        (**self)
            .transactions_for_reservation(key, reservation_id, direction)
            .await
    }
}

#[derive(Debug, Clone, Default)]
struct WalletAccount {
    balance: Money,
    transactions: Vec<LedgerTransaction>,
}

/// Single-instance store: the map mutex is the per-wallet critical section.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerRepository {
    accounts: Arc<Mutex<HashMap<WalletKey, WalletAccount>>>,
}

impl InMemoryLedgerRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/ops helper: all accounts with balances.
    pub fn balances_snapshot(&self) -> HashMap<WalletKey, Money> {
        self.accounts
            .lock()
            .map(|guard| guard.iter().map(|(k, v)| (*k, v.balance)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn ensure_account(&self, key: &WalletKey) -> Result<(), LedgerStoreError> {
        self.accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?
            .entry(*key)
            .or_default();
        Ok(())
    }

    async fn apply_credit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        let mut guard = self
            .accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?;
        let account = guard.get_mut(key).ok_or(LedgerStoreError::AccountNotFound)?;
        let next_balance = account
            .balance
            .checked_add(insert.amount)
            .map_err(|_| LedgerStoreError::BalanceOverflow)?;
        let transaction = insert.into_transaction(TransactionDirection::Credit);
        account.transactions.push(transaction.clone());
        account.balance = next_balance;
        Ok(transaction)
    }

    async fn apply_debit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        let mut guard = self
            .accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?;
        let account = guard.get_mut(key).ok_or(LedgerStoreError::AccountNotFound)?;
        let next_balance = account.balance.checked_sub(insert.amount).map_err(|_| {
            LedgerStoreError::InsufficientBalance {
                requested: insert.amount,
                available: account.balance,
            }
        })?;
        let transaction = insert.into_transaction(TransactionDirection::Debit);
        account.transactions.push(transaction.clone());
        account.balance = next_balance;
        Ok(transaction)
    }

    async fn balance(&self, key: &WalletKey) -> Result<Money, LedgerStoreError> {
        let guard = self
            .accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?;
        guard
            .get(key)
            .map(|account| account.balance)
            .ok_or(LedgerStoreError::AccountNotFound)
    }

    async fn transactions(
        &self,
        key: &WalletKey,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        let guard = self
            .accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?;
        guard
            .get(key)
            .map(|account| account.transactions.clone())
            .ok_or(LedgerStoreError::AccountNotFound)
    }

    async fn transactions_for_reservation(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        let guard = self
            .accounts
            .lock()
            .map_err(|_| LedgerStoreError::LockPoisoned)?;
        let account = guard.get(key).ok_or(LedgerStoreError::AccountNotFound)?;
        Ok(account
            .transactions
            .iter()
            .filter(|tx| {
                tx.related_reservation_id == Some(reservation_id) && tx.direction == direction
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use booking_domain::{PrincipalId, PrincipalRole, TransactionDirection};

    use super::*;

    fn wallet() -> WalletKey {
        WalletKey::new(PrincipalId::new(), PrincipalRole::Patient)
    }

    fn insert(amount: u64) -> TransactionInsert {
        TransactionInsert {
            amount: Money(amount),
            description: "test".to_string(),
            related_reservation_id: None,
            revenue_share: None,
        }
    }

    #[tokio::test]
    async fn ensure_account_is_idempotent_and_preserves_balance() {
        let repo = InMemoryLedgerRepository::new();
        let key = wallet();
        repo.ensure_account(&key).await.expect("create");
        repo.apply_credit(&key, insert(150)).await.expect("credit");
        repo.ensure_account(&key).await.expect("re-create");
        assert_eq!(repo.balance(&key).await.expect("balance"), Money(150));
    }

    #[tokio::test]
    async fn balance_equals_signed_sum_of_log() {
        let repo = InMemoryLedgerRepository::new();
        let key = wallet();
        repo.ensure_account(&key).await.expect("create");
        repo.apply_credit(&key, insert(500)).await.expect("credit");
        repo.apply_debit(&key, insert(120)).await.expect("debit");
        repo.apply_credit(&key, insert(30)).await.expect("credit");

        let log = repo.transactions(&key).await.expect("log");
        let signed_sum = log.iter().fold(0_i64, |acc, tx| match tx.direction {
            TransactionDirection::Credit => acc + tx.amount.as_minor() as i64,
            TransactionDirection::Debit => acc - tx.amount.as_minor() as i64,
        });
        assert_eq!(signed_sum, 410);
        assert_eq!(repo.balance(&key).await.expect("balance"), Money(410));
    }

    #[tokio::test]
    async fn overdraft_debit_fails_and_appends_nothing() {
        let repo = InMemoryLedgerRepository::new();
        let key = wallet();
        repo.ensure_account(&key).await.expect("create");
        repo.apply_credit(&key, insert(100)).await.expect("credit");

        let err = repo
            .apply_debit(&key, insert(101))
            .await
            .expect_err("overdraft");
        assert!(matches!(
            err,
            LedgerStoreError::InsufficientBalance {
                requested: Money(101),
                available: Money(100),
            }
        ));
        assert_eq!(repo.balance(&key).await.expect("balance"), Money(100));
        assert_eq!(repo.transactions(&key).await.expect("log").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let repo = InMemoryLedgerRepository::new();
        let key = wallet();
        repo.ensure_account(&key).await.expect("create");
        repo.apply_credit(&key, insert(100)).await.expect("credit");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.apply_debit(&key, insert(60)).await.is_ok()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.expect("join") {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "only one debit of 60 fits in 100");
        assert_eq!(repo.balance(&key).await.expect("balance"), Money(40));
    }

    #[tokio::test]
    async fn reservation_probe_filters_by_id_and_direction() {
        let repo = InMemoryLedgerRepository::new();
        let key = wallet();
        repo.ensure_account(&key).await.expect("create");
        let reservation_id = ReservationId::new();
        repo.apply_credit(
            &key,
            TransactionInsert {
                amount: Money(400),
                description: "settlement".to_string(),
                related_reservation_id: Some(reservation_id),
                revenue_share: None,
            },
        )
        .await
        .expect("credit");
        repo.apply_credit(&key, insert(5)).await.expect("untagged");

        let credits = repo
            .transactions_for_reservation(&key, reservation_id, TransactionDirection::Credit)
            .await
            .expect("probe");
        assert_eq!(credits.len(), 1);
        let debits = repo
            .transactions_for_reservation(&key, reservation_id, TransactionDirection::Debit)
            .await
            .expect("probe");
        assert!(debits.is_empty());
    }
}
