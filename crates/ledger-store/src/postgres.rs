use async_trait::async_trait;
use booking_domain::{
    LedgerTransaction, Money, ReservationId, RevenueShareBreakdown,
    TransactionDirection, TransactionId, WalletKey,
};
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{LedgerRepository, LedgerStoreError, TransactionInsert};

/// Postgres-backed ledger. Atomicity per wallet comes from single-statement
/// conditional updates: the debit guard is `WHERE balance >= amount`, so the
/// check and the decrement are one write.
#[derive(Debug, Clone)]
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: impl std::fmt::Display) -> LedgerStoreError {
    LedgerStoreError::Database(e.to_string())
}

fn money_to_bigint(amount: Money) -> Result<i64, LedgerStoreError> {
    i64::try_from(amount.as_minor()).map_err(|_| LedgerStoreError::BalanceOverflow)
}

fn bigint_to_money(value: i64) -> Result<Money, LedgerStoreError> {
    u64::try_from(value)
        .map(Money)
        .map_err(|_| LedgerStoreError::Database(format!("negative ledger amount {value}")))
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<LedgerTransaction, LedgerStoreError> {
    let direction = match row.try_get::<&str, _>("direction").map_err(db_err)? {
        "credit" => TransactionDirection::Credit,
        "debit" => TransactionDirection::Debit,
        other => {
            return Err(LedgerStoreError::Database(format!(
                "unknown transaction direction {other}"
            )));
        }
    };
    let provider_share = row
        .try_get::<Option<i64>, _>("provider_share")
        .map_err(db_err)?;
    let platform_share = row
        .try_get::<Option<i64>, _>("platform_share")
        .map_err(db_err)?;
    let revenue_share = match (provider_share, platform_share) {
        (Some(provider), Some(platform)) => Some(RevenueShareBreakdown {
            provider_amount: bigint_to_money(provider)?,
            platform_amount: bigint_to_money(platform)?,
        }),
        _ => None,
    };
    Ok(LedgerTransaction {
        transaction_id: TransactionId(row.try_get::<Uuid, _>("transaction_id").map_err(db_err)?),
        direction,
        amount: bigint_to_money(row.try_get("amount").map_err(db_err)?)?,
        description: row.try_get("description").map_err(db_err)?,
        related_reservation_id: row
            .try_get::<Option<Uuid>, _>("related_reservation_id")
            .map_err(db_err)?
            .map(ReservationId),
        revenue_share,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}


impl PostgresLedgerRepository {
    async fn insert_transaction_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        key: &WalletKey,
        transaction: &LedgerTransaction,
    ) -> Result<(), LedgerStoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (
                transaction_id, principal_id, role, direction, amount, description,
                related_reservation_id, provider_share, platform_share, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.transaction_id.0)
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .bind(transaction.direction.as_str())
        .bind(money_to_bigint(transaction.amount)?)
        .bind(&transaction.description)
        .bind(transaction.related_reservation_id.map(|id| id.0))
        .bind(
            transaction
                .revenue_share
                .map(|share| money_to_bigint(share.provider_amount))
                .transpose()?,
        )
        .bind(
            transaction
                .revenue_share
                .map(|share| money_to_bigint(share.platform_amount))
                .transpose()?,
        )
        .bind(transaction.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn ensure_account(&self, key: &WalletKey) -> Result<(), LedgerStoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (principal_id, role, balance, created_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (principal_id, role) DO NOTHING
            "#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn apply_credit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        let transaction = LedgerTransaction {
            transaction_id: TransactionId::new(),
            direction: TransactionDirection::Credit,
            amount: insert.amount,
            description: insert.description,
            related_reservation_id: insert.related_reservation_id,
            revenue_share: insert.revenue_share,
            created_at: Utc::now(),
        };
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let updated = sqlx::query(
            r#"
            UPDATE wallets SET balance = balance + $3
            WHERE principal_id = $1 AND role = $2
            "#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .bind(money_to_bigint(transaction.amount)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerStoreError::AccountNotFound);
        }
        Self::insert_transaction_row(&mut tx, key, &transaction).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(transaction)
    }

    async fn apply_debit(
        &self,
        key: &WalletKey,
        insert: TransactionInsert,
    ) -> Result<LedgerTransaction, LedgerStoreError> {
        let transaction = LedgerTransaction {
            transaction_id: TransactionId::new(),
            direction: TransactionDirection::Debit,
            amount: insert.amount,
            description: insert.description,
            related_reservation_id: insert.related_reservation_id,
            revenue_share: insert.revenue_share,
            created_at: Utc::now(),
        };
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let updated = sqlx::query(
            r#"
            UPDATE wallets SET balance = balance - $3
            WHERE principal_id = $1 AND role = $2 AND balance >= $3
            "#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .bind(money_to_bigint(transaction.amount)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            let available = self.balance(key).await?;
            return Err(LedgerStoreError::InsufficientBalance {
                requested: transaction.amount,
                available,
            });
        }
        Self::insert_transaction_row(&mut tx, key, &transaction).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(transaction)
    }

    async fn balance(&self, key: &WalletKey) -> Result<Money, LedgerStoreError> {
        let row = sqlx::query(
            r#"SELECT balance FROM wallets WHERE principal_id = $1 AND role = $2"#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(LedgerStoreError::AccountNotFound)?;
        bigint_to_money(row.try_get("balance").map_err(db_err)?)
    }

    async fn transactions(
        &self,
        key: &WalletKey,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        self.balance(key).await?;
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, direction, amount, description,
                   related_reservation_id, provider_share, platform_share, created_at
            FROM wallet_transactions
            WHERE principal_id = $1 AND role = $2
            ORDER BY created_at ASC, transaction_id ASC
            "#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn transactions_for_reservation(
        &self,
        key: &WalletKey,
        reservation_id: ReservationId,
        direction: TransactionDirection,
    ) -> Result<Vec<LedgerTransaction>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, direction, amount, description,
                   related_reservation_id, provider_share, platform_share, created_at
            FROM wallet_transactions
            WHERE principal_id = $1 AND role = $2
              AND related_reservation_id = $3 AND direction = $4
            ORDER BY created_at ASC, transaction_id ASC
            "#,
        )
        .bind(key.principal_id.0)
        .bind(key.role.as_str())
        .bind(reservation_id.0)
        .bind(direction.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_transaction).collect()
    }
}
