//! Account repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use pulpo_core::error::{StorageError, StorageResult};
use pulpo_core::models::Account;
use pulpo_core::ports::AccountRepository;

use super::helpers::numeric_to_u128;

/// PostgreSQL implementation of AccountRepository.
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Upsert accounts. `created_at`/`created_by` are only written on first
/// insert; the conflict arm leaves them alone so the creation record is
/// immutable.
pub(crate) async fn insert_accounts(
    conn: &mut PgConnection,
    accounts: &[Account],
) -> StorageResult<()> {
    for account in accounts {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, nonce, free_balance, reserved_balance,
                misc_frozen_balance, fee_frozen_balance, created_at, created_by
            )
            VALUES ($1, $2, $3::NUMERIC, $4::NUMERIC, $5::NUMERIC, $6::NUMERIC, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                nonce = EXCLUDED.nonce,
                free_balance = EXCLUDED.free_balance,
                reserved_balance = EXCLUDED.reserved_balance,
                misc_frozen_balance = EXCLUDED.misc_frozen_balance,
                fee_frozen_balance = EXCLUDED.fee_frozen_balance
            "#,
        )
        .bind(&account.id)
        .bind(account.nonce as i64)
        .bind(account.free_balance.to_string())
        .bind(account.reserved_balance.to_string())
        .bind(account.misc_frozen_balance.to_string())
        .bind(account.fee_frozen_balance.to_string())
        .bind(account.created_at)
        .bind(&account.created_by)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
    }

    Ok(())
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn insert_accounts(&self, accounts: &[Account]) -> StorageResult<()> {
        if accounts.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        insert_accounts(&mut conn, accounts).await
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, nonce,
                   free_balance::TEXT AS free_balance,
                   reserved_balance::TEXT AS reserved_balance,
                   misc_frozen_balance::TEXT AS misc_frozen_balance,
                   fee_frozen_balance::TEXT AS fee_frozen_balance,
                   created_at, created_by
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn save_account(&self, account: &Account) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                nonce = $2,
                free_balance = $3::NUMERIC,
                reserved_balance = $4::NUMERIC,
                misc_frozen_balance = $5::NUMERIC,
                fee_frozen_balance = $6::NUMERIC
            WHERE id = $1
            "#,
        )
        .bind(&account.id)
        .bind(account.nonce as i64)
        .bind(account.free_balance.to_string())
        .bind(account.reserved_balance.to_string())
        .bind(account.misc_frozen_balance.to_string())
        .bind(account.fee_frozen_balance.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// Database row representation for Account.
#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    nonce: i64,
    free_balance: String,
    reserved_balance: String,
    misc_frozen_balance: String,
    fee_frozen_balance: String,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    created_by: Option<String>,
}

impl AccountRow {
    fn into_account(self) -> StorageResult<Account> {
        Ok(Account {
            id: self.id,
            nonce: self.nonce as u64,
            free_balance: numeric_to_u128(self.free_balance, "account.free_balance")?,
            reserved_balance: numeric_to_u128(self.reserved_balance, "account.reserved_balance")?,
            misc_frozen_balance: numeric_to_u128(
                self.misc_frozen_balance,
                "account.misc_frozen_balance",
            )?,
            fee_frozen_balance: numeric_to_u128(
                self.fee_frozen_balance,
                "account.fee_frozen_balance",
            )?,
            created_at: self.created_at,
            created_by: self.created_by,
        })
    }
}
