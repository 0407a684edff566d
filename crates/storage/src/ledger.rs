// PostgreSQL credit ledger
//
// debit_one runs in one transaction:
//   1. INSERT the job's charge marker (ON CONFLICT DO NOTHING)
//   2. no row inserted → the job was charged before; report the balance
//   3. otherwise a conditional UPDATE decrements iff credits_remaining > 0
//   4. no row updated → roll back the marker and reject
//
// Concurrent debits for one user serialize on the account row; concurrent
// debits for one job serialize on the marker's primary key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use timeglow_core::{CreditAccount, CreditLedger, CreditPolicy, DebitOutcome, LedgerError};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::CreditAccountRow;
use crate::postgres::{db_error, PgStore};

/// Postgres foreign_key_violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// [`PgStore`] paired with the grant policy used for new accounts and topups
#[derive(Clone)]
pub struct PgCreditLedger {
    store: PgStore,
    policy: CreditPolicy,
}

impl PgCreditLedger {
    pub fn new(store: PgStore, policy: CreditPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CreditPolicy {
        &self.policy
    }
}

fn ledger_db_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Store(db_error(e))
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn balance(&self, user_id: &str) -> Result<Option<CreditAccount>, LedgerError> {
        let row = sqlx::query_as::<_, CreditAccountRow>(
            r#"
            SELECT user_id, credits_remaining, reset_at, total_processed
            FROM credit_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.store.pool)
        .await
        .map_err(ledger_db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn debit_one(&self, user_id: &str, job_id: Uuid) -> Result<DebitOutcome, LedgerError> {
        let mut tx = self.store.pool.begin().await.map_err(ledger_db_error)?;

        let marker = sqlx::query(
            r#"
            INSERT INTO credit_charges (job_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await;

        let marker = match marker {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
            {
                return Err(LedgerError::AccountNotFound(user_id.to_string()));
            }
            Err(e) => return Err(ledger_db_error(e)),
        };

        if marker.rows_affected() == 0 {
            tx.rollback().await.map_err(ledger_db_error)?;
            let account = self
                .balance(user_id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))?;
            debug!(%job_id, "job already charged");
            return Ok(DebitOutcome::AlreadyCharged {
                credits_remaining: account.credits_remaining,
            });
        }

        let remaining = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE credit_accounts
            SET credits_remaining = credits_remaining - 1,
                total_processed = total_processed + 1,
                updated_at = NOW()
            WHERE user_id = $1 AND credits_remaining > 0
            RETURNING credits_remaining
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ledger_db_error)?;

        match remaining {
            Some(credits_remaining) => {
                tx.commit().await.map_err(ledger_db_error)?;
                info!(%job_id, credits_remaining, "credit debited");
                Ok(DebitOutcome::Charged { credits_remaining })
            }
            None => {
                tx.rollback().await.map_err(ledger_db_error)?;
                Err(LedgerError::InsufficientCredit {
                    user_id: user_id.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn open_account(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditAccount, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, credits_remaining, reset_at, total_processed)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.policy.credits_per_period)
        .bind(self.policy.reset_at(now))
        .execute(&self.store.pool)
        .await
        .map_err(ledger_db_error)?;

        self.balance(user_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    #[instrument(skip(self))]
    async fn topup(&self, user_id: &str, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError> {
        let row = sqlx::query_as::<_, CreditAccountRow>(
            r#"
            INSERT INTO credit_accounts (user_id, credits_remaining, reset_at, total_processed)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id) DO UPDATE
            SET credits_remaining = EXCLUDED.credits_remaining,
                reset_at = EXCLUDED.reset_at,
                updated_at = NOW()
            RETURNING user_id, credits_remaining, reset_at, total_processed
            "#,
        )
        .bind(user_id)
        .bind(self.policy.credits_per_period)
        .bind(self.policy.reset_at(now))
        .fetch_one(&self.store.pool)
        .await
        .map_err(ledger_db_error)?;

        info!(credits = row.credits_remaining, "credits topped up");
        Ok(row.into())
    }
}
