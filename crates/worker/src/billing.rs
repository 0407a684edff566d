// Billing collaborator events
//
// Topups and account openings come from outside the pipeline; the ledger
// only applies them.

use std::sync::Arc;

use chrono::Utc;
use timeglow_core::{AccountOpened, BillingTopup, CreditAccount, CreditLedger, LedgerError};
use tracing::{info, instrument};

pub struct BillingHandler {
    ledger: Arc<dyn CreditLedger>,
}

impl BillingHandler {
    pub fn new(ledger: Arc<dyn CreditLedger>) -> Self {
        Self { ledger }
    }

    /// Refill to a full grant and push the reset date one period out
    #[instrument(skip(self, event), fields(user_id = %event.user_id))]
    pub async fn topup(&self, event: &BillingTopup) -> Result<CreditAccount, LedgerError> {
        let account = self.ledger.topup(&event.user_id, Utc::now()).await?;
        info!(
            credits_remaining = account.credits_remaining,
            reset_at = %account.reset_at,
            "credits topped up"
        );
        Ok(account)
    }

    #[instrument(skip(self, event), fields(user_id = %event.user_id))]
    pub async fn open_account(&self, event: &AccountOpened) -> Result<CreditAccount, LedgerError> {
        self.ledger.open_account(&event.user_id, Utc::now()).await
    }
}
