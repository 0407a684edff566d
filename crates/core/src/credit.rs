// Credit accounts
//
// Decision: balances are i32 to match the INTEGER column; the >= 0 invariant
// is enforced by the ledger's conditional update, never by clamping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-user credit balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: String,
    pub credits_remaining: i32,
    pub reset_at: DateTime<Utc>,
    pub total_processed: i32,
}

impl CreditAccount {
    pub fn can_spend(&self) -> bool {
        self.credits_remaining > 0
    }
}

/// Result of a successful `debit_one`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DebitOutcome {
    /// The balance was decremented by this call
    Charged { credits_remaining: i32 },
    /// The job's charge marker was already set; nothing changed
    AlreadyCharged { credits_remaining: i32 },
}

impl DebitOutcome {
    pub fn credits_remaining(&self) -> i32 {
        match self {
            Self::Charged { credits_remaining } | Self::AlreadyCharged { credits_remaining } => {
                *credits_remaining
            }
        }
    }
}

/// Grant size and period for account creation and topups
#[derive(Debug, Clone, PartialEq)]
pub struct CreditPolicy {
    pub credits_per_period: i32,
    pub period: Duration,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            credits_per_period: 50,
            period: Duration::days(30),
        }
    }
}

impl CreditPolicy {
    pub fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.period
    }

    /// A fresh account as granted at `now`
    pub fn fresh_account(&self, user_id: &str, now: DateTime<Utc>) -> CreditAccount {
        CreditAccount {
            user_id: user_id.to_string(),
            credits_remaining: self.credits_per_period,
            reset_at: self.reset_at(now),
            total_processed: 0,
        }
    }
}
