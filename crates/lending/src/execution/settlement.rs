//! Money and collateral movement outside the engine.
//!
//! The engine describes what should move with a [`SettlementIntent`] and
//! commits its own state only when the ledger reports success. A failed or
//! errored settlement rolls back the surrounding transaction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::LendingError;
use crate::types::{Amount, LoanId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementIntent {
    /// Pay the principal out to the borrower.
    Disburse {
        loan_id: LoanId,
        borrower: String,
        amount: Amount,
    },
    /// Collect a repayment from the borrower into the pool.
    CollectRepayment { loan_id: LoanId, amount: Amount },
    /// Transfer locked collateral to the liquidator.
    SeizeCollateral {
        loan_id: LoanId,
        asset: String,
        amount: Amount,
        liquidator: String,
        expected_proceeds: Amount,
    },
}

impl SettlementIntent {
    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::Disburse { loan_id, .. }
            | Self::CollectRepayment { loan_id, .. }
            | Self::SeizeCollateral { loan_id, .. } => *loan_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disburse { .. } => "disburse",
            Self::CollectRepayment { .. } => "collect_repayment",
            Self::SeizeCollateral { .. } => "seize_collateral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub success: bool,
    pub tx_ref: Option<String>,
}

#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn settle(&self, intent: SettlementIntent) -> Result<SettlementResult, LendingError>;
}

/// Turn a ledger response into the reference stored with the state change.
pub async fn settle_or_fail(
    ledger: &dyn SettlementLedger,
    intent: SettlementIntent,
) -> Result<Option<String>, LendingError> {
    let kind = intent.kind();
    let loan_id = intent.loan_id();
    let result = ledger.settle(intent).await?;
    if !result.success {
        return Err(LendingError::SettlementFailed {
            reason: format!("{kind} for loan {loan_id} was rejected"),
        });
    }
    Ok(result.tx_ref)
}

/// Accepts every intent and hands back a synthetic reference.
///
/// Used by the service binary and by tests; `reject_all` makes every
/// settlement report failure.
#[derive(Debug, Default)]
pub struct DryRunSettlement {
    counter: AtomicU64,
    reject: AtomicBool,
}

impl DryRunSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Number of intents seen so far, accepted or not.
    pub fn settled_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementLedger for DryRunSettlement {
    async fn settle(&self, intent: SettlementIntent) -> Result<SettlementResult, LendingError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject.load(Ordering::SeqCst) {
            return Ok(SettlementResult {
                success: false,
                tx_ref: None,
            });
        }
        let tx_ref = format!("dry-run-{}-{n}", intent.kind());
        info!(loan_id = intent.loan_id(), tx_ref = %tx_ref, "[DRY RUN] settlement accepted");
        Ok(SettlementResult {
            success: true,
            tx_ref: Some(tx_ref),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_refs_are_unique() {
        let ledger = DryRunSettlement::new();
        let a = settle_or_fail(
            &ledger,
            SettlementIntent::CollectRepayment { loan_id: 1, amount: 10 },
        )
        .await
        .unwrap();
        let b = settle_or_fail(
            &ledger,
            SettlementIntent::CollectRepayment { loan_id: 1, amount: 10 },
        )
        .await
        .unwrap();
        assert_ne!(a, b);
        assert_eq!(ledger.settled_count(), 2);
    }

    #[tokio::test]
    async fn test_rejection_maps_to_settlement_failed() {
        let ledger = DryRunSettlement::new();
        ledger.reject_all(true);
        let err = settle_or_fail(
            &ledger,
            SettlementIntent::Disburse {
                loan_id: 3,
                borrower: "alice".into(),
                amount: 1_000,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LendingError::SettlementFailed { .. }));
    }
}
