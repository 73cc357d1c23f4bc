//! Reward-safe cleanup (spec §6, §9): an opaque account-transfer operation
//! and a two-phase enumerate-then-commit cleanup with a rollback log.
//!
//! `Transfer` is intentionally opaque — tokenomics are out of scope (spec
//! §1) — this module only guarantees that a cleanup either moves every
//! pending reward or moves none of them.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{FogError, FogResult};

/// One pending reward owed as part of tearing down a deployment.
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub memo: String,
}

/// Opaque account-transfer boundary. Real implementations talk to whatever
/// ledger backs rewards; this crate only needs the trait boundary.
#[async_trait]
pub trait RewardLedger: Send + Sync {
    async fn transfer(&self, transfer: &PendingTransfer) -> FogResult<()>;
}

/// A completed transfer kept so it can be reversed if a later transfer in
/// the same cleanup fails.
struct Committed {
    transfer: PendingTransfer,
}

/// Result of a cleanup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Every pending transfer committed; resource cleanup may proceed.
    Completed,
    /// At least one transfer failed; everything already committed in this
    /// attempt was reversed. No deployment state changed.
    Aborted { reversed: usize },
}

/// Runs the two-phase reward-safe cleanup (spec §9): phase 1 enumerates and
/// attempts every pending transfer, logging each success to a rollback log;
/// phase 2 (resource cleanup) only ever runs if phase 1 fully succeeds. If
/// phase 1 fails partway through, everything it already committed is
/// reversed using the rollback log before returning.
pub async fn run_reward_safe_cleanup(
    ledger: &dyn RewardLedger,
    pending: Vec<PendingTransfer>,
) -> FogResult<CleanupOutcome> {
    let mut rollback_log: Vec<Committed> = Vec::with_capacity(pending.len());

    for transfer in pending {
        match ledger.transfer(&transfer).await {
            Ok(()) => {
                info!(from = %transfer.from, to = %transfer.to, amount = transfer.amount, "reward transfer committed");
                rollback_log.push(Committed { transfer });
            }
            Err(e) => {
                warn!(error = %e, "reward transfer failed, reversing committed transfers");
                let reversed = reverse(ledger, &rollback_log).await;
                return Ok(CleanupOutcome::Aborted { reversed });
            }
        }
    }

    Ok(CleanupOutcome::Completed)
}

/// Reverses every committed transfer in `log`, most-recent first, by
/// issuing the inverse transfer. Reversal failures are logged but do not
/// stop the sweep — the rollback log itself is the audit trail of what
/// still needs manual reconciliation.
async fn reverse(ledger: &dyn RewardLedger, log: &[Committed]) -> usize {
    let mut reversed = 0;
    for committed in log.iter().rev() {
        let inverse = PendingTransfer {
            from: committed.transfer.to.clone(),
            to: committed.transfer.from.clone(),
            amount: committed.transfer.amount,
            memo: format!("rollback: {}", committed.transfer.memo),
        };
        match ledger.transfer(&inverse).await {
            Ok(()) => reversed += 1,
            Err(e) => error!(
                error = %e,
                from = %committed.transfer.from,
                to = %committed.transfer.to,
                "failed to reverse committed transfer, requires manual reconciliation"
            ),
        }
    }
    reversed
}
