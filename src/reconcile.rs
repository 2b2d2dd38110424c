//! Reconciliation of local transaction state against the server.
//!
//! The server decides expiry and failure on its own schedule (a cleanup job
//! marks stale transactions `EXPIRED`). The client polls the history endpoint
//! and forces local state back into agreement. Poll transport failures are
//! never surfaced; the next tick retries.

use crate::client::{TransactionRecord, TransactionStatus};

/// Seconds between reconciliation polls while a session is open.
pub const POLL_INTERVAL_SECONDS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Server still shows the transaction as active; the carried record is
    /// the fresh authoritative projection.
    Active(TransactionRecord),

    /// The transaction is over as far as the client is concerned: clear the
    /// session. `notice` is set when the server ended it (failed/expired)
    /// and the user should be told a new transaction may be started.
    Ended { notice: bool },
}

/// Decide what to do with the locally held transaction given the server's
/// history listing.
pub fn reconcile(transaction_id: u64, records: &[TransactionRecord]) -> Reconciliation {
    match records.iter().find(|r| r.id == transaction_id) {
        Some(record) if record.status.is_active() => Reconciliation::Active(record.clone()),
        Some(record) => Reconciliation::Ended {
            notice: matches!(
                record.status,
                TransactionStatus::Failed | TransactionStatus::Expired
            ),
        },
        None => Reconciliation::Ended { notice: false },
    }
}
