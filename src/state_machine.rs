//! The authoritative transition function over the transaction lifecycle.
//!
//! Grounded in the teacher's pattern of centralizing a single fallible
//! assertion function (`assert_requirements`, `assert_signature`, ...) rather
//! than scattering state checks across call sites.

use chrono::Utc;

use crate::domain::{HistoryEntry, Status, Transaction};
use crate::errors::{CoreError, CoreResult};

/// Verifies that `to` is a legal transition from `tx`'s current status and,
/// if so, appends a history entry and updates `tx.status` in place.
///
/// A same-state call is a no-op (no history entry is appended). An illegal
/// call returns `CoreError::State` and leaves `tx` unchanged.
pub fn assert_transition(
    tx: &mut Transaction,
    to: Status,
    reason: &str,
    source: &str,
) -> CoreResult<()> {
    let from = tx.status;
    if from == to {
        return Ok(());
    }
    if !from.can_transition_to(to) {
        return Err(CoreError::state(format!(
            "illegal transition {from} -> {to} for transaction {}",
            tx.transaction_id
        )));
    }
    tx.history.push(HistoryEntry {
        from,
        to,
        reason: reason.to_string(),
        source: source.to_string(),
        at: Utc::now(),
    });
    tx.status = to;
    tx.updated_at = Utc::now();
    Ok(())
}
