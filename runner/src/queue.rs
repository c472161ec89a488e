//! The work-queue coordinator.
//!
//! Any number of independent processes share one grid table and use it as a
//! mutual-exclusion work queue. `claim_next` moves exactly one `pending` cell
//! to `in_progress` inside an exclusive (`begin immediate`) transaction, so
//! two racing claimants can never be handed the same cell. `finalize` closes a
//! claimed cell out. There is no lease or crash recovery: a claimant that dies
//! mid-job leaves its cell `in_progress`.

use crate::database::{sqlite::GridStore, sqlite::TABLE, Status};
use itertools::Itertools;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    /// Transient storage failure during a claim; retrying is safe.
    /// Distinct from queue exhaustion, which is the `Ok(None)` result.
    #[error("Failed to claim a pending cell: {0}")]
    ClaimFailed(#[from] rusqlite::Error),
    #[error("Failed to finalize cell {id}: {source}")]
    FinalizeFailed { id: i64, source: rusqlite::Error },
}

#[derive(Debug, Clone, PartialEq)]
/// A cell handed to exactly one claimant, with its parameter values in
/// declaration order.
pub struct ClaimedCell {
    pub id: i64,
    pub params: Vec<(String, f64)>,
}

/// Claim the pending cell with the lowest identifier, or signal exhaustion.
///
/// The select and the status update run in one immediate transaction. The
/// transaction takes the database write lock up front, so the selected row
/// cannot change between the read and the update, and a competing claimant
/// blocks (bounded by the store's busy timeout) until commit.
pub fn claim_next(store: &mut GridStore) -> Result<Option<ClaimedCell>, QueueError> {
    let columns = store.columns().to_vec();

    let tx = store
        .connection_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;

    let select = format!(
        "select id, {} from {TABLE} where status = ?1 order by id limit 1",
        columns.iter().map(|name| format!("\"{name}\"")).join(", ")
    );

    let cell = tx
        .prepare_cached(&select)?
        .query_row(params![Status::Pending.as_str()], |row| {
            let id: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(columns.len());

            for (index, name) in columns.iter().enumerate() {
                values.push((name.clone(), row.get(index + 1)?));
            }

            Ok(ClaimedCell { id, params: values })
        })
        .optional()?;

    let Some(cell) = cell else {
        // queue exhausted, a normal result rather than an error
        tx.rollback()?;

        return Ok(None);
    };

    tx.prepare_cached(&format!("update {TABLE} set status = ?1 where id = ?2"))?
        .execute(params![Status::InProgress.as_str(), cell.id])?;
    tx.commit()?;

    debug!(id = cell.id, "Claimed cell");

    Ok(Some(cell))
}

/// Mark a claimed cell `completed`. Returns whether a row actually changed.
///
/// Only `in_progress` cells are touched: finalizing a cell that is still
/// `pending`, already `completed`, or unknown is a logged no-op. No ownership
/// token is recorded at claim time, so the identifier is trusted as-is.
pub fn finalize(store: &mut GridStore, id: i64) -> Result<bool, QueueError> {
    let changed = store
        .connection_mut()
        .prepare_cached(&format!(
            "update {TABLE} set status = ?1 where id = ?2 and status = ?3"
        ))
        .and_then(|mut statement| {
            statement.execute(params![
                Status::Completed.as_str(),
                id,
                Status::InProgress.as_str()
            ])
        })
        .map_err(|source| QueueError::FinalizeFailed { id, source })?;

    if changed == 0 {
        warn!(id, "Finalize was a no-op, cell is not in progress");
    }

    Ok(changed == 1)
}
