pub mod actions;
pub mod guidance;
pub mod scheduler;

use crate::shared::ids;
use crate::store::{Receipt, ReplayFrame, StoreError, StoreFile};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown seat `{0}`")]
    UnknownSeat(String),
    #[error("unknown run `{0}`")]
    UnknownRun(String),
    #[error("unknown decision `{0}`")]
    UnknownDecision(String),
    #[error("invalid resolution `{0}`; expected `allow` or `deny`")]
    InvalidResolution(String),
    #[error("schedule interval {0}ms is below the 60000ms minimum")]
    IntervalTooShort(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Appends one replay frame, drawing the next per-run sequence number inside
/// the same document mutation.
pub(crate) fn push_frame(
    store: &mut StoreFile,
    run_id: &str,
    event_type: &str,
    payload_ref: Option<String>,
    source: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    let frame_id = ids::new_frame_id(now_ms).map_err(StoreError::Invalid)?;
    let seq = store.next_frame_seq(run_id);
    store.replayframes.push(ReplayFrame {
        frame_id,
        run_id: run_id.to_string(),
        seq,
        event_type: event_type.to_string(),
        payload_ref,
        state_delta: None,
        ts: now_ms,
        source: source.to_string(),
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn push_receipt(
    store: &mut StoreFile,
    run_id: Option<&str>,
    decision_id: Option<&str>,
    actor: &str,
    action: &str,
    outcome: &str,
    artifacts: Vec<String>,
    now_ms: i64,
) -> Result<Receipt, StoreError> {
    let receipt_id = ids::new_receipt_id(now_ms).map_err(StoreError::Invalid)?;
    let receipt = Receipt::signed(
        receipt_id,
        run_id.map(str::to_string),
        decision_id.map(str::to_string),
        actor,
        action,
        outcome,
        now_ms,
        artifacts,
    );
    store.receipts.push(receipt.clone());
    Ok(receipt)
}

pub(crate) fn decrement_queue_pending(store: &mut StoreFile, seat_id: &str) {
    if let Some(queue) = store.queue_for_seat_mut(seat_id) {
        queue.pending = queue.pending.saturating_sub(1);
    }
}

pub(crate) fn increment_queue_pending(store: &mut StoreFile, seat_id: &str) {
    if let Some(queue) = store.queue_for_seat_mut(seat_id) {
        queue.pending = queue.pending.saturating_add(1);
    }
}
