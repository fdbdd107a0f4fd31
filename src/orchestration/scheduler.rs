use super::actions::{execute_action, load_required, ActionOutcome, ActionRequest};
use super::EngineError;
use crate::reports::client::ReportClient;
use crate::shared::ids;
use crate::shared::logging::append_workforce_log_line;
use crate::store::{mutate_store, RunSource, Schedule, StoreError};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

pub const MIN_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub triggered: Vec<ActionOutcome>,
    pub skipped_backpressure: Vec<String>,
}

/// One scheduler pass. Schedules are processed sequentially; queue pending
/// counts are re-read before each schedule so work triggered earlier in the
/// pass gates later schedules. Every due schedule is re-armed to
/// `now + interval`, whether or not its action ran.
pub fn tick(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    actor: &str,
    now_ms: i64,
) -> Result<TickOutcome, EngineError> {
    let snapshot = load_required(state_root)?;
    let due: Vec<Schedule> = snapshot
        .schedules
        .iter()
        .filter(|s| s.enabled && s.interval_ms > 0 && s.next_run_at_ms <= now_ms)
        .cloned()
        .collect();

    let mut outcome = TickOutcome::default();
    for schedule in due {
        let store = load_required(state_root)?;
        let pending = store
            .queue_for_seat(&schedule.seat_id)
            .map(|queue| queue.pending)
            .unwrap_or(0);
        let gate = schedule.max_concurrent_runs.max(1);
        if pending >= gate {
            rearm(state_root, &schedule.id, false, now_ms)?;
            let _ = append_workforce_log_line(
                state_root,
                &format!(
                    "{now_ms} tick schedule={} skipped=backpressure pending={pending}",
                    schedule.id
                ),
            );
            outcome.skipped_backpressure.push(schedule.id);
            continue;
        }

        let req = ActionRequest {
            seat_id: schedule.seat_id.clone(),
            action: schedule.action.clone(),
            payload: json!({}),
            source: RunSource::Cron,
            actor: actor.to_string(),
            require_writeback_receipt: false,
        };
        let action_outcome = execute_action(state_root, client, &req, now_ms)?;
        rearm(state_root, &schedule.id, true, now_ms)?;
        outcome.triggered.push(action_outcome);
    }
    Ok(outcome)
}

fn rearm(state_root: &Path, schedule_id: &str, ran: bool, now_ms: i64) -> Result<(), EngineError> {
    mutate_store(state_root, now_ms, |store| {
        if let Some(schedule) = store.schedules.iter_mut().find(|s| s.id == schedule_id) {
            if ran {
                schedule.last_run_at_ms = now_ms;
            }
            schedule.next_run_at_ms = now_ms + schedule.interval_ms;
        }
        Ok::<_, StoreError>(())
    })
    .map_err(EngineError::from)
}

pub fn add_schedule(
    state_root: &Path,
    seat_id: &str,
    name: &str,
    interval_ms: i64,
    action: &str,
    now_ms: i64,
) -> Result<Schedule, EngineError> {
    if interval_ms < MIN_INTERVAL_MS {
        return Err(EngineError::IntervalTooShort(interval_ms));
    }
    let snapshot = load_required(state_root)?;
    if snapshot.seat(seat_id).is_none() {
        return Err(EngineError::UnknownSeat(seat_id.to_string()));
    }
    let schedule_id = ids::new_schedule_id(now_ms).map_err(StoreError::Invalid)?;
    mutate_store(state_root, now_ms, |store| {
        let schedule = Schedule {
            id: schedule_id,
            seat_id: seat_id.to_string(),
            name: name.to_string(),
            interval_ms,
            enabled: true,
            max_concurrent_runs: 1,
            next_run_at_ms: now_ms + interval_ms,
            last_run_at_ms: 0,
            action: action.to_string(),
        };
        store.schedules.push(schedule.clone());
        Ok::<_, StoreError>(schedule)
    })
    .map_err(EngineError::from)
}
