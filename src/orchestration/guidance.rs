use crate::store::{DecisionStatus, RunStatus, StoreFile};
use serde::Serialize;

pub const MAX_STEPS: usize = 6;
const FIVE_MINUTES_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceStep {
    pub id: String,
    pub title: String,
    pub detail: String,
    pub priority: StepPriority,
    pub kind: String,
}

fn step(id: String, title: String, detail: String, priority: StepPriority, kind: &str) -> GuidanceStep {
    GuidanceStep {
        id,
        title,
        detail,
        priority,
        kind: kind.to_string(),
    }
}

/// Derives a small ranked list of next steps from current store state. Purely
/// a projection; recomputed on every status or listing read.
pub fn next_steps(store: &StoreFile, now_ms: i64) -> Vec<GuidanceStep> {
    let mut steps = Vec::new();

    // Oldest unresolved decision first; cards append in creation order.
    if let Some(card) = store
        .decisions
        .iter()
        .find(|card| card.status == DecisionStatus::Pending)
    {
        steps.push(step(
            format!("resolve:{}", card.decision_id),
            format!("Resolve decision: {}", card.title),
            format!("seat `{}` is waiting on `{}`", card.seat_id, card.summary),
            StepPriority::High,
            "resolve_decision",
        ));
    }

    // Most recent blocked run that no later successful run of the same
    // seat+action pair has superseded.
    for (index, run) in store.runs.iter().enumerate().rev() {
        if run.status != RunStatus::Blocked {
            continue;
        }
        let superseded = store.runs[index + 1..].iter().any(|later| {
            later.seat_id == run.seat_id
                && later.action == run.action
                && later.status == RunStatus::Ok
        });
        if superseded {
            continue;
        }
        let needs_writeback = run.summary == "appfolio_action_requires_writeback_gate"
            || run.summary == "appfolio_writeback_receipt_required";
        if needs_writeback {
            steps.push(step(
                format!("writeback:{}", run.run_id),
                "Record a writeback receipt".to_string(),
                format!(
                    "`{}` on seat `{}` is blocked on the writeback gate; record a receipt and retry with its id",
                    run.action, run.seat_id
                ),
                StepPriority::Medium,
                "record_writeback",
            ));
        } else {
            steps.push(step(
                format!("retry:{}", run.run_id),
                format!("Revisit blocked run: {}", run.action),
                format!("blocked with `{}` on seat `{}`", run.summary, run.seat_id),
                StepPriority::Medium,
                "retry_blocked_run",
            ));
        }
        break;
    }

    if let Some(queue) = store
        .queues
        .iter()
        .find(|queue| queue.concurrency > 0 && queue.pending >= queue.concurrency * 2)
    {
        steps.push(step(
            format!("drain:{}", queue.id),
            format!("Drain queue {}", queue.id),
            format!(
                "{} pending against concurrency {}",
                queue.pending, queue.concurrency
            ),
            StepPriority::Medium,
            "drain_queue",
        ));
    }

    let mut lagging = None;
    let mut due_soon = None;
    for schedule in store
        .schedules
        .iter()
        .filter(|s| s.enabled && s.interval_ms > 0)
    {
        let overdue_ms = now_ms - schedule.next_run_at_ms;
        if overdue_ms > FIVE_MINUTES_MS.max(schedule.interval_ms) {
            if lagging.is_none() {
                lagging = Some(step(
                    format!("lagging:{}", schedule.id),
                    format!("Schedule lagging: {}", schedule.name),
                    format!("overdue by {}ms; run workforce.tick", overdue_ms),
                    StepPriority::High,
                    "run_tick",
                ));
            }
        } else if schedule.next_run_at_ms - now_ms <= FIVE_MINUTES_MS && due_soon.is_none() {
            due_soon = Some(step(
                format!("due:{}", schedule.id),
                format!("Schedule due soon: {}", schedule.name),
                format!("next run at {}", schedule.next_run_at_ms),
                StepPriority::Low,
                "schedule_due",
            ));
        }
    }
    steps.extend(lagging);
    steps.extend(due_soon);

    if !store
        .schedules
        .iter()
        .any(|s| s.action.starts_with("appfolio.report.run:"))
    {
        steps.push(step(
            "install:report-schedule".to_string(),
            "Install a report schedule".to_string(),
            "no recurring appfolio report pull is installed".to_string(),
            StepPriority::Medium,
            "install_report_schedule",
        ));
    }
    if !store
        .schedules
        .iter()
        .any(|s| s.action == "appfolio.workflow.run:smart_bill_review")
    {
        steps.push(step(
            "install:smart-bill-daily".to_string(),
            "Install the Smart Bill daily review".to_string(),
            "no daily smart_bill_review workflow schedule is installed".to_string(),
            StepPriority::Medium,
            "install_smart_bill_daily",
        ));
    }

    if steps.is_empty() {
        steps.push(step(
            "standup".to_string(),
            "Start the daily standup".to_string(),
            "no pending decisions, blocked runs, or due schedules".to_string(),
            StepPriority::Low,
            "start_standup",
        ));
    }

    steps.truncate(MAX_STEPS);
    steps
}
