use super::{
    decrement_queue_pending, increment_queue_pending, push_frame, push_receipt, EngineError,
};
use crate::orchestration::guidance::{self, GuidanceStep};
use crate::policy::{derive_risk_level, evaluate_policy, PolicyOutcome, PolicyVerdict};
use crate::reports::client::ReportClient;
use crate::reports::runner;
use crate::shared::ids;
use crate::shared::logging::append_workforce_log_line;
use crate::store::{
    load_store, mutate_store, store_file_path, DecisionCard, DecisionStatus, Receipt, RunEnvelope,
    RunSource, RunStatus, SeatStatus, StoreError, StoreFile,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

pub const DECISION_EXPIRY_MS: i64 = 24 * 60 * 60 * 1000;

/// Action strings are parsed once at the ingress boundary; downstream code
/// matches on the variant instead of re-inspecting prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Report { preset_id: String },
    Workflow { workflow_id: String },
    Plain,
}

impl ActionKind {
    pub fn parse(action: &str) -> Self {
        if let Some(preset_id) = action.strip_prefix("appfolio.report.run:") {
            if !preset_id.is_empty() {
                return ActionKind::Report {
                    preset_id: preset_id.to_string(),
                };
            }
        }
        if let Some(workflow_id) = action.strip_prefix("appfolio.workflow.run:") {
            if !workflow_id.is_empty() {
                return ActionKind::Workflow {
                    workflow_id: workflow_id.to_string(),
                };
            }
        }
        ActionKind::Plain
    }
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub seat_id: String,
    pub action: String,
    pub payload: Value,
    pub source: RunSource,
    pub actor: String,
    pub require_writeback_receipt: bool,
}

impl ActionRequest {
    pub fn new(seat_id: &str, action: &str) -> Self {
        Self {
            seat_id: seat_id.to_string(),
            action: action.to_string(),
            payload: json!({}),
            source: RunSource::Chat,
            actor: "operator".to_string(),
            require_writeback_receipt: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub policy: PolicyVerdict,
    pub run: RunEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionCard>,
    pub receipt: Receipt,
    pub next_steps: Vec<GuidanceStep>,
}

pub(crate) fn load_required(state_root: &Path) -> Result<StoreFile, EngineError> {
    load_store(state_root)?.ok_or_else(|| {
        EngineError::Store(StoreError::NotInitialized {
            path: store_file_path(state_root).display().to_string(),
        })
    })
}

/// Runs one action attempt end to end: policy evaluation, run envelope,
/// optional decision card, receipt, replay frames, and the post-hoc report or
/// workflow job when the action names one.
pub fn execute_action(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    req: &ActionRequest,
    now_ms: i64,
) -> Result<ActionOutcome, EngineError> {
    let snapshot = load_required(state_root)?;
    if snapshot.seat(&req.seat_id).is_none() {
        return Err(EngineError::UnknownSeat(req.seat_id.clone()));
    }

    let run_id = ids::new_run_id(now_ms).map_err(StoreError::Invalid)?;
    let kind = ActionKind::parse(&req.action);

    let (verdict, decision, receipt) = mutate_store(state_root, now_ms, |store| {
        let verdict = evaluate_policy(
            &req.seat_id,
            &req.action,
            &req.payload,
            req.require_writeback_receipt,
            store,
        );
        let risk = derive_risk_level(&req.action);
        let status = match verdict.decision {
            PolicyOutcome::Allow => RunStatus::Ok,
            PolicyOutcome::Block => RunStatus::Blocked,
            PolicyOutcome::Escalate => RunStatus::Escalated,
        };
        let mut run = RunEnvelope {
            run_id: run_id.clone(),
            source: req.source,
            seat_id: req.seat_id.clone(),
            action: req.action.clone(),
            risk_level: risk,
            policy_profile: verdict.profile,
            policy_decision: verdict.decision,
            status,
            started_at_ms: now_ms,
            ended_at_ms: if status.is_terminal() { now_ms } else { 0 },
            summary: verdict.reason.code(),
            error: None,
            artifacts: Vec::new(),
        };

        if let Some(seat) = store.seat_mut(&req.seat_id) {
            seat.last_run_at_ms = now_ms;
            seat.status = match verdict.decision {
                PolicyOutcome::Allow => SeatStatus::Idle,
                _ => SeatStatus::Blocked,
            };
        }

        push_frame(
            store,
            &run_id,
            "run.created",
            None,
            req.source.as_str(),
            now_ms,
        )?;

        let mut decision_card = None;
        if verdict.decision == PolicyOutcome::Escalate {
            let decision_id = ids::new_decision_id(now_ms).map_err(StoreError::Invalid)?;
            let card = DecisionCard::allow_deny(
                decision_id.clone(),
                Some(run_id.clone()),
                &req.seat_id,
                format!("Approval needed: {}", req.action),
                verdict.reason.code(),
                risk,
                now_ms,
                DECISION_EXPIRY_MS,
            );
            run.artifacts.push(format!("decision:{decision_id}"));
            store.decisions.push(card.clone());
            push_frame(
                store,
                &run_id,
                "decision.created",
                Some(decision_id),
                req.source.as_str(),
                now_ms,
            )?;
            increment_queue_pending(store, &req.seat_id);
            decision_card = Some(card);
        }

        let receipt = push_receipt(
            store,
            Some(&run_id),
            decision_card.as_ref().map(|c| c.decision_id.as_str()),
            &req.actor,
            &req.action,
            run.status.as_str(),
            vec![
                format!("profile:{}", verdict.profile.as_str()),
                format!("risk:{}", risk.as_str()),
            ],
            now_ms,
        )?;

        match verdict.decision {
            PolicyOutcome::Allow => {
                push_frame(store, &run_id, "run.running", None, req.source.as_str(), now_ms)?;
                push_frame(
                    store,
                    &run_id,
                    "run.completed",
                    None,
                    req.source.as_str(),
                    now_ms,
                )?;
            }
            PolicyOutcome::Block => {
                push_frame(
                    store,
                    &run_id,
                    "run.blocked",
                    Some(verdict.reason.code()),
                    req.source.as_str(),
                    now_ms,
                )?;
            }
            PolicyOutcome::Escalate => {}
        }

        if verdict.decision != PolicyOutcome::Escalate {
            decrement_queue_pending(store, &req.seat_id);
        }

        store.runs.push(run);
        Ok::<_, StoreError>((verdict, decision_card, receipt))
    })?;

    match &kind {
        ActionKind::Report { preset_id } => runner::run_report_job(
            state_root,
            client,
            &run_id,
            preset_id,
            &req.payload,
            verdict.decision == PolicyOutcome::Allow,
            &req.actor,
            now_ms,
        )?,
        ActionKind::Workflow { workflow_id } => runner::run_workflow_job(
            state_root,
            client,
            &run_id,
            workflow_id,
            &req.payload,
            verdict.decision == PolicyOutcome::Allow,
            &req.actor,
            now_ms,
        )?,
        ActionKind::Plain => {}
    }

    let store = load_required(state_root)?;
    let run = store
        .run(&run_id)
        .cloned()
        .ok_or_else(|| EngineError::UnknownRun(run_id.clone()))?;
    let next_steps = guidance::next_steps(&store, now_ms);
    let _ = append_workforce_log_line(
        state_root,
        &format!(
            "{now_ms} action={} seat={} decision={} status={}",
            req.action,
            req.seat_id,
            verdict.decision.as_str(),
            run.status.as_str()
        ),
    );
    Ok(ActionOutcome {
        policy: verdict,
        run,
        decision,
        receipt,
        next_steps,
    })
}

/// Resolves a pending decision card exactly once. Re-resolving returns the
/// already-resolved card unchanged.
pub fn resolve_decision(
    state_root: &Path,
    decision_id: &str,
    resolution: &str,
    actor: &str,
    now_ms: i64,
) -> Result<DecisionCard, EngineError> {
    let resolution = resolution.trim().to_lowercase();
    if resolution != "allow" && resolution != "deny" {
        return Err(EngineError::InvalidResolution(resolution));
    }

    let snapshot = load_required(state_root)?;
    let card = snapshot
        .decision(decision_id)
        .ok_or_else(|| EngineError::UnknownDecision(decision_id.to_string()))?;
    if card.status == DecisionStatus::Resolved {
        return Ok(card.clone());
    }

    mutate_store(state_root, now_ms, |store| {
        let card = store
            .decision_mut(decision_id)
            .ok_or_else(|| StoreError::Invalid(format!("decision `{decision_id}` vanished")))?;
        if card.status == DecisionStatus::Resolved {
            return Ok(card.clone());
        }
        card.status = DecisionStatus::Resolved;
        card.resolved_at_ms = Some(now_ms);
        card.resolved_by = Some(actor.to_string());
        card.resolution = Some(resolution.clone());
        let resolved = card.clone();

        if let Some(run_id) = &resolved.run_id {
            if let Some(run) = store.run_mut(run_id) {
                run.status = if resolution == "allow" {
                    RunStatus::Ok
                } else {
                    RunStatus::Blocked
                };
                run.ended_at_ms = now_ms;
            }
            push_frame(
                store,
                run_id,
                "decision.resolved",
                Some(resolution.clone()),
                "workforce",
                now_ms,
            )?;
        }
        if let Some(seat) = store.seat_mut(&resolved.seat_id) {
            seat.status = SeatStatus::Idle;
        }
        push_receipt(
            store,
            resolved.run_id.as_deref(),
            Some(decision_id),
            actor,
            "decision.resolve",
            &resolution,
            vec![format!("decision:{decision_id}")],
            now_ms,
        )?;
        decrement_queue_pending(store, &resolved.seat_id);
        Ok::<_, StoreError>(resolved)
    })
    .map_err(EngineError::from)
}

/// Replays a run by re-executing the same seat/action pair through a fresh
/// policy evaluation; the outcome may differ from the source run's.
pub fn replay_run(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    run_id: &str,
    actor: &str,
    now_ms: i64,
) -> Result<ActionOutcome, EngineError> {
    let snapshot = load_required(state_root)?;
    let source_run = snapshot
        .run(run_id)
        .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?
        .clone();

    let req = ActionRequest {
        seat_id: source_run.seat_id,
        action: source_run.action,
        payload: json!({}),
        source: RunSource::Workforce,
        actor: actor.to_string(),
        require_writeback_receipt: false,
    };
    let outcome = execute_action(state_root, client, &req, now_ms)?;
    let new_run_id = outcome.run.run_id.clone();
    mutate_store(state_root, now_ms, |store| {
        push_frame(
            store,
            &new_run_id,
            "run.replayed",
            Some(format!("source:{run_id}")),
            "workforce",
            now_ms,
        )
    })
    .map_err(EngineError::from)?;
    Ok(outcome)
}

/// Records a standalone writeback receipt that later `appfolio.comms.*`
/// actions can reference to clear the writeback gate.
pub fn record_writeback_receipt(
    state_root: &Path,
    actor: &str,
    note: Option<&str>,
    artifact: Option<&str>,
    now_ms: i64,
) -> Result<Receipt, EngineError> {
    mutate_store(state_root, now_ms, |store| {
        let mut artifacts = Vec::new();
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            artifacts.push(format!("note:{note}"));
        }
        if let Some(artifact) = artifact.filter(|a| !a.trim().is_empty()) {
            artifacts.push(artifact.to_string());
        }
        push_receipt(
            store,
            None,
            None,
            actor,
            "appfolio.comms.writeback",
            "recorded",
            artifacts,
            now_ms,
        )
    })
    .map_err(EngineError::from)
}
