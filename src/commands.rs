use crate::orchestration::actions::{
    execute_action, record_writeback_receipt, replay_run, resolve_decision, ActionRequest,
};
use crate::orchestration::guidance::{self, GuidanceStep};
use crate::orchestration::scheduler::{add_schedule, tick};
use crate::orchestration::EngineError;
use crate::reports::client::ReportClient;
use crate::store::{
    init_store, load_store, store_file_path, DecisionStatus, QueueState, RunSource, RunStatus,
    Schedule, SeatRuntime, StoreError, StoreFile,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;
const DEFAULT_LEDGER_LIMIT: usize = 100;
const MAX_LEDGER_LIMIT: usize = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("unknown seat `{0}`")]
    UnknownSeat(String),
    #[error("unknown run `{0}`")]
    UnknownRun(String),
    #[error("unknown decision `{0}`")]
    UnknownDecision(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidParams(_) => "invalid_params",
            CommandError::UnknownMethod(_) => "unknown_method",
            CommandError::UnknownSeat(_) => "unknown_seat",
            CommandError::UnknownRun(_) => "unknown_run",
            CommandError::UnknownDecision(_) => "unknown_decision",
            CommandError::Unavailable(_) => "unavailable",
            CommandError::Store(StoreError::NotInitialized { .. }) => "not_initialized",
            CommandError::Store(_) => "store_io",
        }
    }

    /// `{code, message}` shape surfaced by the transport layer.
    pub fn to_wire(&self) -> Value {
        json!({"code": self.code(), "message": self.to_string()})
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownSeat(id) => CommandError::UnknownSeat(id),
            EngineError::UnknownRun(id) => CommandError::UnknownRun(id),
            EngineError::UnknownDecision(id) => CommandError::UnknownDecision(id),
            EngineError::InvalidResolution(raw) => {
                CommandError::InvalidParams(format!("resolution `{raw}` must be allow or deny"))
            }
            EngineError::IntervalTooShort(ms) => CommandError::InvalidParams(format!(
                "intervalMs {ms} is below the 60000ms minimum"
            )),
            EngineError::Store(err) => CommandError::Store(err),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, CommandError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|err| CommandError::InvalidParams(err.to_string()))
}

fn to_wire<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|err| CommandError::Unavailable(err.to_string()))
}

fn non_empty(value: &str, field: &str) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::InvalidParams(format!("{field} must be non-empty")));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InitParams {
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EmptyParams {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunsParams {
    limit: Option<usize>,
    query: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DecisionsParams {
    limit: Option<usize>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteParams {
    seat_id: String,
    action: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    require_writeback_receipt: bool,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveParams {
    decision_id: String,
    resolution: String,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayParams {
    run_id: String,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleAddParams {
    seat_id: String,
    name: String,
    interval_ms: i64,
    action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TickParams {
    actor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WritebackParams {
    actor: Option<String>,
    note: Option<String>,
    artifact: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub runs: usize,
    pub pending_decisions: usize,
    pub queue_pending_total: u64,
    pub autonomy: BTreeMap<String, usize>,
    pub policy_decisions: BTreeMap<String, usize>,
    pub risk: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkforceStatus {
    pub ready: bool,
    pub version: u32,
    pub initialized_at_ms: i64,
    pub updated_at_ms: i64,
    pub seats: Vec<SeatRuntime>,
    pub queues: Vec<QueueState>,
    pub schedules: Vec<Schedule>,
    pub next_steps: Vec<GuidanceStep>,
    pub summary: StatusSummary,
}

fn build_status(store: &StoreFile, now_ms: i64) -> WorkforceStatus {
    let mut autonomy: BTreeMap<String, usize> = BTreeMap::new();
    for seat in &store.seats {
        *autonomy
            .entry(seat.autonomy_mode.as_str().to_string())
            .or_insert(0) += 1;
    }
    let mut policy_decisions: BTreeMap<String, usize> = BTreeMap::new();
    let mut risk: BTreeMap<String, usize> = BTreeMap::new();
    for run in &store.runs {
        *policy_decisions
            .entry(run.policy_decision.as_str().to_string())
            .or_insert(0) += 1;
        *risk.entry(run.risk_level.as_str().to_string()).or_insert(0) += 1;
    }
    WorkforceStatus {
        ready: true,
        version: store.version,
        initialized_at_ms: store.initialized_at_ms,
        updated_at_ms: store.updated_at_ms,
        seats: store.seats.clone(),
        queues: store.queues.clone(),
        schedules: store.schedules.clone(),
        next_steps: guidance::next_steps(store, now_ms),
        summary: StatusSummary {
            runs: store.runs.len(),
            pending_decisions: store
                .decisions
                .iter()
                .filter(|card| card.status == DecisionStatus::Pending)
                .count(),
            queue_pending_total: store.queues.iter().map(|queue| queue.pending).sum(),
            autonomy,
            policy_decisions,
            risk,
        },
    }
}

fn load_required(state_root: &Path) -> Result<StoreFile, CommandError> {
    load_store(state_root)?.ok_or_else(|| {
        CommandError::Store(StoreError::NotInitialized {
            path: store_file_path(state_root).display().to_string(),
        })
    })
}

fn newest_first<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items.iter().rev().take(limit).cloned().collect()
}

/// Method-string dispatch over the workforce RPC surface. Param shapes are
/// validated before any store mutation; errors carry stable wire codes.
pub fn dispatch(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    method: &str,
    params: Value,
    now_ms: i64,
) -> Result<Value, CommandError> {
    match method {
        "workforce.init" => {
            let params: InitParams = parse_params(params)?;
            let (_, created) = init_store(state_root, now_ms, params.force)?;
            Ok(json!({
                "ok": true,
                "path": store_file_path(state_root).display().to_string(),
                "status": if created { "created" } else { "exists" },
            }))
        }
        "workforce.status" => {
            let _: EmptyParams = parse_params(params)?;
            match load_store(state_root)? {
                Some(store) => to_wire(&build_status(&store, now_ms)),
                None => Ok(json!({
                    "ready": false,
                    "path": store_file_path(state_root).display().to_string(),
                })),
            }
        }
        "workforce.runs" => {
            let params: RunsParams = parse_params(params)?;
            let status = params
                .status
                .as_deref()
                .map(|raw| {
                    RunStatus::parse(raw).ok_or_else(|| {
                        CommandError::InvalidParams(format!("unknown run status `{raw}`"))
                    })
                })
                .transpose()?;
            let store = load_required(state_root)?;
            let limit = params
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT);
            let query = params.query.as_deref().map(str::to_lowercase);
            let runs: Vec<_> = store
                .runs
                .iter()
                .rev()
                .filter(|run| status.map(|s| run.status == s).unwrap_or(true))
                .filter(|run| {
                    query
                        .as_deref()
                        .map(|q| {
                            run.action.to_lowercase().contains(q)
                                || run.seat_id.to_lowercase().contains(q)
                                || run.run_id.to_lowercase().contains(q)
                                || run.summary.to_lowercase().contains(q)
                        })
                        .unwrap_or(true)
                })
                .take(limit)
                .cloned()
                .collect();
            Ok(json!({"runs": to_wire(&runs)?}))
        }
        "workforce.ledger" => {
            let params: LimitParams = parse_params(params)?;
            let store = load_required(state_root)?;
            let limit = params
                .limit
                .unwrap_or(DEFAULT_LEDGER_LIMIT)
                .min(MAX_LEDGER_LIMIT);
            Ok(json!({
                "receipts": to_wire(&newest_first(&store.receipts, limit))?,
                "replayframes": to_wire(&newest_first(&store.replayframes, limit))?,
                "decisions": to_wire(&newest_first(&store.decisions, limit))?,
            }))
        }
        "workforce.decisions" => {
            let params: DecisionsParams = parse_params(params)?;
            let status = params
                .status
                .as_deref()
                .map(|raw| {
                    DecisionStatus::parse(raw).ok_or_else(|| {
                        CommandError::InvalidParams(format!("unknown decision status `{raw}`"))
                    })
                })
                .transpose()?;
            let store = load_required(state_root)?;
            let limit = params
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT);
            let decisions: Vec<_> = store
                .decisions
                .iter()
                .rev()
                .filter(|card| status.map(|s| card.status == s).unwrap_or(true))
                .take(limit)
                .cloned()
                .collect();
            Ok(json!({"decisions": to_wire(&decisions)?}))
        }
        "workforce.workspace" => {
            let _: EmptyParams = parse_params(params)?;
            let store = load_required(state_root)?;
            Ok(json!({"workspace": to_wire(&store.workspace)?}))
        }
        "workforce.action.execute" => {
            let params: ExecuteParams = parse_params(params)?;
            non_empty(&params.seat_id, "seatId")?;
            non_empty(&params.action, "action")?;
            let source = match params.source.as_deref() {
                None => RunSource::Chat,
                Some(raw) => RunSource::parse(raw).ok_or_else(|| {
                    CommandError::InvalidParams(format!("unknown source `{raw}`"))
                })?,
            };
            let payload = match params.payload {
                None | Some(Value::Null) => json!({}),
                Some(value @ Value::Object(_)) => value,
                Some(_) => {
                    return Err(CommandError::InvalidParams(
                        "payload must be an object".to_string(),
                    ))
                }
            };
            let req = ActionRequest {
                seat_id: params.seat_id,
                action: params.action,
                payload,
                source,
                actor: params.actor.unwrap_or_else(|| "operator".to_string()),
                require_writeback_receipt: params.require_writeback_receipt,
            };
            let outcome = execute_action(state_root, client, &req, now_ms)?;
            to_wire(&outcome)
        }
        "workforce.decision.resolve" => {
            let params: ResolveParams = parse_params(params)?;
            non_empty(&params.decision_id, "decisionId")?;
            let actor = params.actor.unwrap_or_else(|| "operator".to_string());
            let card = resolve_decision(
                state_root,
                &params.decision_id,
                &params.resolution,
                &actor,
                now_ms,
            )?;
            to_wire(&card)
        }
        "workforce.run.replay" => {
            let params: ReplayParams = parse_params(params)?;
            non_empty(&params.run_id, "runId")?;
            let actor = params.actor.unwrap_or_else(|| "operator".to_string());
            let outcome = replay_run(state_root, client, &params.run_id, &actor, now_ms)?;
            to_wire(&outcome)
        }
        "workforce.schedule.add" => {
            let params: ScheduleAddParams = parse_params(params)?;
            non_empty(&params.seat_id, "seatId")?;
            non_empty(&params.name, "name")?;
            non_empty(&params.action, "action")?;
            let schedule = add_schedule(
                state_root,
                &params.seat_id,
                &params.name,
                params.interval_ms,
                &params.action,
                now_ms,
            )?;
            to_wire(&schedule)
        }
        "workforce.schedules" => {
            let params: LimitParams = parse_params(params)?;
            let store = load_required(state_root)?;
            let limit = params
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT);
            Ok(json!({"schedules": to_wire(&newest_first(&store.schedules, limit))?}))
        }
        "workforce.tick" => {
            let params: TickParams = parse_params(params)?;
            let actor = params.actor.unwrap_or_else(|| "scheduler".to_string());
            let outcome = tick(state_root, client, &actor, now_ms)?;
            to_wire(&outcome)
        }
        "workforce.appfolio.writeback" => {
            let params: WritebackParams = parse_params(params)?;
            let actor = params.actor.unwrap_or_else(|| "operator".to_string());
            let receipt = record_writeback_receipt(
                state_root,
                &actor,
                params.note.as_deref(),
                params.artifact.as_deref(),
                now_ms,
            )?;
            Ok(json!({"receipt": to_wire(&receipt)?}))
        }
        "workforce.appfolio.reports.probe" => {
            let _: EmptyParams = parse_params(params)?;
            let client = client.ok_or_else(|| {
                CommandError::Unavailable("report client is not configured".to_string())
            })?;
            let probe = client
                .probe_access()
                .map_err(|err| CommandError::Unavailable(err.to_string()))?;
            to_wire(&probe)
        }
        other => Err(CommandError::UnknownMethod(other.to_string())),
    }
}
