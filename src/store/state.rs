use crate::policy::{PolicyOutcome, PolicyProfile, RiskLevel};
use crate::roster::{roster_seats, AutonomyMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const STORE_VERSION: u32 = 1;

const MAX_RUNS: usize = 5_000;
const MAX_RECEIPTS: usize = 10_000;
const MAX_REPLAY_FRAMES: usize = 20_000;
const MAX_DECISIONS: usize = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    #[default]
    Idle,
    Running,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRuntime {
    pub id: String,
    pub label: String,
    pub autonomy_mode: AutonomyMode,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub systems_access: Vec<String>,
    #[serde(default)]
    pub status: SeatStatus,
    #[serde(default)]
    pub last_run_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    Block,
    #[default]
    Defer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub id: String,
    pub seat_id: String,
    pub priority: u32,
    pub concurrency: u64,
    #[serde(default)]
    pub backpressure_policy: BackpressurePolicy,
    #[serde(default)]
    pub sla_minutes: u64,
    #[serde(default)]
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub seat_id: String,
    pub name: String,
    pub interval_ms: i64,
    pub enabled: bool,
    #[serde(default)]
    pub max_concurrent_runs: u64,
    #[serde(default)]
    pub next_run_at_ms: i64,
    #[serde(default)]
    pub last_run_at_ms: i64,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Chat,
    Subagent,
    Cron,
    Workforce,
}

impl RunSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RunSource::Chat => "chat",
            RunSource::Subagent => "subagent",
            RunSource::Cron => "cron",
            RunSource::Workforce => "workforce",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "chat" => Some(RunSource::Chat),
            "subagent" => Some(RunSource::Subagent),
            "cron" => Some(RunSource::Cron),
            "workforce" => Some(RunSource::Workforce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Ok,
    Error,
    Blocked,
    Escalated,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Blocked => "blocked",
            RunStatus::Escalated => "escalated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Ok | RunStatus::Error | RunStatus::Blocked)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "ok" => Some(RunStatus::Ok),
            "error" => Some(RunStatus::Error),
            "blocked" => Some(RunStatus::Blocked),
            "escalated" => Some(RunStatus::Escalated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEnvelope {
    pub run_id: String,
    pub source: RunSource,
    pub seat_id: String,
    pub action: String,
    pub risk_level: RiskLevel,
    pub policy_profile: PolicyProfile,
    pub policy_decision: PolicyOutcome,
    pub status: RunStatus,
    pub started_at_ms: i64,
    #[serde(default)]
    pub ended_at_ms: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOption {
    pub id: String,
    pub label: String,
    pub decision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Resolved,
}

impl DecisionStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(DecisionStatus::Pending),
            "resolved" => Some(DecisionStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCard {
    pub decision_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    pub seat_id: String,
    pub title: String,
    pub summary: String,
    pub options: Vec<DecisionOption>,
    pub recommended: String,
    pub risk_level: RiskLevel,
    pub status: DecisionStatus,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    #[serde(default)]
    pub resolved_at_ms: Option<i64>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl DecisionCard {
    pub fn allow_deny(
        decision_id: String,
        run_id: Option<String>,
        seat_id: &str,
        title: String,
        summary: String,
        risk_level: RiskLevel,
        now_ms: i64,
        expires_in_ms: i64,
    ) -> Self {
        Self {
            decision_id,
            run_id,
            seat_id: seat_id.to_string(),
            title,
            summary,
            options: vec![
                DecisionOption {
                    id: "allow".to_string(),
                    label: "Allow".to_string(),
                    decision: "allow".to_string(),
                },
                DecisionOption {
                    id: "deny".to_string(),
                    label: "Deny".to_string(),
                    decision: "deny".to_string(),
                },
            ],
            recommended: "allow".to_string(),
            risk_level,
            status: DecisionStatus::Pending,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + expires_in_ms,
            resolved_at_ms: None,
            resolved_by: None,
            resolution: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub decision_id: Option<String>,
    pub actor: String,
    pub action: String,
    pub outcome: String,
    pub ts: i64,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub signature: String,
}

impl Receipt {
    /// Builds a receipt whose signature covers every other field, making the
    /// record tamper-evident.
    #[allow(clippy::too_many_arguments)]
    pub fn signed(
        receipt_id: String,
        run_id: Option<String>,
        decision_id: Option<String>,
        actor: &str,
        action: &str,
        outcome: &str,
        ts: i64,
        artifacts: Vec<String>,
    ) -> Self {
        let mut receipt = Self {
            receipt_id,
            run_id,
            decision_id,
            actor: actor.to_string(),
            action: action.to_string(),
            outcome: outcome.to_string(),
            ts,
            artifacts,
            signature: String::new(),
        };
        receipt.signature = receipt.compute_signature();
        receipt
    }

    pub fn compute_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.receipt_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.run_id.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(self.decision_id.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(self.actor.as_bytes());
        hasher.update([0]);
        hasher.update(self.action.as_bytes());
        hasher.update([0]);
        hasher.update(self.outcome.as_bytes());
        hasher.update([0]);
        hasher.update(self.ts.to_le_bytes());
        for artifact in &self.artifacts {
            hasher.update([0]);
            hasher.update(artifact.as_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub fn verify_signature(&self) -> bool {
        self.signature == self.compute_signature()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayFrame {
    pub frame_id: String,
    pub run_id: String,
    pub seq: u64,
    pub event_type: String,
    #[serde(default)]
    pub payload_ref: Option<String>,
    #[serde(default)]
    pub state_delta: Option<Value>,
    pub ts: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    #[serde(default)]
    pub appfolio_writeback_enforced: bool,
    #[serde(default)]
    pub default_channel: String,
    #[serde(default)]
    pub comms_rules: Vec<String>,
    #[serde(default)]
    pub policy_profile: PolicyProfile,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            appfolio_writeback_enforced: true,
            default_channel: "ops".to_string(),
            comms_rules: vec![
                "log every tenant-facing message through the writeback receipt flow".to_string(),
                "broadcasts go out on the ops channel unless a seat overrides it".to_string(),
            ],
            policy_profile: PolicyProfile::Balanced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFile {
    pub version: u32,
    pub initialized_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(default)]
    pub seats: Vec<SeatRuntime>,
    #[serde(default)]
    pub queues: Vec<QueueState>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub decisions: Vec<DecisionCard>,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
    #[serde(default)]
    pub replayframes: Vec<ReplayFrame>,
    #[serde(default)]
    pub runs: Vec<RunEnvelope>,
    #[serde(default)]
    pub workspace: WorkspaceState,
    #[serde(default)]
    pub seq_by_run_id: BTreeMap<String, u64>,
}

impl StoreFile {
    /// Fresh document seeded from the compiled-in roster: one idle runtime
    /// seat and one empty queue per roster entry, no schedules installed.
    pub fn seeded(now_ms: i64) -> Self {
        let seats: Vec<SeatRuntime> = roster_seats()
            .into_iter()
            .map(|seat| SeatRuntime {
                id: seat.id,
                label: seat.label,
                autonomy_mode: seat.autonomy_mode,
                permissions: seat.permissions,
                systems_access: seat.systems_access,
                status: SeatStatus::Idle,
                last_run_at_ms: 0,
            })
            .collect();
        let queues = seats
            .iter()
            .enumerate()
            .map(|(index, seat)| QueueState {
                id: format!("q-{}", seat.id),
                seat_id: seat.id.clone(),
                priority: (index as u32) + 1,
                concurrency: 2,
                backpressure_policy: if seat.systems_access.iter().any(|s| s == "queue-service") {
                    BackpressurePolicy::Block
                } else {
                    BackpressurePolicy::Defer
                },
                sla_minutes: 60,
                pending: 0,
            })
            .collect();
        Self {
            version: STORE_VERSION,
            initialized_at_ms: now_ms,
            updated_at_ms: now_ms,
            seats,
            queues,
            schedules: Vec::new(),
            decisions: Vec::new(),
            receipts: Vec::new(),
            replayframes: Vec::new(),
            runs: Vec::new(),
            workspace: WorkspaceState::default(),
            seq_by_run_id: BTreeMap::new(),
        }
    }

    pub fn seat(&self, seat_id: &str) -> Option<&SeatRuntime> {
        self.seats.iter().find(|seat| seat.id == seat_id)
    }

    pub fn seat_mut(&mut self, seat_id: &str) -> Option<&mut SeatRuntime> {
        self.seats.iter_mut().find(|seat| seat.id == seat_id)
    }

    pub fn queue_for_seat(&self, seat_id: &str) -> Option<&QueueState> {
        self.queues.iter().find(|queue| queue.seat_id == seat_id)
    }

    pub fn queue_for_seat_mut(&mut self, seat_id: &str) -> Option<&mut QueueState> {
        self.queues.iter_mut().find(|queue| queue.seat_id == seat_id)
    }

    pub fn run(&self, run_id: &str) -> Option<&RunEnvelope> {
        self.runs.iter().find(|run| run.run_id == run_id)
    }

    pub fn run_mut(&mut self, run_id: &str) -> Option<&mut RunEnvelope> {
        self.runs.iter_mut().find(|run| run.run_id == run_id)
    }

    pub fn decision(&self, decision_id: &str) -> Option<&DecisionCard> {
        self.decisions
            .iter()
            .find(|card| card.decision_id == decision_id)
    }

    pub fn decision_mut(&mut self, decision_id: &str) -> Option<&mut DecisionCard> {
        self.decisions
            .iter_mut()
            .find(|card| card.decision_id == decision_id)
    }

    /// Next replay-frame sequence number for a run. Starts at 1 and advances
    /// the per-run counter in the same document mutation as the frame append.
    pub fn next_frame_seq(&mut self, run_id: &str) -> u64 {
        let counter = self.seq_by_run_id.entry(run_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn trim_history(&mut self) {
        trim_front(&mut self.runs, MAX_RUNS);
        trim_front(&mut self.receipts, MAX_RECEIPTS);
        trim_front(&mut self.replayframes, MAX_REPLAY_FRAMES);
        trim_front(&mut self.decisions, MAX_DECISIONS);
    }
}

fn trim_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_has_one_queue_per_seat() {
        let store = StoreFile::seeded(1_000);
        assert_eq!(store.version, STORE_VERSION);
        assert_eq!(store.seats.len(), store.queues.len());
        for seat in &store.seats {
            assert!(store.queue_for_seat(&seat.id).is_some());
        }
        assert!(store.schedules.is_empty());
    }

    #[test]
    fn frame_seq_counts_from_one_per_run() {
        let mut store = StoreFile::seeded(0);
        assert_eq!(store.next_frame_seq("run-a"), 1);
        assert_eq!(store.next_frame_seq("run-a"), 2);
        assert_eq!(store.next_frame_seq("run-b"), 1);
    }

    #[test]
    fn receipt_signature_detects_tampering() {
        let receipt = Receipt::signed(
            "rcpt-1".to_string(),
            Some("run-1".to_string()),
            None,
            "operator",
            "standup.start",
            "ok",
            42,
            vec!["profile:balanced".to_string()],
        );
        assert!(receipt.verify_signature());
        let mut forged = receipt.clone();
        forged.outcome = "blocked".to_string();
        assert!(!forged.verify_signature());
    }

    #[test]
    fn trim_drops_oldest_entries_first() {
        let mut items: Vec<u32> = (0..10).collect();
        trim_front(&mut items, 4);
        assert_eq!(items, vec![6, 7, 8, 9]);
    }
}
