use crate::roster::AutonomyMode;
use crate::store::StoreFile;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    Allow,
    Block,
    Escalate,
}

impl PolicyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyOutcome::Allow => "allow",
            PolicyOutcome::Block => "block",
            PolicyOutcome::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyProfile {
    #[default]
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "strict-change-control")]
    StrictChangeControl,
    #[serde(rename = "autonomous-ops")]
    AutonomousOps,
}

impl PolicyProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyProfile::Balanced => "balanced",
            PolicyProfile::StrictChangeControl => "strict-change-control",
            PolicyProfile::AutonomousOps => "autonomous-ops",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "balanced" => Some(PolicyProfile::Balanced),
            "strict-change-control" => Some(PolicyProfile::StrictChangeControl),
            "autonomous-ops" => Some(PolicyProfile::AutonomousOps),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Closed reason families for every policy outcome. `code()` renders the
/// legacy wire strings, so serialized output stays byte-compatible while the
/// compiler enforces exhaustive handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyReason {
    UnknownSeat { seat_id: String },
    WritebackReceiptRequired,
    QueueBackpressureBlock,
    WritebackGate,
    StrictHighRiskReview,
    StrictAutonomyReview,
    AutonomousOpsFastPath,
    ProdDeployApproval,
    AutonomyAutonomousAllow,
    AutonomySupervisedEscalation,
    AutonomyManualEscalation,
    InvalidAutonomyMode,
    ProfileDefaultAllow,
}

impl PolicyReason {
    pub fn code(&self) -> String {
        match self {
            PolicyReason::UnknownSeat { seat_id } => format!("unknown seat:{seat_id}"),
            PolicyReason::WritebackReceiptRequired => {
                "appfolio_writeback_receipt_required".to_string()
            }
            PolicyReason::QueueBackpressureBlock => "queue_backpressure_block".to_string(),
            PolicyReason::WritebackGate => "appfolio_action_requires_writeback_gate".to_string(),
            PolicyReason::StrictHighRiskReview => "strict_profile_high_risk_review".to_string(),
            PolicyReason::StrictAutonomyReview => "strict_profile_autonomy_review".to_string(),
            PolicyReason::AutonomousOpsFastPath => "autonomous_ops_fast_path".to_string(),
            PolicyReason::ProdDeployApproval => "prod_deploy_requires_approval".to_string(),
            PolicyReason::AutonomyAutonomousAllow => "autonomy_autonomous_allow".to_string(),
            PolicyReason::AutonomySupervisedEscalation => {
                "autonomy_supervised_escalation".to_string()
            }
            PolicyReason::AutonomyManualEscalation => "autonomy_manual_escalation".to_string(),
            PolicyReason::InvalidAutonomyMode => "invalid_autonomy_mode".to_string(),
            PolicyReason::ProfileDefaultAllow => "policy_profile_default_allow".to_string(),
        }
    }
}

impl Serialize for PolicyReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVerdict {
    pub decision: PolicyOutcome,
    pub reason: PolicyReason,
    pub profile: PolicyProfile,
}

impl PolicyVerdict {
    fn new(decision: PolicyOutcome, reason: PolicyReason, profile: PolicyProfile) -> Self {
        Self {
            decision,
            reason,
            profile,
        }
    }
}

/// Risk is derived from action substrings, independent of the policy verdict.
pub fn derive_risk_level(action: &str) -> RiskLevel {
    const HIGH: [&str; 4] = ["deploy", "broadcast", "security.block", "incident"];
    const MEDIUM: [&str; 4] = ["review", "approve", "retro", "standup"];
    if HIGH.iter().any(|marker| action.contains(marker)) {
        return RiskLevel::High;
    }
    if MEDIUM.iter().any(|marker| action.contains(marker)) {
        return RiskLevel::Medium;
    }
    RiskLevel::Low
}

fn has_ops_prefix(action: &str) -> bool {
    action.starts_with("queue.") || action.starts_with("scheduler.") || action.starts_with("patrol:")
}

fn has_strict_prefix(action: &str) -> bool {
    action.starts_with("deploy.") || action.starts_with("security.") || action.starts_with("incident.")
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn resolve_profile(action: &str, payload: &Value, store: &StoreFile) -> PolicyProfile {
    if let Some(profile) = payload_str(payload, "policyProfileId").and_then(PolicyProfile::parse) {
        return profile;
    }
    if has_strict_prefix(action) {
        return PolicyProfile::StrictChangeControl;
    }
    if has_ops_prefix(action) {
        return PolicyProfile::AutonomousOps;
    }
    store.workspace.policy_profile
}

/// Ordered policy evaluation; the first matching rule wins.
pub fn evaluate_policy(
    seat_id: &str,
    action: &str,
    payload: &Value,
    require_writeback_receipt: bool,
    store: &StoreFile,
) -> PolicyVerdict {
    let Some(seat) = store.seat(seat_id) else {
        return PolicyVerdict::new(
            PolicyOutcome::Block,
            PolicyReason::UnknownSeat {
                seat_id: seat_id.to_string(),
            },
            store.workspace.policy_profile,
        );
    };

    let profile = resolve_profile(action, payload, store);
    let risk = derive_risk_level(action);
    let seat_has_queue_service = seat.systems_access.iter().any(|s| s == "queue-service");

    // Writeback receipts are only demanded from seats that touch the queue
    // service, and only while the workspace enforces the gate.
    if require_writeback_receipt
        && store.workspace.appfolio_writeback_enforced
        && seat_has_queue_service
    {
        let receipt_exists = payload_str(payload, "writebackReceiptId")
            .map(|id| store.receipts.iter().any(|receipt| receipt.receipt_id == id))
            .unwrap_or(false);
        if !receipt_exists {
            return PolicyVerdict::new(
                PolicyOutcome::Block,
                PolicyReason::WritebackReceiptRequired,
                profile,
            );
        }
    }

    if let Some(queue) = store.queue_for_seat(seat_id) {
        if queue.backpressure_policy == crate::store::BackpressurePolicy::Block
            && queue.pending >= queue.concurrency.saturating_mul(4)
        {
            return PolicyVerdict::new(
                PolicyOutcome::Block,
                PolicyReason::QueueBackpressureBlock,
                profile,
            );
        }
    }

    if action.starts_with("appfolio.comms.") && !require_writeback_receipt {
        return PolicyVerdict::new(PolicyOutcome::Block, PolicyReason::WritebackGate, profile);
    }

    match profile {
        PolicyProfile::StrictChangeControl => {
            if risk == RiskLevel::High {
                return PolicyVerdict::new(
                    PolicyOutcome::Escalate,
                    PolicyReason::StrictHighRiskReview,
                    profile,
                );
            }
            if seat.autonomy_mode == AutonomyMode::Autonomous && risk != RiskLevel::Low {
                return PolicyVerdict::new(
                    PolicyOutcome::Escalate,
                    PolicyReason::StrictAutonomyReview,
                    profile,
                );
            }
        }
        PolicyProfile::AutonomousOps => {
            if seat.autonomy_mode == AutonomyMode::Supervised
                && has_ops_prefix(action)
                && risk != RiskLevel::High
            {
                return PolicyVerdict::new(
                    PolicyOutcome::Allow,
                    PolicyReason::AutonomousOpsFastPath,
                    profile,
                );
            }
        }
        PolicyProfile::Balanced => {}
    }

    if action.contains("deploy.prod") {
        return PolicyVerdict::new(
            PolicyOutcome::Escalate,
            PolicyReason::ProdDeployApproval,
            profile,
        );
    }

    match seat.autonomy_mode {
        AutonomyMode::Autonomous => PolicyVerdict::new(
            PolicyOutcome::Allow,
            PolicyReason::AutonomyAutonomousAllow,
            profile,
        ),
        AutonomyMode::Supervised => PolicyVerdict::new(
            PolicyOutcome::Escalate,
            PolicyReason::AutonomySupervisedEscalation,
            profile,
        ),
        AutonomyMode::Manual => PolicyVerdict::new(
            PolicyOutcome::Escalate,
            PolicyReason::AutonomyManualEscalation,
            profile,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StoreFile {
        StoreFile::seeded(1_000)
    }

    #[test]
    fn unknown_seat_blocks_with_seat_id_in_reason() {
        let verdict = evaluate_policy("ghost", "standup.start", &json!({}), false, &store());
        assert_eq!(verdict.decision, PolicyOutcome::Block);
        assert_eq!(verdict.reason.code(), "unknown seat:ghost");
    }

    #[test]
    fn comms_action_without_writeback_request_is_gated() {
        let verdict = evaluate_policy(
            "queue-manager",
            "appfolio.comms.broadcast",
            &json!({}),
            false,
            &store(),
        );
        assert_eq!(verdict.decision, PolicyOutcome::Block);
        assert_eq!(
            verdict.reason.code(),
            "appfolio_action_requires_writeback_gate"
        );
    }

    #[test]
    fn writeback_request_without_matching_receipt_blocks() {
        let verdict = evaluate_policy(
            "queue-manager",
            "appfolio.comms.broadcast",
            &json!({"writebackReceiptId": "rcpt-missing"}),
            true,
            &store(),
        );
        assert_eq!(verdict.decision, PolicyOutcome::Block);
        assert_eq!(verdict.reason.code(), "appfolio_writeback_receipt_required");
    }

    #[test]
    fn backpressure_block_fires_at_four_times_concurrency() {
        let mut store = store();
        {
            let queue = store.queue_for_seat_mut("queue-manager").expect("queue");
            queue.pending = queue.concurrency * 4;
        }
        let verdict = evaluate_policy("queue-manager", "standup.start", &json!({}), false, &store);
        assert_eq!(verdict.decision, PolicyOutcome::Block);
        assert_eq!(verdict.reason.code(), "queue_backpressure_block");
    }

    #[test]
    fn explicit_profile_id_in_payload_wins() {
        let verdict = evaluate_policy(
            "queue-manager",
            "notes.write",
            &json!({"policyProfileId": "strict-change-control"}),
            false,
            &store(),
        );
        assert_eq!(verdict.profile, PolicyProfile::StrictChangeControl);
    }

    #[test]
    fn strict_profile_escalates_high_risk_actions() {
        let verdict = evaluate_policy("incident-commander", "deploy.stage", &json!({}), false, &store());
        assert_eq!(verdict.profile, PolicyProfile::StrictChangeControl);
        assert_eq!(verdict.decision, PolicyOutcome::Escalate);
        assert_eq!(verdict.reason.code(), "strict_profile_high_risk_review");
    }

    #[test]
    fn autonomous_ops_fast_paths_supervised_ops_work() {
        let verdict = evaluate_policy(
            "comms-coordinator",
            "queue.rebalance",
            &json!({}),
            false,
            &store(),
        );
        assert_eq!(verdict.decision, PolicyOutcome::Allow);
        assert_eq!(verdict.reason.code(), "autonomous_ops_fast_path");
    }

    #[test]
    fn prod_deploy_always_escalates_for_approval() {
        let mut store = store();
        store.workspace.policy_profile = PolicyProfile::AutonomousOps;
        let verdict = evaluate_policy(
            "reports-analyst",
            "release.deploy.prod.us-east",
            &json!({}),
            false,
            &store,
        );
        assert_eq!(verdict.decision, PolicyOutcome::Escalate);
        assert_eq!(verdict.reason.code(), "prod_deploy_requires_approval");
    }

    #[test]
    fn autonomy_fallback_maps_modes_to_outcomes() {
        let store = store();
        let allow = evaluate_policy("reports-analyst", "notes.write", &json!({}), false, &store);
        assert_eq!(allow.decision, PolicyOutcome::Allow);
        let supervised = evaluate_policy("ops-lead", "retro.start", &json!({}), false, &store);
        assert_eq!(supervised.decision, PolicyOutcome::Escalate);
        let manual = evaluate_policy("incident-commander", "pager.ack", &json!({}), false, &store);
        assert_eq!(manual.decision, PolicyOutcome::Escalate);
    }

    #[test]
    fn risk_derivation_is_substring_driven() {
        assert_eq!(derive_risk_level("deploy.stage"), RiskLevel::High);
        assert_eq!(derive_risk_level("appfolio.comms.broadcast"), RiskLevel::High);
        assert_eq!(derive_risk_level("retro.start"), RiskLevel::Medium);
        assert_eq!(derive_risk_level("notes.write"), RiskLevel::Low);
    }
}
