mod support;

use serde_json::json;
use std::collections::BTreeMap;
use support::{bill_row, page, ScriptedClient};
use tempfile::tempdir;
use workforce::orchestration::actions::{
    execute_action, record_writeback_receipt, replay_run, resolve_decision, ActionRequest,
};
use workforce::store::{init_store, load_store, StoreFile};

/// Runs a mixed workload: an allowed action, a gated one, an escalation that
/// gets resolved, a report pull, and a replay.
fn run_workload(root: &std::path::Path) {
    init_store(root, 1_000, false).expect("init");

    let allowed = ActionRequest::new("reports-analyst", "notes.write");
    let first = execute_action(root, None, &allowed, 2_000).expect("allowed");

    let gated = ActionRequest::new("queue-manager", "appfolio.comms.broadcast");
    execute_action(root, None, &gated, 3_000).expect("gated");

    record_writeback_receipt(root, "operator", Some("notice"), None, 4_000).expect("writeback");

    let escalated = ActionRequest::new("ops-lead", "retro.start");
    let outcome = execute_action(root, None, &escalated, 5_000).expect("escalated");
    let card = outcome.decision.expect("decision");
    resolve_decision(root, &card.decision_id, "allow", "lead", 6_000).expect("resolve");

    let client = ScriptedClient::new();
    client.script(
        "bill_detail",
        page(vec![bill_row("Acme", 10.0, "2024-03-01", "INV-1")], Some(1), None),
    );
    let mut report = ActionRequest::new("reports-analyst", "appfolio.report.run:bill_detail");
    report.payload = json!({});
    execute_action(root, Some(&client), &report, 7_000).expect("report");

    replay_run(root, None, &first.run.run_id, "operator", 8_000).expect("replay");
}

fn seqs_by_run(store: &StoreFile) -> BTreeMap<String, Vec<u64>> {
    let mut grouped: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for frame in &store.replayframes {
        grouped.entry(frame.run_id.clone()).or_default().push(frame.seq);
    }
    grouped
}

#[test]
fn every_receipt_signature_verifies() {
    let dir = tempdir().expect("tempdir");
    run_workload(dir.path());

    let store = load_store(dir.path()).expect("load").expect("store");
    assert!(store.receipts.len() >= 6);
    for receipt in &store.receipts {
        assert!(
            receipt.verify_signature(),
            "receipt {} fails verification",
            receipt.receipt_id
        );
    }
}

#[test]
fn replay_frames_are_contiguous_per_run() {
    let dir = tempdir().expect("tempdir");
    run_workload(dir.path());

    let store = load_store(dir.path()).expect("load").expect("store");
    let grouped = seqs_by_run(&store);
    assert!(!grouped.is_empty());
    for (run_id, mut seqs) in grouped {
        seqs.sort_unstable();
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        assert_eq!(seqs, expected, "gap in frame sequence for {run_id}");
        assert_eq!(
            store.seq_by_run_id.get(&run_id).copied(),
            Some(seqs.len() as u64),
            "stale sequence counter for {run_id}"
        );
    }
}

#[test]
fn every_run_leaves_at_least_one_receipt() {
    let dir = tempdir().expect("tempdir");
    run_workload(dir.path());

    let store = load_store(dir.path()).expect("load").expect("store");
    assert!(store.runs.len() >= 5);
    for run in &store.runs {
        assert!(
            store
                .receipts
                .iter()
                .any(|r| r.run_id.as_deref() == Some(run.run_id.as_str())),
            "run {} has no receipt",
            run.run_id
        );
        assert!(
            store
                .replayframes
                .iter()
                .any(|f| f.run_id == run.run_id && f.event_type == "run.created"),
            "run {} has no creation frame",
            run.run_id
        );
    }
}

#[test]
fn resolved_workload_leaves_queues_drained() {
    let dir = tempdir().expect("tempdir");
    run_workload(dir.path());

    let store = load_store(dir.path()).expect("load").expect("store");
    for queue in &store.queues {
        assert_eq!(queue.pending, 0, "queue {} still has pending work", queue.id);
    }
    assert!(store
        .decisions
        .iter()
        .all(|card| card.status == workforce::store::DecisionStatus::Resolved));
}

#[test]
fn terminal_runs_carry_end_timestamps() {
    let dir = tempdir().expect("tempdir");
    run_workload(dir.path());

    let store = load_store(dir.path()).expect("load").expect("store");
    for run in &store.runs {
        if run.status.is_terminal() {
            assert!(run.ended_at_ms > 0, "terminal run {} has no end time", run.run_id);
        }
    }
}
