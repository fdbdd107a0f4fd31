mod support;

use support::{bill_row, page, ScriptedClient};
use tempfile::tempdir;
use workforce::orchestration::actions::{execute_action, ActionRequest};
use workforce::store::{init_store, load_store, DecisionStatus, RunStatus};

fn workflow_request(workflow_id: &str) -> ActionRequest {
    ActionRequest::new(
        "reports-analyst",
        &format!("appfolio.workflow.run:{workflow_id}"),
    )
}

#[test]
fn duplicate_bills_raise_a_review_decision() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_store(root, 1_000, false).expect("init");

    let client = ScriptedClient::new();
    client.script(
        "bill_detail",
        page(
            vec![
                bill_row("Acme Plumbing", 120.5, "2024-03-02", "INV-9"),
                bill_row("Acme Plumbing", 120.5, "2024-03-02", "INV-9"),
                bill_row("Acme Plumbing", 88.0, "2024-03-05", "INV-10"),
            ],
            Some(3),
            None,
        ),
    );
    client.script("vendor_ledger", page(Vec::new(), Some(5), None));

    let outcome =
        execute_action(root, Some(&client), &workflow_request("smart_bill_review"), 2_000)
            .expect("execute");
    assert_eq!(client.calls(), 2);
    assert_eq!(outcome.run.status, RunStatus::Ok);
    assert_eq!(outcome.run.summary, "ok=2;failed=0;duplicates=1");
    assert!(outcome
        .run
        .artifacts
        .contains(&"step:bill_detail:rows:3".to_string()));
    assert!(outcome
        .run
        .artifacts
        .contains(&"step:vendor_ledger:rows:5".to_string()));

    let store = load_store(root).expect("load").expect("store");
    let card = store
        .decisions
        .iter()
        .find(|card| card.status == DecisionStatus::Pending)
        .expect("review decision");
    assert_eq!(card.seat_id, "ops-lead");
    assert_eq!(card.title, "Smart Bill review findings: smart_bill_review");
    assert!(card.summary.contains("1 duplicate groups"));
    assert_eq!(card.run_id.as_deref(), Some(outcome.run.run_id.as_str()));
    assert_eq!(store.queue_for_seat("ops-lead").expect("queue").pending, 1);
    assert!(store
        .receipts
        .iter()
        .any(|r| r.action == "appfolio.workflow.run:smart_bill_review" && r.outcome == "escalated"));
    assert!(store
        .replayframes
        .iter()
        .any(|f| f.run_id == outcome.run.run_id && f.event_type == "appfolio.workflow.completed"));
}

#[test]
fn clean_workflow_completes_without_escalation() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_store(root, 1_000, false).expect("init");

    let client = ScriptedClient::new();
    client.script(
        "bill_detail",
        page(
            vec![
                bill_row("Acme Plumbing", 120.5, "2024-03-02", "INV-9"),
                bill_row("North Electric", 88.0, "2024-03-05", "INV-10"),
            ],
            Some(2),
            None,
        ),
    );
    client.script("vendor_ledger", page(Vec::new(), Some(4), None));

    let outcome =
        execute_action(root, Some(&client), &workflow_request("smart_bill_review"), 2_000)
            .expect("execute");
    assert_eq!(outcome.run.status, RunStatus::Ok);
    assert_eq!(outcome.run.summary, "ok=2;failed=0;duplicates=0");

    let store = load_store(root).expect("load").expect("store");
    assert!(store.decisions.is_empty());
    assert_eq!(store.queue_for_seat("ops-lead").expect("queue").pending, 0);
}

#[test]
fn failed_step_marks_the_workflow_error() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_store(root, 1_000, false).expect("init");

    // vendor_ledger left unscripted so its fetch fails.
    let client = ScriptedClient::new();
    client.script(
        "bill_detail",
        page(vec![bill_row("Acme Plumbing", 120.5, "2024-03-02", "INV-9")], Some(1), None),
    );

    let outcome =
        execute_action(root, Some(&client), &workflow_request("smart_bill_review"), 2_000)
            .expect("execute");
    assert_eq!(outcome.run.status, RunStatus::Error);
    assert_eq!(outcome.run.summary, "ok=1;failed=1;duplicates=0");
    assert_eq!(
        outcome.run.error.as_deref(),
        Some("1 workflow step(s) failed")
    );
    assert!(outcome
        .run
        .artifacts
        .iter()
        .any(|a| a.starts_with("step:vendor_ledger:error:")));

    let store = load_store(root).expect("load").expect("store");
    assert!(store
        .replayframes
        .iter()
        .any(|f| f.run_id == outcome.run.run_id && f.event_type == "appfolio.workflow.failed"));
}

#[test]
fn unknown_workflow_fails_without_network() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_store(root, 1_000, false).expect("init");

    let client = ScriptedClient::new();
    let outcome =
        execute_action(root, Some(&client), &workflow_request("nope"), 2_000).expect("execute");
    assert_eq!(client.calls(), 0);
    assert_eq!(outcome.run.status, RunStatus::Error);
    assert_eq!(outcome.run.summary, "unknown_workflow:nope");
}
