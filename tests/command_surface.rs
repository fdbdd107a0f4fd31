mod support;

use serde_json::{json, Value};
use support::ScriptedClient;
use tempfile::tempdir;
use workforce::commands::dispatch;

fn init(root: &std::path::Path) {
    dispatch(root, None, "workforce.init", json!({}), 1_000).expect("init");
}

#[test]
fn init_reports_created_then_exists() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();

    let first = dispatch(root, None, "workforce.init", json!({}), 1_000).expect("init");
    assert_eq!(first["ok"], json!(true));
    assert_eq!(first["status"], json!("created"));

    let second = dispatch(root, None, "workforce.init", json!({}), 2_000).expect("reinit");
    assert_eq!(second["status"], json!("exists"));
}

#[test]
fn status_before_init_is_not_ready() {
    let dir = tempdir().expect("tempdir");
    let status = dispatch(dir.path(), None, "workforce.status", Value::Null, 1_000).expect("status");
    assert_eq!(status["ready"], json!(false));
    assert!(status["path"].as_str().expect("path").ends_with("workforce.json"));
}

#[test]
fn status_summarizes_seats_queues_and_guidance() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);

    let status = dispatch(root, None, "workforce.status", json!({}), 2_000).expect("status");
    assert_eq!(status["ready"], json!(true));
    assert_eq!(status["seats"].as_array().expect("seats").len(), 6);
    assert_eq!(status["queues"].as_array().expect("queues").len(), 6);
    assert_eq!(status["summary"]["runs"], json!(0));
    assert_eq!(status["summary"]["autonomy"]["autonomous"], json!(3));
    assert_eq!(status["summary"]["autonomy"]["supervised"], json!(2));
    assert_eq!(status["summary"]["autonomy"]["manual"], json!(1));
    assert!(!status["nextSteps"].as_array().expect("steps").is_empty());
}

#[test]
fn action_execute_round_trips_camel_case_wire_shapes() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);

    let outcome = dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "reports-analyst", "action": "notes.write"}),
        2_000,
    )
    .expect("execute");
    assert_eq!(outcome["policy"]["decision"], json!("allow"));
    assert_eq!(outcome["run"]["status"], json!("ok"));
    assert!(outcome["run"]["runId"].as_str().expect("run id").starts_with("run-"));
    assert!(outcome["receipt"]["signature"].as_str().expect("sig").len() == 64);
    assert!(outcome.get("decision").is_none());
}

#[test]
fn runs_listing_filters_by_status_and_query() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);
    dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "reports-analyst", "action": "notes.write"}),
        2_000,
    )
    .expect("allowed action");
    dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "queue-manager", "action": "appfolio.comms.broadcast"}),
        3_000,
    )
    .expect("blocked action");

    let all = dispatch(root, None, "workforce.runs", json!({}), 4_000).expect("runs");
    assert_eq!(all["runs"].as_array().expect("runs").len(), 2);
    // Newest first.
    assert_eq!(all["runs"][0]["action"], json!("appfolio.comms.broadcast"));

    let blocked = dispatch(root, None, "workforce.runs", json!({"status": "blocked"}), 4_000)
        .expect("blocked runs");
    assert_eq!(blocked["runs"].as_array().expect("runs").len(), 1);

    let queried = dispatch(root, None, "workforce.runs", json!({"query": "notes"}), 4_000)
        .expect("queried runs");
    assert_eq!(queried["runs"].as_array().expect("runs").len(), 1);
    assert_eq!(queried["runs"][0]["seatId"], json!("reports-analyst"));
}

#[test]
fn ledger_returns_receipts_frames_and_decisions() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);
    dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "ops-lead", "action": "retro.start"}),
        2_000,
    )
    .expect("escalated action");

    let ledger = dispatch(root, None, "workforce.ledger", json!({}), 3_000).expect("ledger");
    assert_eq!(ledger["receipts"].as_array().expect("receipts").len(), 1);
    assert_eq!(ledger["decisions"].as_array().expect("decisions").len(), 1);
    assert_eq!(ledger["replayframes"].as_array().expect("frames").len(), 2);

    let pending = dispatch(
        root,
        None,
        "workforce.decisions",
        json!({"status": "pending"}),
        3_000,
    )
    .expect("decisions");
    assert_eq!(pending["decisions"].as_array().expect("decisions").len(), 1);
}

#[test]
fn schedule_surface_adds_and_lists() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);

    let schedule = dispatch(
        root,
        None,
        "workforce.schedule.add",
        json!({
            "seatId": "reports-analyst",
            "name": "daily bills",
            "intervalMs": 86_400_000,
            "action": "appfolio.report.run:bill_detail",
        }),
        2_000,
    )
    .expect("schedule add");
    assert_eq!(schedule["enabled"], json!(true));

    let listed = dispatch(root, None, "workforce.schedules", json!({}), 3_000).expect("schedules");
    assert_eq!(listed["schedules"].as_array().expect("schedules").len(), 1);

    let tick = dispatch(root, None, "workforce.tick", json!({}), 3_000).expect("tick");
    assert_eq!(tick["triggered"].as_array().expect("triggered").len(), 0);
}

#[test]
fn writeback_and_probe_methods() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init(root);

    let recorded = dispatch(
        root,
        None,
        "workforce.appfolio.writeback",
        json!({"note": "notice sent"}),
        2_000,
    )
    .expect("writeback");
    assert_eq!(recorded["receipt"]["action"], json!("appfolio.comms.writeback"));

    let missing = dispatch(root, None, "workforce.appfolio.reports.probe", json!({}), 2_000)
        .expect_err("probe without client");
    assert_eq!(missing.code(), "unavailable");

    let client = ScriptedClient::new();
    let probe = dispatch(
        root,
        Some(&client),
        "workforce.appfolio.reports.probe",
        json!({}),
        2_000,
    )
    .expect("probe");
    assert_eq!(probe["ok"], json!(true));
    assert_eq!(probe["token"]["acquired"], json!(true));
}

#[test]
fn errors_carry_stable_wire_codes() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();

    let not_ready = dispatch(root, None, "workforce.runs", json!({}), 1_000)
        .expect_err("runs before init");
    assert_eq!(not_ready.code(), "not_initialized");

    init(root);

    let unknown = dispatch(root, None, "workforce.nope", json!({}), 2_000)
        .expect_err("unknown method");
    assert_eq!(unknown.code(), "unknown_method");

    let bad_params = dispatch(root, None, "workforce.action.execute", json!({}), 2_000)
        .expect_err("missing seatId");
    assert_eq!(bad_params.code(), "invalid_params");

    let bad_payload = dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "reports-analyst", "action": "notes.write", "payload": [1, 2]}),
        2_000,
    )
    .expect_err("array payload");
    assert_eq!(bad_payload.code(), "invalid_params");

    let bad_source = dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "reports-analyst", "action": "notes.write", "source": "carrier-pigeon"}),
        2_000,
    )
    .expect_err("unknown source");
    assert_eq!(bad_source.code(), "invalid_params");

    let unknown_seat = dispatch(
        root,
        None,
        "workforce.action.execute",
        json!({"seatId": "ghost", "action": "notes.write"}),
        2_000,
    )
    .expect_err("unknown seat");
    assert_eq!(unknown_seat.code(), "unknown_seat");
    assert_eq!(unknown_seat.to_wire()["code"], json!("unknown_seat"));
}
