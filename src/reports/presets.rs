use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub report_name: &'static str,
    pub seat_id: &'static str,
    pub default_interval_ms: i64,
}

impl ReportPreset {
    /// Default filter body for this preset at `now_ms`: ledgers get a
    /// trailing-30-day occurred_on window, point-in-time reports get today's
    /// as_of_to date.
    pub fn build_payload(&self, now_ms: i64) -> Map<String, Value> {
        let today = format_date(now_ms);
        let mut body = Map::new();
        match self.id {
            "bill_detail" | "vendor_ledger" => {
                body.insert(
                    "occurred_on_from".to_string(),
                    json!(format_date(now_ms - 30 * DAY_MS)),
                );
                body.insert("occurred_on_to".to_string(), json!(today));
                body.insert("paginate".to_string(), json!(true));
            }
            _ => {
                body.insert("as_of_to".to_string(), json!(today));
            }
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDef {
    pub id: &'static str,
    pub label: &'static str,
    pub preset_ids: &'static [&'static str],
}

pub fn format_date(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

pub fn parse_date(raw: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

pub fn date_range_days(from: chrono::NaiveDate, to: chrono::NaiveDate) -> i64 {
    (to - from).num_days()
}

pub fn report_presets() -> &'static [ReportPreset] {
    const PRESETS: [ReportPreset; 4] = [
        ReportPreset {
            id: "bill_detail",
            label: "Bill Detail",
            report_name: "bill_detail",
            seat_id: "reports-analyst",
            default_interval_ms: DAY_MS,
        },
        ReportPreset {
            id: "vendor_ledger",
            label: "Vendor Ledger",
            report_name: "vendor_ledger",
            seat_id: "reports-analyst",
            default_interval_ms: DAY_MS,
        },
        ReportPreset {
            id: "rent_roll",
            label: "Rent Roll",
            report_name: "rent_roll",
            seat_id: "reports-analyst",
            default_interval_ms: DAY_MS,
        },
        ReportPreset {
            id: "delinquency",
            label: "Delinquency",
            report_name: "delinquency",
            seat_id: "reports-analyst",
            default_interval_ms: DAY_MS,
        },
    ];
    &PRESETS
}

pub fn find_preset(preset_id: &str) -> Option<&'static ReportPreset> {
    report_presets().iter().find(|preset| preset.id == preset_id)
}

pub fn workflows() -> &'static [WorkflowDef] {
    const WORKFLOWS: [WorkflowDef; 2] = [
        WorkflowDef {
            id: "smart_bill_review",
            label: "Smart Bill Review",
            preset_ids: &["bill_detail", "vendor_ledger"],
        },
        WorkflowDef {
            id: "portfolio_snapshot",
            label: "Portfolio Snapshot",
            preset_ids: &["rent_roll", "delinquency"],
        },
    ];
    &WORKFLOWS
}

pub fn find_workflow(workflow_id: &str) -> Option<&'static WorkflowDef> {
    workflows().iter().find(|wf| wf.id == workflow_id)
}

/// Maps free-text operator phrases onto a preset id by keyword matching.
pub fn resolve_preset_shortcut(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    if lowered.contains("vendor") {
        return Some("vendor_ledger");
    }
    if lowered.contains("bill") || lowered.contains("invoice") {
        return Some("bill_detail");
    }
    if lowered.contains("rent roll") || lowered.contains("rent_roll") || lowered.contains("rentroll")
    {
        return Some("rent_roll");
    }
    if lowered.contains("delinquen") || lowered.contains("late rent") {
        return Some("delinquency");
    }
    None
}

pub fn resolve_workflow_shortcut(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    if lowered.contains("smart bill") || lowered.contains("bill review") {
        return Some("smart_bill_review");
    }
    if lowered.contains("portfolio") || lowered.contains("snapshot") {
        return Some("portfolio_snapshot");
    }
    None
}
