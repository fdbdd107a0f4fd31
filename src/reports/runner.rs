use super::billing::{review_bill_rows, BillReviewSummary};
use super::client::{ReportClient, ReportClientError};
use super::payload::{build_report_body, validate_report_body, ReportFilters};
use super::presets::{find_preset, find_workflow, ReportPreset};
use crate::orchestration::{increment_queue_pending, push_frame, push_receipt};
use crate::policy::RiskLevel;
use crate::roster::REVIEW_SEAT_ID;
use crate::shared::ids;
use crate::shared::logging::append_workforce_log_line;
use crate::store::{mutate_store, DecisionCard, RunStatus, StoreError};
use serde_json::{Map, Value};
use std::path::Path;

pub const DEFAULT_MAX_PAGES: u64 = 3;
pub const CEILING_MAX_PAGES: u64 = 20;
pub const DEFAULT_MAX_ROWS: u64 = 15_000;
pub const CEILING_MAX_ROWS: u64 = 200_000;
pub const DEFAULT_WORKFLOW_ROW_LIMIT: u64 = 5_000;
pub const CEILING_WORKFLOW_ROW_LIMIT: u64 = 50_000;

const DECISION_EXPIRY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationBudget {
    pub max_pages: u64,
    pub max_rows: u64,
}

impl PaginationBudget {
    pub fn from_filters(filters: &ReportFilters) -> Self {
        Self {
            max_pages: filters
                .max_pages
                .unwrap_or(DEFAULT_MAX_PAGES)
                .clamp(1, CEILING_MAX_PAGES),
            max_rows: filters
                .max_rows
                .unwrap_or(DEFAULT_MAX_ROWS)
                .clamp(1, CEILING_MAX_ROWS),
        }
    }

    pub fn for_row_collection(filters: &ReportFilters) -> Self {
        Self {
            max_pages: CEILING_MAX_PAGES,
            max_rows: filters
                .row_limit
                .unwrap_or(DEFAULT_WORKFLOW_ROW_LIMIT)
                .clamp(1, CEILING_WORKFLOW_ROW_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageAggregate {
    pub rows: Vec<Value>,
    pub count: Option<u64>,
    pub pages_fetched: u64,
    pub truncated: bool,
}

/// Follows `next_page_url` strictly one page at a time until the chain ends or
/// the budget is spent. The aggregate count is reported only when every page
/// carried a numeric count.
pub fn fetch_report_pages(
    client: &dyn ReportClient,
    report_name: &str,
    body: &Map<String, Value>,
    include_rows: bool,
    budget: PaginationBudget,
) -> Result<PageAggregate, ReportClientError> {
    let auto_paginate = body
        .get("paginate")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut aggregate = PageAggregate {
        count: Some(0),
        ..PageAggregate::default()
    };

    let mut next_page: Option<String> = None;
    loop {
        let remaining_rows = budget.max_rows.saturating_sub(aggregate.rows.len() as u64);
        let page = match &next_page {
            None => client.run_report(report_name, body, "POST", include_rows, remaining_rows)?,
            Some(url) => client.run_report_next_page(url, include_rows, remaining_rows)?,
        };
        if !page.ok {
            return Err(ReportClientError::Request(format!(
                "status {}: {}",
                page.status,
                page.error.unwrap_or_default()
            )));
        }
        aggregate.pages_fetched += 1;
        aggregate.count = match (aggregate.count, page.count) {
            (Some(total), Some(count)) => Some(total + count),
            _ => None,
        };
        aggregate.rows.extend(page.rows);
        if aggregate.rows.len() as u64 > budget.max_rows {
            aggregate.rows.truncate(budget.max_rows as usize);
            aggregate.truncated = true;
        }

        next_page = page.next_page_url.filter(|url| !url.trim().is_empty());
        if next_page.is_none() || !auto_paginate {
            aggregate.truncated = aggregate.truncated || (next_page.is_some() && auto_paginate);
            break;
        }
        if aggregate.pages_fetched >= budget.max_pages
            || aggregate.rows.len() as u64 >= budget.max_rows
        {
            aggregate.truncated = true;
            break;
        }
    }
    Ok(aggregate)
}

fn record_report_failure(
    state_root: &Path,
    run_id: &str,
    action: &str,
    actor: &str,
    message: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    mutate_store(state_root, now_ms, |store| {
        if let Some(run) = store.run_mut(run_id) {
            run.status = RunStatus::Error;
            run.error = Some(message.to_string());
            run.summary = message.to_string();
            run.ended_at_ms = now_ms;
        }
        push_frame(
            store,
            run_id,
            "appfolio.report.failed",
            Some(message.to_string()),
            "workforce",
            now_ms,
        )?;
        push_receipt(
            store,
            Some(run_id),
            None,
            actor,
            action,
            "error",
            vec![format!("error:{message}")],
            now_ms,
        )?;
        Ok::<_, StoreError>(())
    })?;
    let _ = append_workforce_log_line(
        state_root,
        &format!("{now_ms} report run={run_id} failed={message}"),
    );
    Ok(())
}

struct PreparedReport {
    preset: &'static ReportPreset,
    body: Map<String, Value>,
    warnings: Vec<String>,
}

fn prepare_report(
    preset_id: &str,
    filters: &ReportFilters,
    now_ms: i64,
) -> Result<PreparedReport, String> {
    let preset = find_preset(preset_id).ok_or_else(|| format!("unknown_report_preset:{preset_id}"))?;
    let body = build_report_body(preset, filters, now_ms);
    let validation = validate_report_body(preset_id, &body);
    if !validation.is_ok() {
        return Err(validation.errors.join(";"));
    }
    Ok(PreparedReport {
        preset,
        body,
        warnings: validation.warnings,
    })
}

/// Executes a `appfolio.report.run:<preset>` action after policy evaluation.
/// Validation failures and non-allow policy decisions mark the run `error`
/// without any network traffic; pagination truncation is a warning, not a
/// failure.
#[allow(clippy::too_many_arguments)]
pub fn run_report_job(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    run_id: &str,
    preset_id: &str,
    payload: &Value,
    policy_allowed: bool,
    actor: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    let action = format!("appfolio.report.run:{preset_id}");
    if !policy_allowed {
        return record_report_failure(
            state_root,
            run_id,
            &action,
            actor,
            "policy_decision_not_allow",
            now_ms,
        );
    }
    let filters = match ReportFilters::from_payload(payload) {
        Ok(filters) => filters,
        Err(message) => {
            return record_report_failure(state_root, run_id, &action, actor, &message, now_ms)
        }
    };
    let prepared = match prepare_report(preset_id, &filters, now_ms) {
        Ok(prepared) => prepared,
        Err(message) => {
            return record_report_failure(state_root, run_id, &action, actor, &message, now_ms)
        }
    };
    let Some(client) = client else {
        return record_report_failure(
            state_root,
            run_id,
            &action,
            actor,
            "report_client_unconfigured",
            now_ms,
        );
    };

    let budget = PaginationBudget::from_filters(&filters);
    let aggregate = match fetch_report_pages(
        client,
        prepared.preset.report_name,
        &prepared.body,
        true,
        budget,
    ) {
        Ok(aggregate) => aggregate,
        Err(err) => {
            return record_report_failure(state_root, run_id, &action, actor, &err.to_string(), now_ms)
        }
    };

    let count_text = aggregate
        .count
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let summary = format!(
        "rows={};pages={};count={}",
        aggregate.rows.len(),
        aggregate.pages_fetched,
        count_text
    );
    mutate_store(state_root, now_ms, |store| {
        let mut artifacts = vec![
            format!("report:{preset_id}"),
            format!("rows:{}", aggregate.rows.len()),
            format!("pages:{}", aggregate.pages_fetched),
            format!("count:{count_text}"),
        ];
        for warning in &prepared.warnings {
            artifacts.push(format!("warning:{warning}"));
        }
        if aggregate.truncated {
            artifacts.push("warning:pagination_truncated".to_string());
        }
        if let Some(run) = store.run_mut(run_id) {
            run.summary = summary.clone();
            run.ended_at_ms = now_ms;
            run.artifacts.extend(artifacts.clone());
        }
        push_frame(
            store,
            run_id,
            "appfolio.report.completed",
            Some(summary.clone()),
            "workforce",
            now_ms,
        )?;
        push_receipt(store, Some(run_id), None, actor, &action, "ok", artifacts, now_ms)?;
        Ok::<_, StoreError>(())
    })
}

struct WorkflowStepResult {
    preset_id: String,
    outcome: Result<PageAggregate, String>,
    bill_review: Option<BillReviewSummary>,
}

/// Executes a `appfolio.workflow.run:<workflow>` action: each preset step in
/// order, with row-level collection and the duplicate heuristic on the
/// bill_detail step. Findings raise a medium-risk decision card against the
/// review seat.
#[allow(clippy::too_many_arguments)]
pub fn run_workflow_job(
    state_root: &Path,
    client: Option<&dyn ReportClient>,
    run_id: &str,
    workflow_id: &str,
    payload: &Value,
    policy_allowed: bool,
    actor: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    let action = format!("appfolio.workflow.run:{workflow_id}");
    if !policy_allowed {
        return record_report_failure(
            state_root,
            run_id,
            &action,
            actor,
            "policy_decision_not_allow",
            now_ms,
        );
    }
    let Some(workflow) = find_workflow(workflow_id) else {
        return record_report_failure(
            state_root,
            run_id,
            &action,
            actor,
            &format!("unknown_workflow:{workflow_id}"),
            now_ms,
        );
    };
    let filters = match ReportFilters::from_payload(payload) {
        Ok(filters) => filters,
        Err(message) => {
            return record_report_failure(state_root, run_id, &action, actor, &message, now_ms)
        }
    };
    let Some(client) = client else {
        return record_report_failure(
            state_root,
            run_id,
            &action,
            actor,
            "report_client_unconfigured",
            now_ms,
        );
    };

    // All network traffic happens up front; ledger mutation follows in one
    // transaction once every step has a result.
    let mut step_results = Vec::new();
    for preset_id in workflow.preset_ids {
        let is_bill_step = *preset_id == "bill_detail";
        let outcome = match prepare_report(preset_id, &filters, now_ms) {
            Err(message) => Err(message),
            Ok(prepared) => {
                let budget = if is_bill_step {
                    PaginationBudget::for_row_collection(&filters)
                } else {
                    PaginationBudget::from_filters(&filters)
                };
                let mut body = prepared.body;
                if is_bill_step {
                    body.insert("paginate".to_string(), Value::Bool(true));
                }
                fetch_report_pages(client, prepared.preset.report_name, &body, is_bill_step, budget)
                    .map_err(|err| err.to_string())
            }
        };
        let bill_review = match (&outcome, is_bill_step) {
            (Ok(aggregate), true) => Some(review_bill_rows(&aggregate.rows)),
            _ => None,
        };
        step_results.push(WorkflowStepResult {
            preset_id: preset_id.to_string(),
            outcome,
            bill_review,
        });
    }

    let ok_count = step_results.iter().filter(|s| s.outcome.is_ok()).count();
    let failed_count = step_results.len() - ok_count;
    let review = step_results.iter().find_map(|s| s.bill_review.clone());
    let duplicates = review.as_ref().map(|r| r.duplicate_groups).unwrap_or(0);
    let summary = format!("ok={ok_count};failed={failed_count};duplicates={duplicates}");

    let decision_id = if review.as_ref().map(|r| r.needs_review()).unwrap_or(false) {
        Some(ids::new_decision_id(now_ms).map_err(StoreError::Invalid)?)
    } else {
        None
    };

    mutate_store(state_root, now_ms, |store| {
        let mut artifacts = Vec::new();
        for step in &step_results {
            match &step.outcome {
                Ok(aggregate) => {
                    let rows_text = match (&step.bill_review, aggregate.count) {
                        (Some(review), _) => review.row_count.to_string(),
                        (None, Some(count)) => count.to_string(),
                        (None, None) => "unknown".to_string(),
                    };
                    let endpoint = find_preset(&step.preset_id)
                        .map(|preset| preset.report_name.to_string())
                        .unwrap_or_else(|| step.preset_id.clone());
                    artifacts.push(format!("step:{}:rows:{rows_text}", step.preset_id));
                    artifacts.push(format!("step:{}:endpoint:{endpoint}", step.preset_id));
                }
                Err(message) => {
                    artifacts.push(format!("step:{}:error:{message}", step.preset_id));
                }
            }
        }

        if let Some(review) = &review {
            artifacts.push(format!("duplicates:{}", review.duplicate_groups));
            artifacts.push(format!("missing_vendor:{}", review.missing_vendor));
        }

        if let (Some(decision_id), Some(review)) = (&decision_id, &review) {
            let card = DecisionCard::allow_deny(
                decision_id.clone(),
                Some(run_id.to_string()),
                REVIEW_SEAT_ID,
                format!("Smart Bill review findings: {workflow_id}"),
                format!(
                    "{} rows; {} duplicate groups; {} rows missing vendor; samples: {}",
                    review.row_count,
                    review.duplicate_groups,
                    review.missing_vendor,
                    review.sample_duplicate_keys.join(", ")
                ),
                RiskLevel::Medium,
                now_ms,
                DECISION_EXPIRY_MS,
            );
            store.decisions.push(card);
            increment_queue_pending(store, REVIEW_SEAT_ID);
            push_frame(
                store,
                run_id,
                "decision.created",
                Some(decision_id.clone()),
                "workforce",
                now_ms,
            )?;
            push_receipt(
                store,
                Some(run_id),
                Some(decision_id),
                actor,
                &action,
                "escalated",
                vec![format!("decision:{decision_id}")],
                now_ms,
            )?;
            artifacts.push(format!("decision:{decision_id}"));
        }

        let status = if failed_count == 0 {
            RunStatus::Ok
        } else {
            RunStatus::Error
        };
        if let Some(run) = store.run_mut(run_id) {
            run.status = status;
            run.summary = summary.clone();
            run.ended_at_ms = now_ms;
            if failed_count > 0 {
                run.error = Some(format!("{failed_count} workflow step(s) failed"));
            }
            run.artifacts.extend(artifacts.clone());
        }
        let event = if failed_count == 0 {
            "appfolio.workflow.completed"
        } else {
            "appfolio.workflow.failed"
        };
        push_frame(store, run_id, event, Some(summary.clone()), "workforce", now_ms)?;
        push_receipt(
            store,
            Some(run_id),
            None,
            actor,
            &action,
            if failed_count == 0 { "ok" } else { "error" },
            artifacts,
            now_ms,
        )?;
        Ok::<_, StoreError>(())
    })
}
