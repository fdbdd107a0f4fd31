#![allow(dead_code)]

use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use workforce::reports::client::{
    ProbeResult, ReportClient, ReportClientError, ReportPage, ReportsProbe, TokenProbe,
};

/// Scripted stand-in for the AppFolio client. Pages are queued per report
/// name (or per next-page url) and handed back in order; an unscripted key
/// fails the request.
#[derive(Default)]
pub struct ScriptedClient {
    pages: RefCell<HashMap<String, VecDeque<ReportPage>>>,
    calls: Cell<usize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, key: &str, page: ReportPage) {
        self.pages
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn next(&self, key: &str) -> Result<ReportPage, ReportClientError> {
        self.calls.set(self.calls.get() + 1);
        self.pages
            .borrow_mut()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ReportClientError::Request(format!("no scripted page for `{key}`")))
    }
}

impl ReportClient for ScriptedClient {
    fn run_report(
        &self,
        report_name: &str,
        _body: &Map<String, Value>,
        _method: &str,
        include_rows: bool,
        _max_rows: u64,
    ) -> Result<ReportPage, ReportClientError> {
        let mut page = self.next(report_name)?;
        if !include_rows {
            page.rows.clear();
        }
        Ok(page)
    }

    fn run_report_next_page(
        &self,
        next_page_url: &str,
        include_rows: bool,
        _max_rows: u64,
    ) -> Result<ReportPage, ReportClientError> {
        let mut page = self.next(next_page_url)?;
        if !include_rows {
            page.rows.clear();
        }
        Ok(page)
    }

    fn probe_access(&self) -> Result<ProbeResult, ReportClientError> {
        Ok(ProbeResult {
            ok: true,
            token: TokenProbe {
                acquired: true,
                source: "scripted".to_string(),
            },
            reports: ReportsProbe {
                ok: true,
                endpoint: "scripted".to_string(),
                count: Some(0),
            },
        })
    }
}

pub fn page(rows: Vec<Value>, count: Option<u64>, next_page_url: Option<&str>) -> ReportPage {
    ReportPage {
        ok: true,
        status: 200,
        count,
        next_page_url: next_page_url.map(str::to_string),
        rows,
        error: None,
    }
}

pub fn bill_row(vendor: &str, amount: f64, date: &str, reference: &str) -> Value {
    serde_json::json!({
        "vendor": vendor,
        "property_name": "Oakridge Commons",
        "amount": amount,
        "bill_date": date,
        "invoice_number": reference,
    })
}
