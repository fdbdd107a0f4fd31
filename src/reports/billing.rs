use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_SAMPLE_KEYS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillReviewSummary {
    pub row_count: usize,
    pub duplicate_groups: usize,
    pub missing_vendor: usize,
    pub missing_property: usize,
    pub missing_amount: usize,
    pub sample_duplicate_keys: Vec<String>,
}

impl BillReviewSummary {
    pub fn needs_review(&self) -> bool {
        self.duplicate_groups > 0 || self.missing_vendor > 0
    }
}

fn lookup(row: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match row.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn normalize_amount(row: &Value) -> Option<String> {
    for key in ["amount", "total", "bill_amount"] {
        match row.get(key) {
            Some(Value::Number(n)) => {
                return n.as_f64().map(|v| format!("{v:.2}"));
            }
            Some(Value::String(s)) => {
                let trimmed = s.trim().replace(['$', ','], "");
                if let Ok(parsed) = trimmed.parse::<f64>() {
                    return Some(format!("{parsed:.2}"));
                }
            }
            _ => continue,
        }
    }
    None
}

/// Duplicate/missing-field heuristic over billing rows. Rows are keyed by
/// normalized `vendor|amount|date|reference`; blanks fall back to `unknown_*`
/// sentinels so partially-filled rows still group together.
pub fn review_bill_rows(rows: &[Value]) -> BillReviewSummary {
    let mut summary = BillReviewSummary {
        row_count: rows.len(),
        ..BillReviewSummary::default()
    };
    let mut groups: BTreeMap<String, usize> = BTreeMap::new();

    for row in rows {
        let vendor = normalize_text(lookup(row, &["vendor", "vendor_name", "payee_name"]));
        let property = normalize_text(lookup(row, &["property", "property_name"]));
        let amount = normalize_amount(row);
        let date = normalize_text(lookup(row, &["bill_date", "occurred_on", "date"]));
        let reference = normalize_text(lookup(row, &["reference", "ref", "invoice_number", "bill_id"]));

        if vendor.is_none() {
            summary.missing_vendor += 1;
        }
        if property.is_none() {
            summary.missing_property += 1;
        }
        if amount.is_none() {
            summary.missing_amount += 1;
        }

        let key = format!(
            "{}|{}|{}|{}",
            vendor.unwrap_or_else(|| "unknown_vendor".to_string()),
            amount.unwrap_or_else(|| "unknown_amount".to_string()),
            date.unwrap_or_else(|| "unknown_date".to_string()),
            reference.unwrap_or_else(|| "unknown_reference".to_string()),
        );
        *groups.entry(key).or_insert(0) += 1;
    }

    for (key, occurrences) in &groups {
        if *occurrences > 1 {
            summary.duplicate_groups += 1;
            if summary.sample_duplicate_keys.len() < MAX_SAMPLE_KEYS {
                summary.sample_duplicate_keys.push(key.clone());
            }
        }
    }
    summary
}
