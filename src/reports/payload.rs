use super::presets::{date_range_days, parse_date, ReportPreset};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const WARN_RANGE_DAYS: i64 = 366;

/// Typed, preset-scoped filter overrides. Known fields are explicit; anything
/// else rides in `extra` and replaces the matching default key outright
/// (objects merge one level deep).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReportFilters {
    pub occurred_on_from: Option<String>,
    pub occurred_on_to: Option<String>,
    pub as_of_to: Option<String>,
    pub property_ids: Option<Vec<Value>>,
    pub vendor_ids: Option<Vec<Value>>,
    pub paginate: Option<bool>,
    pub max_pages: Option<u64>,
    pub max_rows: Option<u64>,
    pub row_limit: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReportFilters {
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        match payload.get("reportFilters") {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|err| format!("invalid_report_filters:{err}")),
        }
    }
}

fn merge_override(body: &mut Map<String, Value>, key: &str, value: &Value) {
    match (body.get_mut(key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                existing.insert(k.clone(), v.clone());
            }
        }
        _ => {
            body.insert(key.to_string(), value.clone());
        }
    }
}

/// Builds the request body: preset defaults first, operator overrides on top.
pub fn build_report_body(
    preset: &ReportPreset,
    filters: &ReportFilters,
    now_ms: i64,
) -> Map<String, Value> {
    let mut body = preset.build_payload(now_ms);
    if let Some(v) = &filters.occurred_on_from {
        body.insert("occurred_on_from".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &filters.occurred_on_to {
        body.insert("occurred_on_to".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &filters.as_of_to {
        body.insert("as_of_to".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &filters.property_ids {
        body.insert("property_ids".to_string(), Value::Array(v.clone()));
    }
    if let Some(v) = &filters.vendor_ids {
        body.insert("vendor_ids".to_string(), Value::Array(v.clone()));
    }
    if let Some(v) = filters.paginate {
        body.insert("paginate".to_string(), Value::Bool(v));
    }
    for (key, value) in &filters.extra {
        merge_override(&mut body, key, value);
    }
    body
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ReportValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn body_date(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn require_date(
    body: &Map<String, Value>,
    key: &str,
    validation: &mut ReportValidation,
) -> Option<chrono::NaiveDate> {
    let Some(raw) = body_date(body, key) else {
        validation.errors.push(format!("missing_required_filter:{key}"));
        return None;
    };
    match parse_date(&raw) {
        Some(date) => Some(date),
        None => {
            validation.errors.push(format!("invalid_date:{key}"));
            None
        }
    }
}

/// Per-preset required-filter rules. Ledger presets need a valid
/// `occurred_on_from ≤ occurred_on_to` range; point-in-time presets need a
/// single `as_of_to`. Ranges past a year warn without failing.
pub fn validate_report_body(preset_id: &str, body: &Map<String, Value>) -> ReportValidation {
    let mut validation = ReportValidation::default();
    if preset_id == "bill_detail" || preset_id.starts_with("vendor_ledger") {
        let from = require_date(body, "occurred_on_from", &mut validation);
        let to = require_date(body, "occurred_on_to", &mut validation);
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                validation
                    .errors
                    .push("invalid_date_range:occurred_on".to_string());
            } else if date_range_days(from, to) > WARN_RANGE_DAYS {
                validation
                    .warnings
                    .push("date_range_exceeds_366_days".to_string());
            }
        }
    } else {
        require_date(body, "as_of_to", &mut validation);
    }
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::presets::find_preset;
    use serde_json::json;

    const NOW_MS: i64 = 1_711_843_200_000; // 2024-03-31

    #[test]
    fn overrides_replace_defaults() {
        let preset = find_preset("bill_detail").expect("preset");
        let filters = ReportFilters {
            occurred_on_from: Some("2024-01-01".to_string()),
            ..ReportFilters::default()
        };
        let body = build_report_body(preset, &filters, NOW_MS);
        assert_eq!(
            body.get("occurred_on_from").and_then(Value::as_str),
            Some("2024-01-01")
        );
        assert_eq!(
            body.get("occurred_on_to").and_then(Value::as_str),
            Some("2024-03-31")
        );
    }

    #[test]
    fn extra_filter_keys_pass_through_and_objects_merge() {
        let preset = find_preset("bill_detail").expect("preset");
        let filters = ReportFilters::from_payload(&json!({
            "reportFilters": {
                "occurred_on_to": "2024-02-29",
                "columns": {"include": ["amount", "vendor"]}
            }
        }))
        .expect("filters");
        let body = build_report_body(preset, &filters, NOW_MS);
        assert_eq!(
            body.get("occurred_on_to").and_then(Value::as_str),
            Some("2024-02-29")
        );
        assert_eq!(
            body.get("columns"),
            Some(&json!({"include": ["amount", "vendor"]}))
        );

        let mut seeded = body.clone();
        merge_override(&mut seeded, "columns", &json!({"exclude": ["memo"]}));
        assert_eq!(
            seeded.get("columns"),
            Some(&json!({"include": ["amount", "vendor"], "exclude": ["memo"]}))
        );
    }

    #[test]
    fn missing_bill_detail_range_yields_one_error_per_key() {
        let body = Map::new();
        let validation = validate_report_body("bill_detail", &body);
        assert_eq!(
            validation.errors,
            vec![
                "missing_required_filter:occurred_on_from".to_string(),
                "missing_required_filter:occurred_on_to".to_string(),
            ]
        );
    }

    #[test]
    fn inverted_range_is_an_error_and_long_range_a_warning() {
        let mut body = Map::new();
        body.insert("occurred_on_from".to_string(), json!("2024-02-01"));
        body.insert("occurred_on_to".to_string(), json!("2024-01-01"));
        let validation = validate_report_body("vendor_ledger", &body);
        assert_eq!(validation.errors, vec!["invalid_date_range:occurred_on"]);

        body.insert("occurred_on_from".to_string(), json!("2020-01-01"));
        body.insert("occurred_on_to".to_string(), json!("2024-01-01"));
        let validation = validate_report_body("vendor_ledger", &body);
        assert!(validation.is_ok());
        assert_eq!(validation.warnings, vec!["date_range_exceeds_366_days"]);
    }

    #[test]
    fn rent_roll_requires_a_single_parseable_as_of_date() {
        let mut body = Map::new();
        let validation = validate_report_body("rent_roll", &body);
        assert_eq!(validation.errors, vec!["missing_required_filter:as_of_to"]);

        body.insert("as_of_to".to_string(), json!("03/31/2024"));
        let validation = validate_report_body("rent_roll", &body);
        assert_eq!(validation.errors, vec!["invalid_date:as_of_to"]);
    }
}
