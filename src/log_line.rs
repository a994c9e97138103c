//! Display formatting and severity classification of raw log lines.
//!
//! Lines are heterogeneous: structured JSON records (flat or with a nested
//! `http` object) mixed with plain text. Every function here falls back to
//! the raw text when a line carries no usable structure.

use clap::ValueEnum;
use serde_json::{Map, Number, Value};

/// Display category of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
    ServerError,
    ClientError,
    Redirect,
    Success,
    Plain,
}

/// Client-side view filter over classified lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FilterLevel {
    #[default]
    All,
    /// 4xx and 5xx lines only
    Errors,
    /// 2xx lines only
    Success,
}

impl FilterLevel {
    pub fn matches(self, severity: Severity) -> bool {
        match self {
            FilterLevel::All => true,
            FilterLevel::Errors => {
                matches!(severity, Severity::ClientError | Severity::ServerError)
            }
            FilterLevel::Success => severity == Severity::Success,
        }
    }
}

const SERVER_ERROR_MARKERS: [&str; 3] = [" 500 ", " 502 ", " 503 "];
const CLIENT_ERROR_MARKERS: [&str; 4] = [" 404 ", " 400 ", " 401 ", " 403 "];
const SUCCESS_MARKERS: [&str; 3] = [" 200 ", " 201 ", " 204 "];
const REDIRECT_MARKERS: [&str; 3] = [" 301 ", " 302 ", " 304 "];

fn parse_record(line: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(record)) => Some(record),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<&Number> {
    match value {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn nested<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    record.get("http").and_then(|http| http.get(key))
}

/// Flat string field, or the nested `http.*` one when the flat field is not a string.
fn string_field<'a>(record: &'a Map<String, Value>, flat: &str, http_key: &str) -> &'a str {
    record
        .get(flat)
        .and_then(Value::as_str)
        .or_else(|| nested(record, http_key).and_then(Value::as_str))
        .unwrap_or("")
}

fn number_field<'a>(
    record: &'a Map<String, Value>,
    flat: &str,
    http_key: &str,
) -> Option<&'a Number> {
    record
        .get(flat)
        .and_then(as_number)
        .or_else(|| nested(record, http_key).and_then(as_number))
}

/// `status` wins whenever it is present and non-null, even if it is not numeric.
fn status_of(record: &Map<String, Value>) -> Option<&Number> {
    match record.get("status") {
        Some(status) if !status.is_null() => as_number(status),
        _ => nested(record, "status_code").and_then(as_number),
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(format_float).unwrap_or_default()
    }
}

/// Decimal notation between 1e-6 and 1e21, exponent notation (`1e+21`, `1.5e-7`) outside.
fn format_float(f: f64) -> String {
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        let exp = format!("{:e}", f);
        return match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        };
    }
    // f64 Display already drops a zero fraction: 12.0 -> "12"
    f.to_string()
}

/// Stringifies a field the way a browser template would, empty for falsy values.
fn display_value(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::Bool(true) => "true".to_string(),
        Value::Number(n) if n.as_f64() == Some(0.0) => String::new(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                Value::Bool(false) => "false".to_string(),
                Value::Number(n) => format_number(n),
                other => display_value(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Renders a line for display.
///
/// Access records become `timestamp method url status [duration]ms [uid=] [ip=]`,
/// application events become `timestamp level event [- message]`, anything
/// else is returned unchanged.
pub fn format_line(line: &str) -> String {
    let Some(record) = parse_record(line) else {
        return line.to_string();
    };

    let timestamp = record.get("timestamp").and_then(Value::as_str).unwrap_or("");
    let method = string_field(&record, "method", "method");
    let url = string_field(&record, "url", "path");

    if !method.is_empty() && !url.is_empty() {
        if let Some(status) = status_of(&record) {
            let mut out = format!("{} {} {} {}", timestamp, method, url, format_number(status));
            if let Some(duration) = number_field(&record, "duration_ms", "response_time_ms") {
                out.push_str(&format!(" {}ms", format_number(duration)));
            }
            for (label, key) in [("uid", "user_id"), ("ip", "client_ip")] {
                let value = record.get(key).map(display_value).unwrap_or_default();
                if !value.is_empty() {
                    out.push_str(&format!(" {}={}", label, value));
                }
            }
            return out.trim().to_string();
        }
    }

    let level = record.get("level").and_then(Value::as_str).unwrap_or("");
    let event = record.get("event").and_then(Value::as_str).unwrap_or("");
    if !level.is_empty() && !event.is_empty() {
        let mut out = format!("{} {} {}", timestamp, level, event);
        if let Some(message) = record.get("message").and_then(Value::as_str) {
            if !message.is_empty() {
                out.push_str(" - ");
                out.push_str(message);
            }
        }
        return out.trim().to_string();
    }

    line.to_string()
}

/// Derives the severity of a line: structured level first, then HTTP status,
/// then status-looking substrings of the raw text.
pub fn classify(line: &str) -> Severity {
    if let Some(record) = parse_record(line) {
        match record.get("level").and_then(Value::as_str) {
            Some("ERROR" | "FATAL") => return Severity::Error,
            Some("WARN") => return Severity::Warn,
            Some("INFO") => return Severity::Info,
            Some("DEBUG" | "TRACE") => return Severity::Debug,
            _ => {}
        }

        if let Some(status) = status_of(&record).and_then(Number::as_f64) {
            if status >= 500.0 {
                return Severity::ServerError;
            }
            if status >= 400.0 {
                return Severity::ClientError;
            }
            if status >= 300.0 {
                return Severity::Redirect;
            }
            if status >= 200.0 {
                return Severity::Success;
            }
        }
    }

    let contains_any = |markers: &[&str]| markers.iter().any(|m| line.contains(m));
    if contains_any(&SERVER_ERROR_MARKERS) {
        Severity::ServerError
    } else if contains_any(&CLIENT_ERROR_MARKERS) {
        Severity::ClientError
    } else if contains_any(&SUCCESS_MARKERS) {
        Severity::Success
    } else if contains_any(&REDIRECT_MARKERS) {
        Severity::Redirect
    } else {
        Severity::Plain
    }
}

/// Lines passing `level`, in their original order.
pub fn filter_lines<'a, I>(lines: I, level: FilterLevel) -> Vec<&'a String>
where
    I: IntoIterator<Item = &'a String>,
{
    lines
        .into_iter()
        .filter(|line| level.matches(classify(line)))
        .collect()
}
