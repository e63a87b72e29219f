//! JSON parsing helpers for extraction responses
//!
//! Models often wrap the JSON payload in extra text, and Brazilian bills
//! print numbers and dates in local formats.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::TariffFlag;

use super::types::{BillCandidate, RawBillExtraction};

/// Parse a bill candidate from a model response
pub fn parse_bill_response(response: &str) -> Result<BillCandidate> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    let raw: RawBillExtraction = match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                let truncated = if json_str.chars().count() > 200 {
                    format!("{}...", json_str.chars().take(200).collect::<String>())
                } else {
                    json_str.to_string()
                };
                Error::InvalidData(format!("Invalid bill JSON: {} | Raw: {}", e, truncated))
            })?
        }
        _ => {
            return Err(Error::InvalidData(
                "No JSON found in extraction response".into(),
            ))
        }
    };

    Ok(normalize(raw))
}

/// Turn loosely-typed model output into a candidate
pub fn normalize(raw: RawBillExtraction) -> BillCandidate {
    let tariff_flag = match raw.tariff_flag.as_deref() {
        Some(label) => label.parse().unwrap_or_else(|_| {
            warn!(label = %label, "Unrecognized tariff flag, using unknown");
            TariffFlag::Unknown
        }),
        None => TariffFlag::Unknown,
    };

    BillCandidate {
        total_cost: raw.total_cost.as_ref().and_then(parse_amount),
        consumption_kwh: raw.consumption_kwh.as_ref().and_then(parse_amount),
        tariff_flag,
        surcharge: raw.surcharge.as_ref().and_then(parse_amount),
        period_start: raw.period_start.as_deref().and_then(parse_bill_date),
        period_end: raw.period_end.as_deref().and_then(parse_bill_date),
        due_date: raw.due_date.as_deref().and_then(parse_bill_date),
        confidence: raw.confidence.as_ref().and_then(parse_confidence),
        next_reading: raw.next_reading.as_deref().and_then(parse_bill_date),
        reference_month: raw
            .reference_month
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty()),
    }
}

/// Parse a number that may be a JSON number or a localized string
///
/// `"R$ 1.234,56"`, `"1234.56"`, `"210,5 kWh"` and `1234.56` all parse. A
/// lone dot followed by exactly three digits groups thousands, as on
/// Brazilian bills: `"1.234 kWh"` is 1234.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount_str(s),
        _ => None,
    }
}

fn parse_amount_str(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        // Comma after the last dot is the decimal separator: 1.234,56
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        // Dot after the last comma: 1,234.56
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) if cleaned.matches(',').count() > 1 => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        (None, Some(d)) if is_thousands_dot(&cleaned, d) => cleaned.replace('.', ""),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Dots (with no comma present) that group thousands: `1.234`, `1.234.567`
///
/// A leading group of `0` is a decimal fraction (`0.925`).
fn is_thousands_dot(cleaned: &str, last_dot: usize) -> bool {
    let lead = cleaned.trim_start_matches('-');
    if lead.is_empty() || lead.starts_with('0') || lead.starts_with('.') {
        return false;
    }
    cleaned.matches('.').count() > 1 || cleaned.len() - last_dot - 1 == 3
}

/// Parse a bill date: ISO (`2024-01-20`) or Brazilian (`20/01/2024`, `20/01/24`)
pub fn parse_bill_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // %Y would read "24" as year 24, so short forms go first
    if s.len() == 8 {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%y") {
            return Some(d);
        }
    }
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Confidence in [0, 1]; percentages (e.g. 85) are scaled down
fn parse_confidence(value: &Value) -> Option<f64> {
    let v = parse_amount(value)?;
    let v = if v > 1.0 && v <= 100.0 { v / 100.0 } else { v };
    (0.0..=1.0).contains(&v).then_some(v)
}
