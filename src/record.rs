//! Bill records as extracted from model output, plus the JSON schemas the
//! model is constrained by.
//!
//! Model responses are never trusted as-is. Every field is checked here
//! before a [`BillRecord`] exists, so the rest of the pipeline can rely on
//! the invariants documented on each type. Validation reports the first
//! problem as a plain message; callers decide whether that is fatal
//! (single-bill, classifier) or isolates one element (multi-bill).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// A calendar date as printed on a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillDate {
    /// 1–31
    pub day: u8,
    /// 1–12
    pub month: u8,
    pub year: i32,
}

impl BillDate {
    pub fn new(day: u8, month: u8, year: i32) -> Self {
        Self { day, month, year }
    }
}

impl PartialOrd for BillDate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BillDate {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.month, self.day).cmp(&(other.year, other.month, other.day))
    }
}

impl fmt::Display for BillDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}-{}", self.day, self.month, self.year)
    }
}

/// One billing period extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    /// 0-based page the fields were read from.
    pub page_no: usize,
    pub previous_date: BillDate,
    pub current_date: BillDate,
    /// Cubic metres, never negative.
    pub consumption: f64,
    /// Water charge only, never negative.
    pub total_bill: f64,
    pub sewage: Option<f64>,
    pub bill_no: String,
}

impl BillRecord {
    /// Water plus sewage; a missing sewage charge counts as zero.
    pub fn bill_amount(&self) -> f64 {
        self.total_bill + self.sewage.unwrap_or(0.0)
    }

    /// Whether the previous reading strictly precedes the current one.
    pub fn is_chronological(&self) -> bool {
        self.previous_date < self.current_date
    }

    /// Validate one JSON object produced by the model.
    ///
    /// `default_page` is used when `page_no` is absent; pass `None` to make
    /// the field required.
    pub fn from_value(value: &Value, default_page: Option<usize>) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", type_name(value)))?;

        let page_no = match (field(obj, "page_no"), default_page) {
            (Some(v), _) => non_negative_integer(v).map_err(|e| format!("page_no: {e}"))?,
            (None, Some(page)) => page,
            (None, None) => return Err("missing field 'page_no'".to_string()),
        };

        Ok(Self {
            page_no,
            previous_date: required_date(obj, "previous_date")?,
            current_date: required_date(obj, "current_date")?,
            consumption: required_amount(obj, "consumption")?,
            total_bill: required_amount(obj, "total_bill")?,
            sewage: optional_amount(obj, "sewage")?,
            bill_no: required_text(obj, "bill_no")?,
        })
    }
}

/// Result of the billing-period classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// `None` when the model answered with a blank address.
    pub address: Option<String>,
    pub is_multiple: bool,
}

impl Classification {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", type_name(value)))?;

        let is_multiple = match field(obj, "is_multiple_bills") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
            Some(other) => {
                return Err(format!(
                    "is_multiple_bills: expected a boolean, got {}",
                    type_name(other)
                ))
            }
            None => return Err("missing field 'is_multiple_bills'".to_string()),
        };

        let address = match field(obj, "address") {
            Some(Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Some(other) => {
                return Err(format!("address: expected a string, got {}", type_name(other)))
            }
            None => return Err("missing field 'address'".to_string()),
        };

        Ok(Self {
            address,
            is_multiple,
        })
    }
}

// ── Schemas ───────────────────────────────────────────────────────────────

fn date_schema(description: &str) -> Value {
    json!({
        "type": "OBJECT",
        "description": description,
        "properties": {
            "day": {
                "type": "INTEGER",
                "description": "The number of day of the month of the date, can range from 1 to 31"
            },
            "month": {
                "type": "INTEGER",
                "description": "The number of month of the year of the date, can range from 1 to 12"
            },
            "year": { "type": "INTEGER", "description": "The year of the date" }
        },
        "required": ["day", "month", "year"],
        "propertyOrdering": ["day", "month", "year"]
    })
}

/// Schema of one bill, as requested in both single- and multi-bill mode.
pub fn bill_schema() -> Value {
    let mut properties = Map::new();
    properties.insert(
        "page_no".into(),
        json!({
            "type": "INTEGER",
            "description": "The number following \"PAGE NUMBER :\" of the page this information was extracted from."
        }),
    );
    properties.insert(
        "previous_date".into(),
        date_schema("The previous date of the bill reading e.g. 2022-06-30"),
    );
    properties.insert(
        "current_date".into(),
        date_schema("The current date of the bill e.g. 03-01-2023"),
    );
    properties.insert(
        "consumption".into(),
        json!({
            "type": "NUMBER",
            "description": "The total consumption of water in m3, e.g. 2268.89"
        }),
    );
    properties.insert(
        "total_bill".into(),
        json!({
            "type": "NUMBER",
            "description": "The total current bill of water, e.g. $10,475.69"
        }),
    );
    properties.insert(
        "sewage".into(),
        json!({
            "type": "NUMBER",
            "nullable": true,
            "description": "The sewage amount if available"
        }),
    );
    properties.insert(
        "bill_no".into(),
        json!({ "type": "STRING", "description": "The serial number of the bill" }),
    );
    let required = [
        "page_no",
        "previous_date",
        "current_date",
        "consumption",
        "total_bill",
        "bill_no",
    ];
    let ordering = [
        "page_no",
        "previous_date",
        "current_date",
        "consumption",
        "total_bill",
        "sewage",
        "bill_no",
    ];
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
        "propertyOrdering": ordering,
    })
}

/// Schema of the multi-bill envelope `{"bills": [...]}`.
pub fn bills_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "bills": {
                "type": "ARRAY",
                "description": "The list of bills",
                "items": bill_schema()
            }
        },
        "required": ["bills"]
    })
}

/// Schema of the classifier answer.
pub fn classification_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "address": { "type": "STRING", "description": "The address of the bill" },
            "is_multiple_bills": {
                "type": "BOOLEAN",
                "description": "True if multiple billing periods/due dates are detected, False if single billing period"
            }
        },
        "required": ["address", "is_multiple_bills"],
        "propertyOrdering": ["address", "is_multiple_bills"]
    })
}

// ── Field helpers ─────────────────────────────────────────────────────────

/// One numeric token, optionally wrapped in a currency prefix and a unit
/// suffix: `"$10,475.69"`, `"USD 45.20"`, `"2268.89 m3"`. Anything else,
/// including a second number, fails to match.
static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*
        (?P<sign1>-)?\s*
        (?:[$€£]|usd|eur|gbp|cad|aud|nzd)?\s*
        (?P<sign2>-)?\s*
        (?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+)
        \s*
        (?:m3|m³|m\^3|cu\.?\s?m|usd|eur|gbp|cad|aud|nzd)?
        \s*$",
    )
    .unwrap()
});

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Coerce a JSON number or a numeric string such as `"$10,475.69"`.
pub fn parse_amount(v: &Value) -> Result<f64, String> {
    let n = match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{n} is not representable as f64"))?,
        Value::String(s) => {
            let caps = AMOUNT
                .captures(s)
                .ok_or_else(|| format!("'{s}' is not a single amount"))?;
            let magnitude = caps["num"]
                .replace(',', "")
                .parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number"))?;
            if caps.name("sign1").is_some() || caps.name("sign2").is_some() {
                -magnitude
            } else {
                magnitude
            }
        }
        other => return Err(format!("expected a number, got {}", type_name(other))),
    };
    if !n.is_finite() {
        return Err(format!("{n} is not finite"));
    }
    Ok(n)
}

fn required_amount(obj: &Map<String, Value>, name: &str) -> Result<f64, String> {
    let v = field(obj, name).ok_or_else(|| format!("missing field '{name}'"))?;
    let n = parse_amount(v).map_err(|e| format!("{name}: {e}"))?;
    if n < 0.0 {
        return Err(format!("{name}: {n} is negative"));
    }
    Ok(n)
}

fn optional_amount(obj: &Map<String, Value>, name: &str) -> Result<Option<f64>, String> {
    match field(obj, name) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => {
            let n = parse_amount(v).map_err(|e| format!("{name}: {e}"))?;
            if n < 0.0 {
                return Err(format!("{name}: {n} is negative"));
            }
            Ok(Some(n))
        }
    }
}

/// A JSON integer (or integral float) or a string of ASCII digits.
fn parse_integer(v: &Value) -> Result<i64, String> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(format!("{n} is not an integer")),
            }
        }
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("'{s}' is not an integer"));
            }
            t.parse::<i64>()
                .map_err(|_| format!("'{s}' is out of range"))
        }
        other => Err(format!("expected an integer, got {}", type_name(other))),
    }
}

fn non_negative_integer(v: &Value) -> Result<usize, String> {
    let n = parse_integer(v)?;
    usize::try_from(n).map_err(|_| format!("{n} is negative"))
}

fn bounded(
    obj: &Map<String, Value>,
    parent: &str,
    name: &str,
    lo: i64,
    hi: i64,
) -> Result<i64, String> {
    let v = field(obj, name).ok_or_else(|| format!("{parent}: missing field '{name}'"))?;
    let n = parse_integer(v).map_err(|e| format!("{parent}.{name}: {e}"))?;
    if n < lo || n > hi {
        return Err(format!("{parent}.{name}: {n} is outside {lo}–{hi}"));
    }
    Ok(n)
}

fn required_date(obj: &Map<String, Value>, name: &str) -> Result<BillDate, String> {
    let v = field(obj, name).ok_or_else(|| format!("missing field '{name}'"))?;
    let date = v
        .as_object()
        .ok_or_else(|| format!("{name}: expected an object, got {}", type_name(v)))?;
    Ok(BillDate {
        day: bounded(date, name, "day", 1, 31)? as u8,
        month: bounded(date, name, "month", 1, 12)? as u8,
        year: bounded(date, name, "year", 1, 9999)? as i32,
    })
}

fn required_text(obj: &Map<String, Value>, name: &str) -> Result<String, String> {
    match field(obj, name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(format!("{name}: empty string")),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("{name}: expected a string, got {}", type_name(other))),
        None => Err(format!("missing field '{name}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "page_no": 2,
            "previous_date": {"day": 1, "month": 3, "year": 2024},
            "current_date": {"day": 31, "month": 3, "year": 2024},
            "consumption": 15.5,
            "total_bill": 45.20,
            "sewage": 12.30,
            "bill_no": "WB123456789"
        })
    }

    #[test]
    fn parses_complete_record() {
        let r = BillRecord::from_value(&sample(), None).unwrap();
        assert_eq!(r.page_no, 2);
        assert_eq!(r.previous_date, BillDate::new(1, 3, 2024));
        assert_eq!(r.bill_no, "WB123456789");
        assert!((r.bill_amount() - 57.50).abs() < 1e-6);
        assert!(r.is_chronological());
    }

    #[test]
    fn missing_page_uses_default() {
        let mut v = sample();
        v.as_object_mut().unwrap().remove("page_no");
        assert_eq!(BillRecord::from_value(&v, Some(0)).unwrap().page_no, 0);
        let err = BillRecord::from_value(&v, None).unwrap_err();
        assert!(err.contains("page_no"), "got: {err}");
    }

    #[test]
    fn null_sewage_is_none_and_amount_is_water_only() {
        let mut v = sample();
        v["sewage"] = Value::Null;
        let r = BillRecord::from_value(&v, None).unwrap();
        assert_eq!(r.sewage, None);
        assert_eq!(r.bill_amount(), 45.20);
    }

    #[test]
    fn missing_consumption_is_never_defaulted() {
        let mut v = sample();
        v.as_object_mut().unwrap().remove("consumption");
        let err = BillRecord::from_value(&v, None).unwrap_err();
        assert!(err.contains("consumption"), "got: {err}");
    }

    #[test]
    fn currency_strings_are_coerced() {
        let mut v = sample();
        v["total_bill"] = json!("$10,475.69");
        v["consumption"] = json!("2268.89 m3");
        let r = BillRecord::from_value(&v, None).unwrap();
        assert_eq!(r.total_bill, 10475.69);
        assert_eq!(r.consumption, 2268.89);
    }

    #[test]
    fn garbage_amount_rejected() {
        let mut v = sample();
        v["total_bill"] = json!("n/a");
        assert!(BillRecord::from_value(&v, None).is_err());
    }

    #[test]
    fn amount_with_surrounding_text_rejected() {
        for raw in ["$45.20 for 30 days", "1.5e3", "€1.234,56", "12 of 15"] {
            let err = parse_amount(&json!(raw)).unwrap_err();
            assert!(err.contains(raw), "{raw}: {err}");
        }
    }

    #[test]
    fn amount_prefixes_and_units_accepted() {
        assert_eq!(parse_amount(&json!("USD 45.20")).unwrap(), 45.20);
        assert_eq!(parse_amount(&json!("2268.89 m^3")).unwrap(), 2268.89);
        assert_eq!(parse_amount(&json!(" £7 ")).unwrap(), 7.0);
        assert_eq!(parse_amount(&json!("-$3.10")).unwrap(), -3.10);
    }

    #[test]
    fn page_no_must_be_a_plain_integer() {
        for raw in [json!("page 2 of 5"), json!("2.5"), json!(1.5), json!(-1)] {
            let mut v = sample();
            v["page_no"] = raw.clone();
            let err = BillRecord::from_value(&v, None).unwrap_err();
            assert!(err.starts_with("page_no"), "{raw}: {err}");
        }
        let mut v = sample();
        v["page_no"] = json!(" 3 ");
        assert_eq!(BillRecord::from_value(&v, None).unwrap().page_no, 3);
    }

    #[test]
    fn date_parts_must_be_plain_integers() {
        let mut v = sample();
        v["current_date"]["day"] = json!("31st");
        let err = BillRecord::from_value(&v, None).unwrap_err();
        assert!(err.contains("current_date.day"), "got: {err}");
    }

    #[test]
    fn negative_amount_rejected() {
        let mut v = sample();
        v["consumption"] = json!(-3.0);
        let err = BillRecord::from_value(&v, None).unwrap_err();
        assert!(err.contains("negative"), "got: {err}");
    }

    #[test]
    fn month_out_of_range_rejected() {
        let mut v = sample();
        v["current_date"]["month"] = json!(13);
        let err = BillRecord::from_value(&v, None).unwrap_err();
        assert!(err.contains("current_date.month"), "got: {err}");
    }

    #[test]
    fn numeric_bill_no_accepted() {
        let mut v = sample();
        v["bill_no"] = json!(884412);
        assert_eq!(BillRecord::from_value(&v, None).unwrap().bill_no, "884412");
    }

    #[test]
    fn reversed_dates_are_not_chronological() {
        let mut v = sample();
        v["previous_date"] = json!({"day": 1, "month": 4, "year": 2024});
        let r = BillRecord::from_value(&v, None).unwrap();
        assert!(!r.is_chronological());
    }

    #[test]
    fn classification_parses_and_blank_address_is_none() {
        let c = Classification::from_value(&json!({
            "address": "123 Main Street",
            "is_multiple_bills": true
        }))
        .unwrap();
        assert!(c.is_multiple);
        assert_eq!(c.address.as_deref(), Some("123 Main Street"));

        let c = Classification::from_value(&json!({"address": "  ", "is_multiple_bills": false}))
            .unwrap();
        assert_eq!(c.address, None);
    }

    #[test]
    fn classification_requires_flag() {
        let err = Classification::from_value(&json!({"address": "x"})).unwrap_err();
        assert!(err.contains("is_multiple_bills"));
    }

    #[test]
    fn bill_schemas_ask_for_page() {
        let s = bills_schema();
        let required = &s["properties"]["bills"]["items"]["required"];
        assert!(required.as_array().unwrap().contains(&json!("page_no")));
        let single = bill_schema();
        assert_eq!(single["propertyOrdering"][0], "page_no");
        assert_eq!(single["properties"]["page_no"]["type"], "INTEGER");
    }

    #[test]
    fn date_display_is_day_first() {
        assert_eq!(BillDate::new(1, 3, 2024).to_string(), "01-03-2024");
    }
}
