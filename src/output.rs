//! Caller-facing result types.
//!
//! Field names are snake_case and match the JSON the HTTP layer returns:
//! `start_date`/`end_date` for the reading dates, `usage` for consumption,
//! `water` for the water charge and `bill_amount` for water plus sewage.

use crate::error::BillError;
use crate::record::BillDate;
use crate::workflow::Stage;
use serde::{Deserialize, Serialize};

/// A date in the response, `{day, month, year}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInfo {
    pub day: u8,
    pub month: u8,
    pub year: i32,
}

impl From<BillDate> for DateInfo {
    fn from(d: BillDate) -> Self {
        Self {
            day: d.day,
            month: d.month,
            year: d.year,
        }
    }
}

/// One bill as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillData {
    /// Name of the uploaded document the bill came from.
    pub file_name: String,
    pub bill_no: String,
    pub start_date: DateInfo,
    pub end_date: DateInfo,
    /// Consumption in m3.
    pub usage: f64,
    /// Water charge.
    pub water: f64,
    pub sewage: Option<f64>,
    /// `water + sewage`, missing sewage counting as zero.
    pub bill_amount: f64,
    /// Base64 PNG of the page the bill was read from.
    pub image: Option<String>,
}

/// Everything extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub address: String,
    pub bills: Vec<BillData>,
    /// Non-fatal problems (rejected records, pages without an image).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Result for one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    /// Position of the document in the batch input.
    pub index: usize,
    pub file_name: String,
    pub result: Result<ExtractResponse, BillError>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// One entry of [`BatchReport::results`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DocumentReport {
    Success {
        file_name: String,
        address: String,
        bills: Vec<BillData>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Failure {
        file_name: String,
        error: String,
        stage: Option<Stage>,
    },
}

impl From<&DocumentOutcome> for DocumentReport {
    fn from(outcome: &DocumentOutcome) -> Self {
        match &outcome.result {
            Ok(response) => DocumentReport::Success {
                file_name: outcome.file_name.clone(),
                address: response.address.clone(),
                bills: response.bills.clone(),
                warnings: response.warnings.clone(),
            },
            Err(e) => DocumentReport::Failure {
                file_name: outcome.file_name.clone(),
                error: e.to_string(),
                stage: e.stage(),
            },
        }
    }
}

/// The batch document printed by the CLI: `{"results": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: Vec<DocumentReport>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[DocumentOutcome]) -> Self {
        Self {
            results: outcomes.iter().map(DocumentReport::from).collect(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, DocumentReport::Success { .. }))
            .count()
    }

    /// True when there was at least one document and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.success_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> ExtractResponse {
        ExtractResponse {
            address: "12 Main St".into(),
            bills: vec![BillData {
                file_name: "march.pdf".into(),
                bill_no: "WB-1".into(),
                start_date: BillDate::new(1, 3, 2024).into(),
                end_date: BillDate::new(31, 3, 2024).into(),
                usage: 15.5,
                water: 45.2,
                sewage: None,
                bill_amount: 45.2,
                image: None,
            }],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn bill_serialises_snake_case_with_nulls() {
        let v = serde_json::to_value(&response().bills[0]).unwrap();
        assert_eq!(v["start_date"], json!({"day": 1, "month": 3, "year": 2024}));
        assert_eq!(v["bill_amount"], 45.2);
        assert!(v["sewage"].is_null());
        assert!(v["image"].is_null());
        assert!(v.get("warnings").is_none());
    }

    #[test]
    fn report_mixes_successes_and_failures() {
        let outcomes = vec![
            DocumentOutcome {
                index: 0,
                file_name: "march.pdf".into(),
                result: Ok(response()),
            },
            DocumentOutcome {
                index: 1,
                file_name: "broken.pdf".into(),
                result: Err(BillError::SchemaViolation {
                    stage: Stage::SingleBill,
                    detail: "missing field 'consumption'".into(),
                }),
            },
        ];
        let report = BatchReport::from_outcomes(&outcomes);
        assert_eq!(report.success_count(), 1);
        assert!(!report.all_failed());

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["results"][0]["address"], "12 Main St");
        assert_eq!(v["results"][0]["file_name"], "march.pdf");
        assert_eq!(v["results"][1]["stage"], "single_bill");
        assert!(v["results"][1]["error"]
            .as_str()
            .unwrap()
            .contains("consumption"));
    }

    #[test]
    fn empty_batch_is_not_all_failed() {
        assert!(!BatchReport::from_outcomes(&[]).all_failed());
    }
}
