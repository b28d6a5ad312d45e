//! Single- and multi-bill extraction.
//!
//! Both extractors send the OCR text with a bill schema attached and validate
//! what comes back through [`BillRecord::from_value`]. They differ in how a
//! bad record is treated:
//!
//! * single-bill: the one record *is* the result, so any violation fails the
//!   document with [`BillError::SchemaViolation`];
//! * multi-bill: each element is validated on its own; a rejected element
//!   becomes a [`RecordError::SchemaViolation`] and the others proceed.
//!
//! Dates are never rewritten. A previous reading that does not precede the
//! current one is logged, or rejected when `enforce_chronology` is set.

use crate::config::ExtractionConfig;
use crate::error::{BillError, RecordError};
use crate::pipeline::llm::{StructuredModel, StructuredRequest};
use crate::pipeline::postprocess::parse_model_json;
use crate::prompts::{EXTRACTOR_SYSTEM_PROMPT, MULTI_BILL_SUFFIX};
use crate::record::{bill_schema, bills_schema, BillRecord};
use crate::workflow::Stage;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Page assumed when a single-bill answer omits `page_no`.
pub const SINGLE_BILL_PAGE: usize = 0;

/// Records kept from a multi-bill response, plus the ones rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiExtraction {
    pub bills: Vec<BillRecord>,
    pub rejected: Vec<RecordError>,
}

pub fn single_bill_request(config: &ExtractionConfig, ocr_text: &str) -> StructuredRequest {
    StructuredRequest {
        model: config.single_bill_model.clone(),
        system_instruction: EXTRACTOR_SYSTEM_PROMPT.to_string(),
        prompt: ocr_text.to_string(),
        schema: bill_schema(),
        sampling: config.sampling.clone(),
    }
}

pub fn multi_bill_request(config: &ExtractionConfig, ocr_text: &str) -> StructuredRequest {
    StructuredRequest {
        model: config.multi_bill_model.clone(),
        system_instruction: format!("{EXTRACTOR_SYSTEM_PROMPT}{MULTI_BILL_SUFFIX}"),
        prompt: ocr_text.to_string(),
        schema: bills_schema(),
        sampling: config.sampling.clone(),
    }
}

/// Extract exactly one bill.
pub async fn extract_single(
    model: &dyn StructuredModel,
    config: &ExtractionConfig,
    ocr_text: &str,
) -> Result<BillRecord, BillError> {
    let stage = Stage::SingleBill;
    let request = single_bill_request(config, ocr_text);

    let raw = model
        .generate(&request)
        .await
        .map_err(|e| BillError::extraction(stage, e))?;
    let value = parse_model_json(&raw).map_err(|e| BillError::extraction(stage, e))?;

    let record = BillRecord::from_value(&value, Some(SINGLE_BILL_PAGE))
        .and_then(|r| check_chronology(r, config.enforce_chronology))
        .map_err(|detail| BillError::SchemaViolation { stage, detail })?;

    info!("Extracted bill {} ({} m3)", record.bill_no, record.consumption);
    Ok(record)
}

/// Extract every billing period, isolating invalid elements.
pub async fn extract_multiple(
    model: &dyn StructuredModel,
    config: &ExtractionConfig,
    ocr_text: &str,
) -> Result<MultiExtraction, BillError> {
    let stage = Stage::MultipleBills;
    let request = multi_bill_request(config, ocr_text);

    let raw = model
        .generate(&request)
        .await
        .map_err(|e| BillError::extraction(stage, e))?;
    let value = parse_model_json(&raw).map_err(|e| BillError::extraction(stage, e))?;

    let extraction = validate_bills(&value, config.enforce_chronology)
        .map_err(|e| BillError::extraction(stage, e))?;

    info!(
        "Extracted {} bills ({} rejected)",
        extraction.bills.len(),
        extraction.rejected.len()
    );
    Ok(extraction)
}

/// Validate a multi-bill response.
///
/// Accepts `{"bills": [...]}` or a bare array. `Err` means the envelope
/// itself is unusable; element problems are collected in `rejected`.
pub fn validate_bills(value: &Value, enforce_chronology: bool) -> Result<MultiExtraction, String> {
    let elements = match value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("bills") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("'bills' is not an array".to_string()),
            None => return Err("response has no 'bills' list".to_string()),
        },
        _ => return Err("expected an object with a 'bills' list".to_string()),
    };

    let mut out = MultiExtraction::default();
    for (index, element) in elements.iter().enumerate() {
        match BillRecord::from_value(element, None)
            .and_then(|r| check_chronology(r, enforce_chronology))
        {
            Ok(record) => {
                debug!("bill #{}: page {}", index, record.page_no);
                out.bills.push(record);
            }
            Err(detail) => {
                warn!("Rejected bill #{}: {}", index, detail);
                out.rejected
                    .push(RecordError::SchemaViolation { index, detail });
            }
        }
    }
    Ok(out)
}

fn check_chronology(record: BillRecord, enforce: bool) -> Result<BillRecord, String> {
    if record.is_chronological() {
        return Ok(record);
    }
    let detail = format!(
        "previous_date {} is not before current_date {}",
        record.previous_date, record.current_date
    );
    if enforce {
        return Err(detail);
    }
    warn!("Bill {}: {}", record.bill_no, detail);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use serde_json::json;

    struct Canned(String);

    #[async_trait]
    impl StructuredModel for Canned {
        async fn generate(&self, _request: &StructuredRequest) -> Result<String, ServiceError> {
            Ok(self.0.clone())
        }
    }

    fn bill(page: Option<u64>, prev: (u8, u8, i32), curr: (u8, u8, i32)) -> Value {
        let mut v = json!({
            "previous_date": {"day": prev.0, "month": prev.1, "year": prev.2},
            "current_date": {"day": curr.0, "month": curr.1, "year": curr.2},
            "consumption": 15.5,
            "total_bill": 45.20,
            "sewage": 12.30,
            "bill_no": "WB-1001"
        });
        if let Some(p) = page {
            v["page_no"] = json!(p);
        }
        v
    }

    #[test]
    fn requests_pick_models_and_schemas() {
        let c = ExtractionConfig::default();
        let single = single_bill_request(&c, "text");
        assert_eq!(single.model, c.single_bill_model);
        assert_eq!(single.schema, bill_schema());

        let multi = multi_bill_request(&c, "text");
        assert_eq!(multi.model, "gemini-2.5-flash");
        assert!(multi.system_instruction.ends_with(MULTI_BILL_SUFFIX));
        assert_eq!(multi.schema["properties"]["bills"]["type"], "ARRAY");
    }

    #[tokio::test]
    async fn single_defaults_to_first_page() {
        let model = Canned(bill(None, (1, 3, 2024), (31, 3, 2024)).to_string());
        let r = extract_single(&model, &ExtractionConfig::default(), "text")
            .await
            .unwrap();
        assert_eq!(r.page_no, SINGLE_BILL_PAGE);
        assert!((r.bill_amount() - 57.50).abs() < 1e-6);
    }

    #[tokio::test]
    async fn single_keeps_reported_page() {
        let model = Canned(bill(Some(1), (1, 3, 2024), (31, 3, 2024)).to_string());
        let r = extract_single(&model, &ExtractionConfig::default(), "text")
            .await
            .unwrap();
        assert_eq!(r.page_no, 1);
    }

    #[tokio::test]
    async fn single_missing_consumption_is_fatal() {
        let mut v = bill(None, (1, 3, 2024), (31, 3, 2024));
        v.as_object_mut().unwrap().remove("consumption");
        let model = Canned(v.to_string());
        let err = extract_single(&model, &ExtractionConfig::default(), "text")
            .await
            .unwrap_err();
        match err {
            BillError::SchemaViolation { stage, detail } => {
                assert_eq!(stage, Stage::SingleBill);
                assert!(detail.contains("consumption"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reversed_dates_are_advisory_by_default() {
        let model = Canned(bill(None, (31, 3, 2024), (1, 3, 2024)).to_string());
        let r = extract_single(&model, &ExtractionConfig::default(), "text")
            .await
            .unwrap();
        assert_eq!(r.previous_date.day, 31);
        assert!(!r.is_chronological());
    }

    #[tokio::test]
    async fn reversed_dates_rejected_when_enforced() {
        let config = ExtractionConfig::builder()
            .enforce_chronology(true)
            .build()
            .unwrap();
        let model = Canned(bill(None, (31, 3, 2024), (1, 3, 2024)).to_string());
        let err = extract_single(&model, &config, "text").await.unwrap_err();
        assert!(matches!(err, BillError::SchemaViolation { .. }));
    }

    #[test]
    fn bad_element_is_isolated() {
        let mut broken = bill(Some(1), (1, 4, 2024), (30, 4, 2024));
        broken["total_bill"] = json!("n/a");
        let v = json!({
            "bills": [
                bill(Some(0), (1, 3, 2024), (31, 3, 2024)),
                broken,
                bill(Some(2), (1, 5, 2024), (31, 5, 2024)),
            ]
        });
        let out = validate_bills(&v, false).unwrap();
        assert_eq!(
            out.bills.iter().map(|b| b.page_no).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(out.rejected.len(), 1);
        assert!(matches!(
            out.rejected[0],
            RecordError::SchemaViolation { index: 1, .. }
        ));
    }

    #[test]
    fn reversed_element_isolated_when_enforced() {
        let v = json!({
            "bills": [
                bill(Some(0), (1, 3, 2024), (31, 3, 2024)),
                bill(Some(1), (30, 4, 2024), (1, 4, 2024)),
                bill(Some(2), (1, 5, 2024), (31, 5, 2024)),
            ]
        });

        let out = validate_bills(&v, true).unwrap();
        assert_eq!(
            out.bills.iter().map(|b| b.page_no).collect::<Vec<_>>(),
            vec![0, 2]
        );
        match &out.rejected[..] {
            [RecordError::SchemaViolation { index: 1, detail }] => {
                assert!(detail.contains("previous_date 30-04-2024"), "got: {detail}");
                assert!(detail.contains("current_date 01-04-2024"), "got: {detail}");
            }
            other => panic!("unexpected rejections: {other:?}"),
        }

        let advisory = validate_bills(&v, false).unwrap();
        assert_eq!(advisory.bills.len(), 3);
        assert!(advisory.rejected.is_empty());
    }

    #[test]
    fn multi_requires_page_no() {
        let v = json!({"bills": [bill(None, (1, 3, 2024), (31, 3, 2024))]});
        let out = validate_bills(&v, false).unwrap();
        assert!(out.bills.is_empty());
        assert_eq!(out.rejected.len(), 1);
    }

    #[test]
    fn bare_array_and_empty_list_accepted() {
        let v = json!([bill(Some(3), (1, 3, 2024), (31, 3, 2024))]);
        assert_eq!(validate_bills(&v, false).unwrap().bills[0].page_no, 3);
        assert!(validate_bills(&json!({"bills": []}), false)
            .unwrap()
            .bills
            .is_empty());
    }

    #[test]
    fn bad_envelope_is_an_error() {
        assert!(validate_bills(&json!({"records": []}), false).is_err());
        assert!(validate_bills(&json!({"bills": {}}), false).is_err());
        assert!(validate_bills(&json!("bills"), false).is_err());
    }

    #[tokio::test]
    async fn envelope_failure_names_stage() {
        let model = Canned("{\"result\": 1}".into());
        let err = extract_multiple(&model, &ExtractionConfig::default(), "text")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::MultipleBills));
    }
}
