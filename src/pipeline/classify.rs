//! Billing-period classifier: does the document hold one bill or several?
//!
//! One schema-constrained call over the full OCR text. The answer also
//! carries the service address printed on the bill. Anything other than a
//! well-formed `{address, is_multiple_bills}` object fails the document;
//! there is no fallback classification.

use crate::config::ExtractionConfig;
use crate::error::BillError;
use crate::pipeline::llm::{StructuredModel, StructuredRequest};
use crate::pipeline::postprocess::parse_model_json;
use crate::prompts::{classifier_prompt, CLASSIFIER_SYSTEM_PROMPT};
use crate::record::{classification_schema, Classification};
use crate::workflow::Stage;
use tracing::{debug, info};

/// The request sent to the classifier model.
pub fn classification_request(config: &ExtractionConfig, ocr_text: &str) -> StructuredRequest {
    StructuredRequest {
        model: config.classifier_model.clone(),
        system_instruction: CLASSIFIER_SYSTEM_PROMPT.to_string(),
        prompt: classifier_prompt(ocr_text),
        schema: classification_schema(),
        sampling: config.sampling.clone(),
    }
}

/// Classify `ocr_text` as single- or multi-period.
pub async fn classify(
    model: &dyn StructuredModel,
    config: &ExtractionConfig,
    ocr_text: &str,
) -> Result<Classification, BillError> {
    let stage = Stage::CheckMultipleBills;
    let request = classification_request(config, ocr_text);

    let raw = model
        .generate(&request)
        .await
        .map_err(|e| BillError::extraction(stage, e))?;
    debug!("classifier: {} chars returned", raw.len());

    let value = parse_model_json(&raw).map_err(|e| BillError::extraction(stage, e))?;
    let classification = Classification::from_value(&value)
        .map_err(|e| BillError::extraction(stage, format!("invalid classifier answer: {e}")))?;

    info!(
        "Classified as {} (address {})",
        if classification.is_multiple {
            "multiple bills"
        } else {
            "single bill"
        },
        if classification.address.is_some() {
            "found"
        } else {
            "missing"
        }
    );
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;

    struct Canned(Result<String, ServiceError>);

    #[async_trait]
    impl StructuredModel for Canned {
        async fn generate(&self, _request: &StructuredRequest) -> Result<String, ServiceError> {
            self.0.clone()
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig::default()
    }

    #[test]
    fn request_uses_classifier_model_and_schema() {
        let r = classification_request(&config(), "PAGE NUMBER :0\nbill");
        assert_eq!(r.model, "gemini-2.5-flash-lite");
        assert!(r.prompt.ends_with("PAGE NUMBER :0\nbill"));
        assert_eq!(r.schema, classification_schema());
        assert_eq!(r.sampling.seed, 5);
    }

    #[tokio::test]
    async fn fenced_answer_is_accepted() {
        let model = Canned(Ok(
            "```json\n{\"address\": \"12 Main St\", \"is_multiple_bills\": true}\n```".into(),
        ));
        let c = classify(&model, &config(), "text").await.unwrap();
        assert!(c.is_multiple);
        assert_eq!(c.address.as_deref(), Some("12 Main St"));
    }

    #[tokio::test]
    async fn garbage_is_fatal() {
        let model = Canned(Ok("I think it is a single bill.".into()));
        let err = classify(&model, &config(), "text").await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::CheckMultipleBills));
        assert!(matches!(err, BillError::Extraction { .. }));
    }

    #[test]
    fn missing_flag_is_fatal() {
        let model = Canned(Ok(r#"{"address": "12 Main St"}"#.into()));
        let err = tokio_test::block_on(classify(&model, &config(), "text")).unwrap_err();
        assert!(err.to_string().contains("is_multiple_bills"), "got: {err}");
    }

    #[tokio::test]
    async fn service_failure_names_stage() {
        let model = Canned(Err(ServiceError::Timeout {
            service: "gemini",
            secs: 120,
        }));
        let err = classify(&model, &config(), "text").await.unwrap_err();
        assert!(err.to_string().starts_with("check_multiple_bills failed"));
    }
}
