//! Prompts for the classifier and the two bill extractors.
//!
//! Centralising every prompt here keeps a single source of truth and lets
//! unit tests inspect prompts directly without a live model. The JSON
//! schema, not the prompt, is what constrains the output shape; prompts only
//! steer *which* values the model picks.

/// System instruction for the billing-period classifier.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"Analyze this water bill content for multiple billing periods.
Key indicators of multiple bills:
- Multiple due dates
- Different billing start dates
- Different billing end dates
- Different billing months/periods
- Multiple meter reading dates

Return true if multiple billing periods detected, false if single billing period, and return the address of the bill."#;

/// System instruction shared by the single- and multi-bill extractors.
pub const EXTRACTOR_SYSTEM_PROMPT: &str =
    "You are an expert information extractor. Your job is to extract bill information given the provided schema.";

/// Build the classifier user prompt around the OCR text.
///
/// A billing period only counts when its whole tuple is present together;
/// `water + sewage = total bill` is the cross-check the model is asked to use
/// to decide that a page really is a self-contained period.
pub fn classifier_prompt(ocr_text: &str) -> String {
    format!(
        r#"The following information should be present together, only then you can extract them:
1. Please look for current reading date.
2. Please look for previous reading date.
3. Please look for sewage cost.
4. Please look for water cost.
5. Please look for total bill.
The cost of water plus sewage should be equal to the total bill.
water + sewage = total bill
Count a billing period only when all of this information is present together.
If you find this information together on a certain page, then you must also note that page number.
{ocr_text}"#
    )
}

/// Suffix appended to the extractor instruction in multi-bill mode.
pub const MULTI_BILL_SUFFIX: &str = "\nThe document contains several billing periods. Return one entry per complete billing period and set page_no to the number following \"PAGE NUMBER :\" of the page it was read from.";

/// Instruction prepended when the backend cannot enforce a response schema
/// natively and the schema has to travel inside the prompt.
pub fn inline_schema_instruction(schema: &serde_json::Value) -> String {
    let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "Respond with a single JSON value that validates against this schema. \
Output ONLY the JSON, with no commentary and no markdown fences.\n\n{pretty}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_prompt_embeds_text_and_identity() {
        let p = classifier_prompt("PAGE NUMBER :0\nTotal 57.50");
        assert!(p.ends_with("PAGE NUMBER :0\nTotal 57.50"));
        assert!(p.contains("water + sewage = total bill"));
    }

    #[test]
    fn inline_schema_contains_schema() {
        let s = inline_schema_instruction(&serde_json::json!({"type": "OBJECT"}));
        assert!(s.contains("\"OBJECT\""));
        assert!(s.contains("ONLY the JSON"));
    }
}
