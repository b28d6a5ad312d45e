//! Schema-constrained LLM calls.
//!
//! Every stage that talks to a language model goes through
//! [`StructuredModel::generate`]: free text in, JSON text out, with a JSON
//! schema and a fixed sampling configuration attached. Parsing and validating
//! the JSON is the caller's job; this module only moves bytes.
//!
//! Two backends are provided:
//!
//! * [`GeminiModel`]: native `generateContent` REST call. The schema travels
//!   as `responseSchema` and every sampling knob (including the seed) is
//!   honoured, so identical input yields identical output.
//! * [`ProviderModel`]: any `edgequake_llm` provider. The schema is embedded
//!   in the system prompt. Temperature, top_p, stop sequences, penalties and
//!   max tokens are forwarded; `CompletionOptions` has no seed or top_k, so
//!   reproducibility still depends on the provider.

use crate::config::{ExtractionConfig, SamplingConfig};
use crate::error::{BillError, ServiceError};
use crate::pipeline::http;
use crate::prompts::inline_schema_instruction;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const GEMINI: &str = "gemini";
const PROVIDER: &str = "llm-provider";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-mini";

/// One structured-extraction call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRequest {
    pub model: String,
    pub system_instruction: String,
    pub prompt: String,
    pub schema: Value,
    pub sampling: SamplingConfig,
}

/// A language model that answers with JSON constrained by a schema.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    /// Run the call and return the raw response text.
    async fn generate(&self, request: &StructuredRequest) -> Result<String, ServiceError>;
}

// ── Gemini ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    candidate_count: u32,
    seed: i64,
    stop_sequences: &'a [String],
    presence_penalty: f32,
    frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

fn gemini_body(request: &StructuredRequest) -> GenerateContentRequest<'_> {
    let s = &request.sampling;
    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![TextPart {
                text: &request.system_instruction,
            }],
        },
        contents: vec![Content {
            role: Some("user"),
            parts: vec![TextPart {
                text: &request.prompt,
            }],
        }],
        generation_config: GenerationConfig {
            temperature: s.temperature,
            top_p: s.top_p,
            top_k: s.top_k,
            candidate_count: s.candidate_count,
            seed: s.seed,
            stop_sequences: &s.stop_sequences,
            presence_penalty: s.presence_penalty,
            frequency_penalty: s.frequency_penalty,
            max_output_tokens: s.max_output_tokens,
            response_mime_type: "application/json",
            response_schema: &request.schema,
        },
    }
}

fn response_text(response: GenerateContentResponse) -> Result<String, ServiceError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(ServiceError::Blocked {
                service: GEMINI,
                reason,
            }),
            None => Err(ServiceError::Empty { service: GEMINI }),
        };
    };

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if matches!(
            reason,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        ) {
            return Err(ServiceError::Blocked {
                service: GEMINI,
                reason: reason.to_string(),
            });
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ServiceError::Empty { service: GEMINI });
    }
    Ok(text)
}

/// Google Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, BillError> {
        let client = http::build_client(timeout_secs)
            .map_err(|e| BillError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            timeout_secs,
        })
    }

    /// Use a different API root (regional endpoint, proxy, mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl StructuredModel for GeminiModel {
    async fn generate(&self, request: &StructuredRequest) -> Result<String, ServiceError> {
        let body = gemini_body(request);
        let http_request = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let response: GenerateContentResponse =
            http::send_json(GEMINI, http_request, self.timeout_secs).await?;

        if let Some(usage) = &response.usage_metadata {
            debug!(
                "{}: {} input tokens, {} output tokens",
                request.model,
                usage.prompt_token_count.unwrap_or(0),
                usage.candidates_token_count.unwrap_or(0)
            );
        }
        response_text(response)
    }
}

// ── edgequake-llm adapter ────────────────────────────────────────────────

/// Adapter running structured calls through an `edgequake_llm` provider.
///
/// The provider is bound to one model when it is created, so
/// [`StructuredRequest::model`] is ignored here.
#[derive(Clone)]
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel").finish_non_exhaustive()
    }
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

fn provider_options(sampling: &SamplingConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(sampling.temperature),
        top_p: Some(sampling.top_p),
        stop: (!sampling.stop_sequences.is_empty()).then(|| sampling.stop_sequences.clone()),
        presence_penalty: Some(sampling.presence_penalty),
        frequency_penalty: Some(sampling.frequency_penalty),
        max_tokens: sampling.max_output_tokens.map(|n| n as usize),
        ..Default::default()
    }
}

#[async_trait]
impl StructuredModel for ProviderModel {
    async fn generate(&self, request: &StructuredRequest) -> Result<String, ServiceError> {
        let system = format!(
            "{}\n\n{}",
            request.system_instruction,
            inline_schema_instruction(&request.schema)
        );
        let messages = vec![
            ChatMessage::system(system.as_str()),
            ChatMessage::user_with_images(request.prompt.as_str(), Vec::new()),
        ];
        let options = provider_options(&request.sampling);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ServiceError::Transport {
                service: PROVIDER,
                detail: e.to_string(),
            })?;

        debug!(
            "provider: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(ServiceError::Empty { service: PROVIDER });
        }
        Ok(response.content)
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn StructuredModel>, BillError> {
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        BillError::ProviderNotConfigured {
            service: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(provider)))
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolve the structured model, from most-specific to least-specific:
///
/// 1. pre-built edgequake-llm provider (`config.provider`)
/// 2. named provider + model (`config.provider_name`, `config.model`)
/// 3. Gemini when `GEMINI_API_KEY` or `GOOGLE_API_KEY` is set
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 5. edgequake-llm auto-detection
pub fn resolve_model(config: &ExtractionConfig) -> Result<Arc<dyn StructuredModel>, BillError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderModel::new(Arc::clone(provider))));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
        return create_provider(name, model);
    }

    if let Some(key) = env_non_empty("GEMINI_API_KEY").or_else(|| env_non_empty("GOOGLE_API_KEY"))
    {
        info!("Using Gemini for structured extraction");
        return Ok(Arc::new(GeminiModel::new(key, config.api_timeout_secs)?));
    }

    if let (Some(prov), Some(model)) = (
        env_non_empty("EDGEQUAKE_LLM_PROVIDER"),
        env_non_empty("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&prov, &model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BillError::ProviderNotConfigured {
            service: "llm".to_string(),
            hint: format!(
                "No structured-extraction model could be configured.\n\
                Set GEMINI_API_KEY, or an API key supported by edgequake-llm.\n\
                Error: {e}"
            ),
        })?;
    Ok(Arc::new(ProviderModel::new(llm_provider)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> StructuredRequest {
        StructuredRequest {
            model: "gemini-2.5-flash-lite".into(),
            system_instruction: "Extract.".into(),
            prompt: "PAGE NUMBER :0\nTotal 57.50".into(),
            schema: json!({"type": "OBJECT", "properties": {"a": {"type": "STRING"}}}),
            sampling: SamplingConfig::default(),
        }
    }

    #[test]
    fn gemini_body_carries_full_sampling() {
        let v = serde_json::to_value(gemini_body(&request())).unwrap();
        let gc = &v["generationConfig"];
        assert_eq!(gc["temperature"], 0.0);
        assert_eq!(gc["seed"], 5);
        assert_eq!(gc["topK"], 20);
        assert_eq!(gc["candidateCount"], 1);
        assert_eq!(gc["stopSequences"], json!(["STOP!"]));
        assert_eq!(gc["responseMimeType"], "application/json");
        assert_eq!(gc["responseSchema"]["type"], "OBJECT");
        assert!(gc.get("maxOutputTokens").is_none());
        assert_eq!(v["systemInstruction"]["parts"][0]["text"], "Extract.");
        assert_eq!(v["contents"][0]["role"], "user");
    }

    #[test]
    fn gemini_body_is_byte_identical_across_builds() {
        let r = request();
        let a = serde_json::to_vec(&gemini_body(&r)).unwrap();
        let b = serde_json::to_vec(&gemini_body(&r.clone())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn endpoint_strips_models_prefix() {
        let m = GeminiModel::new("k", 10)
            .unwrap()
            .with_base_url("http://localhost:9/v1beta/");
        assert_eq!(
            m.endpoint("models/gemini-2.5-flash"),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn response_text_joins_parts() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "\"b\"}"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4}
        }))
        .unwrap();
        assert_eq!(response_text(resp).unwrap(), "{\"a\":\"b\"}");
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(
            response_text(resp),
            Err(ServiceError::Blocked { .. })
        ));
    }

    #[test]
    fn empty_candidate_is_empty() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert!(matches!(response_text(resp), Err(ServiceError::Empty { .. })));
    }

    #[test]
    fn provider_options_forward_sampling() {
        let opts = provider_options(&SamplingConfig::default());
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.top_p, Some(0.95));
        assert_eq!(opts.stop, Some(vec!["STOP!".to_string()]));
        assert_eq!(opts.presence_penalty, Some(0.0));
        assert_eq!(opts.frequency_penalty, Some(0.0));
        assert_eq!(opts.max_tokens, None);

        let opts = provider_options(&SamplingConfig {
            stop_sequences: Vec::new(),
            max_output_tokens: Some(2048),
            ..SamplingConfig::default()
        });
        assert_eq!(opts.stop, None);
        assert_eq!(opts.max_tokens, Some(2048));
    }
}
