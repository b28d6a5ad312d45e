//! Document OCR: PDF bytes → per-page markdown.
//!
//! The OCR provider receives the whole PDF as a base64 data URL and answers
//! with one markdown block per page. Embedded figures come back as
//! `![img-0.jpeg](img-0.jpeg)` references; when the provider annotated an
//! image, the annotation replaces its id so the text model can read it.
//!
//! Pages are joined with a `PAGE NUMBER :{index}` marker. The marker is what
//! the multi-bill extractor reads back as `page_no`, which is how rendered
//! page images are later matched to bills.

use crate::config::ExtractionConfig;
use crate::error::{BillError, ServiceError};
use crate::pipeline::http;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const SERVICE: &str = "mistral-ocr";
const DEFAULT_ENDPOINT: &str = "https://api.mistral.ai/v1/ocr";

/// An image embedded in an OCR'd page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrImage {
    pub id: String,
    #[serde(default)]
    pub image_annotation: Option<String>,
}

/// One OCR'd page. `index` is 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    pub index: usize,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub images: Vec<OcrImage>,
}

/// The OCR result for a whole document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrDocument {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
}

impl OcrDocument {
    /// Concatenate pages in index order, each preceded by its page marker.
    pub fn to_markdown(&self) -> String {
        let mut pages: Vec<&OcrPage> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.index);

        let mut content = String::new();
        for page in pages {
            let mut markdown = page.markdown.clone();
            for image in &page.images {
                if let Some(annotation) = image.image_annotation.as_deref() {
                    if !image.id.is_empty() && !annotation.trim().is_empty() {
                        markdown = markdown.replace(&image.id, annotation);
                    }
                }
            }
            content.push_str(&page_marker(page.index));
            content.push_str(&markdown);
        }
        content
    }

    /// True when no page carries any text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.markdown.trim().is_empty())
    }
}

/// The separator written before each page's markdown.
pub fn page_marker(index: usize) -> String {
    format!("\n\nPAGE NUMBER :{index}\n")
}

/// Converts a PDF into per-page markdown.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// OCR `pdf`. `pages` restricts the call to the given 0-based pages.
    async fn process(
        &self,
        pdf: &[u8],
        pages: Option<&[usize]>,
    ) -> Result<OcrDocument, ServiceError>;
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<&'a [usize]>,
    include_image_base64: bool,
}

#[derive(Serialize)]
struct DocumentUrl {
    #[serde(rename = "type")]
    kind: &'static str,
    document_url: String,
}

/// Mistral OCR REST client.
#[derive(Clone)]
pub struct MistralOcr {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for MistralOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralOcr")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl MistralOcr {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, BillError> {
        let client = http::build_client(timeout_secs)
            .map_err(|e| BillError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs,
        })
    }

    /// Build from `MISTRAL_API_KEY` and the configured OCR model.
    pub fn from_env(config: &ExtractionConfig) -> Result<Self, BillError> {
        let key = std::env::var("MISTRAL_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BillError::ProviderNotConfigured {
                service: SERVICE.to_string(),
                hint: "Set MISTRAL_API_KEY to enable document OCR.".to_string(),
            })?;
        Self::new(key, config.ocr_model.clone(), config.api_timeout_secs)
    }

    /// Point the client at a different endpoint (proxy, gateway, mock).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl OcrService for MistralOcr {
    async fn process(
        &self,
        pdf: &[u8],
        pages: Option<&[usize]>,
    ) -> Result<OcrDocument, ServiceError> {
        info!("OCR: sending {} bytes to {}", pdf.len(), self.model);

        let body = OcrRequest {
            model: &self.model,
            document: DocumentUrl {
                kind: "document_url",
                document_url: format!("data:application/pdf;base64,{}", STANDARD.encode(pdf)),
            },
            pages,
            include_image_base64: false,
        };

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        let document: OcrDocument = http::send_json(SERVICE, request, self.timeout_secs).await?;
        if document.pages.is_empty() {
            return Err(ServiceError::Empty { service: SERVICE });
        }

        debug!("OCR: {} pages returned", document.pages.len());
        Ok(document)
    }
}
