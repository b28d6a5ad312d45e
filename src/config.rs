//! Configuration types for bill extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across concurrent documents, log them, and
//! diff two runs to understand why their outputs differ.

use crate::error::BillError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Sampling parameters sent with every structured-extraction call.
///
/// The defaults pin the model down completely: temperature 0 plus a fixed
/// seed means identical OCR text yields byte-identical JSON across runs.
/// Reproducibility is a contract of the classifier and both extractors, so
/// change these only when you are prepared to re-baseline expected outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub candidate_count: u32,
    pub seed: i64,
    pub stop_sequences: Vec<String>,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// Upper bound on generated tokens. `None` leaves the provider default.
    pub max_output_tokens: Option<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            top_k: 20,
            candidate_count: 1,
            seed: 5,
            stop_sequences: vec!["STOP!".to_string()],
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_output_tokens: None,
        }
    }
}

/// Configuration for bill extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use water_bill_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .multi_bill_model("gemini-2.5-pro")
///     .render_zoom(3.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// OCR model identifier. Default: `mistral-ocr-latest`.
    pub ocr_model: String,

    /// 0-based pages to OCR. `None` sends the whole document. Default: `None`.
    pub ocr_pages: Option<Vec<usize>>,

    /// Model used to decide single vs. multiple billing periods.
    /// Default: `gemini-2.5-flash-lite`.
    pub classifier_model: String,

    /// Model used when the document holds one billing period.
    /// Default: `gemini-2.5-flash-lite`.
    pub single_bill_model: String,

    /// Model used when the document holds several billing periods. The list
    /// schema is harder to fill correctly, so this defaults to the larger
    /// `gemini-2.5-flash`.
    pub multi_bill_model: String,

    /// Sampling parameters shared by all structured calls.
    pub sampling: SamplingConfig,

    /// Upscale factor applied when rasterising bill pages. Range 0.5–8.0.
    /// Default: 2.0.
    pub render_zoom: f32,

    /// Render the source page of each bill and attach it as a PNG.
    /// Default: true.
    pub render_images: bool,

    /// Documents processed at the same time in a batch. Default: 2.
    ///
    /// Every document costs three model calls and one OCR call, so this knob
    /// is really an external-API concurrency limit. Within one document the
    /// stages always run strictly in sequence.
    pub concurrency: usize,

    /// Reject records whose previous reading date is not before the current
    /// reading date. Default: false (violations are only logged).
    pub enforce_chronology: bool,

    /// Per external call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// edgequake-llm provider name (e.g. "openai", "anthropic") used instead
    /// of the native Gemini client.
    pub provider_name: Option<String>,

    /// Model for `provider_name`. If None, uses the provider default.
    pub model: Option<String>,

    /// Pre-constructed edgequake-llm provider. Takes precedence over
    /// `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Path to the pdfium shared library file. If None, falls back
    /// to `PDFIUM_LIB_PATH` and then the system library search path.
    pub pdfium_library_path: Option<PathBuf>,

    /// Optional batch progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_model: "mistral-ocr-latest".to_string(),
            ocr_pages: None,
            classifier_model: "gemini-2.5-flash-lite".to_string(),
            single_bill_model: "gemini-2.5-flash-lite".to_string(),
            multi_bill_model: "gemini-2.5-flash".to_string(),
            sampling: SamplingConfig::default(),
            render_zoom: 2.0,
            render_images: true,
            concurrency: 2,
            enforce_chronology: false,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            provider_name: None,
            model: None,
            provider: None,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("ocr_model", &self.ocr_model)
            .field("ocr_pages", &self.ocr_pages)
            .field("classifier_model", &self.classifier_model)
            .field("single_bill_model", &self.single_bill_model)
            .field("multi_bill_model", &self.multi_bill_model)
            .field("sampling", &self.sampling)
            .field("render_zoom", &self.render_zoom)
            .field("render_images", &self.render_images)
            .field("concurrency", &self.concurrency)
            .field("enforce_chronology", &self.enforce_chronology)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr_model = model.into();
        self
    }

    pub fn ocr_pages(mut self, pages: Vec<usize>) -> Self {
        let mut pages = pages;
        pages.sort_unstable();
        pages.dedup();
        self.config.ocr_pages = Some(pages);
        self
    }

    pub fn classifier_model(mut self, model: impl Into<String>) -> Self {
        self.config.classifier_model = model.into();
        self
    }

    pub fn single_bill_model(mut self, model: impl Into<String>) -> Self {
        self.config.single_bill_model = model.into();
        self
    }

    pub fn multi_bill_model(mut self, model: impl Into<String>) -> Self {
        self.config.multi_bill_model = model.into();
        self
    }

    pub fn sampling(mut self, sampling: SamplingConfig) -> Self {
        self.config.sampling = sampling;
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.sampling.max_output_tokens = Some(n);
        self
    }

    pub fn render_zoom(mut self, zoom: f32) -> Self {
        self.config.render_zoom = zoom;
        self
    }

    pub fn render_images(mut self, v: bool) -> Self {
        self.config.render_images = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn enforce_chronology(mut self, v: bool) -> Self {
        self.config.enforce_chronology = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, BillError> {
        let c = &self.config;
        if !(0.5..=8.0).contains(&c.render_zoom) {
            return Err(BillError::InvalidConfig(format!(
                "Render zoom must be 0.5–8.0, got {}",
                c.render_zoom
            )));
        }
        if c.concurrency == 0 {
            return Err(BillError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        for (role, model) in [
            ("OCR", &c.ocr_model),
            ("classifier", &c.classifier_model),
            ("single-bill", &c.single_bill_model),
            ("multi-bill", &c.multi_bill_model),
        ] {
            if model.trim().is_empty() {
                return Err(BillError::InvalidConfig(format!(
                    "{role} model name must not be empty"
                )));
            }
        }
        if !(0.0..=2.0).contains(&c.sampling.temperature) {
            return Err(BillError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                c.sampling.temperature
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deterministic() {
        let s = SamplingConfig::default();
        assert_eq!(s.temperature, 0.0);
        assert_eq!(s.seed, 5);
        assert_eq!(s.top_k, 20);
        assert_eq!(s.candidate_count, 1);
        assert_eq!(s.stop_sequences, vec!["STOP!".to_string()]);
    }

    #[test]
    fn default_config_builds() {
        let c = ExtractionConfig::builder().build().expect("defaults are valid");
        assert_eq!(c.render_zoom, 2.0);
        assert_eq!(c.concurrency, 2);
        assert!(c.render_images);
        assert!(!c.enforce_chronology);
        assert_eq!(c.multi_bill_model, "gemini-2.5-flash");
    }

    #[test]
    fn zoom_out_of_range_rejected() {
        let err = ExtractionConfig::builder().render_zoom(20.0).build().unwrap_err();
        assert!(matches!(err, BillError::InvalidConfig(_)));
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn empty_model_rejected() {
        let err = ExtractionConfig::builder()
            .classifier_model("  ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("classifier"));
    }

    #[test]
    fn ocr_pages_sorted_and_deduped() {
        let c = ExtractionConfig::builder()
            .ocr_pages(vec![3, 0, 3, 1])
            .build()
            .unwrap();
        assert_eq!(c.ocr_pages, Some(vec![0, 1, 3]));
    }

    #[test]
    fn debug_lists_both_timeouts() {
        let c = ExtractionConfig::builder()
            .api_timeout_secs(30)
            .download_timeout_secs(45)
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("api_timeout_secs: 30"), "got: {dbg}");
        assert!(dbg.contains("download_timeout_secs: 45"), "got: {dbg}");
    }
}
