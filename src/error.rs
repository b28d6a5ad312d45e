//! Error types for the water-bill-extract library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`BillError`]: **Fatal for one document**: the pipeline for that PDF
//!   cannot produce a trustworthy record set (not a PDF, OCR failed, the
//!   classifier answered with garbage). Returned as `Err(BillError)` from the
//!   per-document entry points; batch entry points keep it per document so one
//!   bad upload never sinks its neighbours.
//!
//! * [`ServiceError`]: a single external call (OCR or LLM) failed. Pipeline
//!   stages wrap it into [`BillError::Extraction`] together with the stage
//!   name, so callers always learn *where* a document died.
//!
//! * [`RecordError`]: **Non-fatal**: one multi-bill element was rejected or
//!   one page could not be rendered. Stored in
//!   [`crate::workflow::PipelineState`] next to the records that survived.

use crate::workflow::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned for a single document.
///
/// Record-level problems use [`RecordError`] and are stored in the
/// pipeline state rather than propagated here.
#[derive(Debug, Error)]
pub enum BillError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes do not start with the `%PDF` magic number.
    #[error("'{file_name}' is not a valid PDF file (first bytes: {magic:?})")]
    NotAPdf { file_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib-path) to the libpdfium shared library file, \
or install pdfium system-wide. Use --no-images to skip page rendering."
    )]
    PdfiumBindingFailed(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// An OCR or LLM call failed, returned nothing, or returned text that is
    /// not the JSON envelope the stage asked for.
    #[error("{stage} failed: {detail}")]
    Extraction { stage: Stage, detail: String },

    /// The model answered with well-formed JSON that is missing required
    /// fields or carries values of the wrong type.
    #[error("{stage} returned a record violating the bill schema: {detail}")]
    SchemaViolation { stage: Stage, detail: String },

    // ── Service configuration ─────────────────────────────────────────────
    /// An external service is not configured (missing API key etc.).
    #[error("Service '{service}' is not configured.\n{hint}")]
    ProviderNotConfigured { service: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillError {
    /// Wrap a failed service call into a stage-tagged extraction failure.
    pub fn extraction(stage: Stage, source: impl std::fmt::Display) -> Self {
        BillError::Extraction {
            stage,
            detail: source.to_string(),
        }
    }

    /// The pipeline stage that produced this error, when it came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BillError::Extraction { stage, .. } | BillError::SchemaViolation { stage, .. } => {
                Some(*stage)
            }
            BillError::CorruptPdf { .. } | BillError::PdfiumBindingFailed(_) => {
                Some(Stage::ExtractImages)
            }
            _ => None,
        }
    }
}

/// Failure of one call to an external OCR or LLM service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service answered with a non-success HTTP status.
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// 401/403: retrying will not help.
    #[error("Authentication error from {service}: {detail}")]
    Auth {
        service: &'static str,
        detail: String,
    },

    /// HTTP 429.
    #[error("Rate limit exceeded for {service}")]
    RateLimited {
        service: &'static str,
        retry_after_secs: Option<u64>,
    },

    /// The call did not complete within the configured timeout.
    #[error("{service} call timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    /// Connection, TLS or body-transfer failure.
    #[error("{service} transport error: {detail}")]
    Transport {
        service: &'static str,
        detail: String,
    },

    /// The response body could not be decoded into the expected envelope.
    #[error("{service} returned an undecodable response: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },

    /// The service answered successfully but with no usable content.
    #[error("{service} returned an empty response")]
    Empty { service: &'static str },

    /// The model refused or was stopped by a safety filter.
    #[error("{service} blocked the request: {reason}")]
    Blocked {
        service: &'static str,
        reason: String,
    },
}

/// A non-fatal problem with one record or one page.
///
/// The document still completes; the affected bill is either dropped
/// (`SchemaViolation`) or delivered without its page image (`Render*`).
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum RecordError {
    /// One element of a multi-bill response was rejected.
    #[error("Bill #{index}: {detail}")]
    SchemaViolation { index: usize, detail: String },

    /// The extractor referenced a page beyond the end of the document.
    #[error("Page {page} is out of range (document has {page_count} pages); image skipped")]
    RenderSkipped { page: usize, page_count: usize },

    /// pdfium failed to rasterise an in-range page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_display_names_stage() {
        let e = BillError::extraction(
            Stage::CheckMultipleBills,
            ServiceError::Empty { service: "gemini" },
        );
        let msg = e.to_string();
        assert!(msg.contains("check_multiple_bills"), "got: {msg}");
        assert!(msg.contains("empty response"), "got: {msg}");
        assert_eq!(e.stage(), Some(Stage::CheckMultipleBills));
    }

    #[test]
    fn schema_violation_carries_stage() {
        let e = BillError::SchemaViolation {
            stage: Stage::SingleBill,
            detail: "missing field 'consumption'".into(),
        };
        assert_eq!(e.stage(), Some(Stage::SingleBill));
        assert!(e.to_string().contains("consumption"));
    }

    #[test]
    fn input_errors_have_no_stage() {
        let e = BillError::NotAPdf {
            file_name: "notes.txt".into(),
            magic: b"hell".to_vec(),
        };
        assert_eq!(e.stage(), None);
        assert!(e.to_string().contains("notes.txt"));
    }

    #[test]
    fn rate_limit_display() {
        let e = ServiceError::RateLimited {
            service: "mistral-ocr",
            retry_after_secs: Some(30),
        };
        assert!(e.to_string().contains("mistral-ocr"));
    }

    #[test]
    fn render_skipped_display() {
        let e = RecordError::RenderSkipped {
            page: 99,
            page_count: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("99") && msg.contains("5 pages"), "got: {msg}");
    }
}
