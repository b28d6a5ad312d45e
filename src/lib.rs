//! # water-bill-extract
//!
//! Extract structured billing data from scanned water-bill PDFs: billing
//! period dates, consumption, water and sewage charges, bill number and the
//! service address.
//!
//! ## Why this crate?
//!
//! Utility bills come as scans with wildly different layouts, and a single
//! PDF may hold one billing period or a whole year of them. Template-based
//! parsers break on the next utility's layout. Instead this crate OCRs the
//! document into markdown and asks a language model to fill a fixed JSON
//! schema, then validates every field before a record is accepted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. OCR       one call, per-page markdown joined with PAGE NUMBER markers
//!  ├─ 2. Classify  one billing period or several? plus the service address
//!  ├─ 3. Extract   single-bill or multi-bill schema, validated per record
//!  ├─ 4. Render    rasterise the pages bills were read from (pdfium, 2×)
//!  └─ 5. Assemble  join bills with page images, bill_amount = water + sewage
//! ```
//!
//! Every model call uses temperature 0 and a fixed seed, so identical OCR
//! text yields identical records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use water_bill_extract::{process_document, ExtractionConfig, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // MISTRAL_API_KEY for OCR, GEMINI_API_KEY for extraction
//!     let workflow = Workflow::from_env(ExtractionConfig::default())?;
//!     let bytes = std::fs::read("bill.pdf")?;
//!     let response = process_document(&workflow, "bill.pdf", bytes).await?;
//!     println!("{}", response.address);
//!     for bill in response.bills {
//!         println!("{} {} m3 → {:.2}", bill.bill_no, bill.usage, bill.bill_amount);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `billx` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! water-bill-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod stream;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble, ADDRESS_NOT_FOUND};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, SamplingConfig};
pub use error::{BillError, RecordError, ServiceError};
pub use output::{BatchReport, BillData, DateInfo, DocumentOutcome, DocumentReport, ExtractResponse};
pub use pipeline::input::SourceDocument;
pub use pipeline::llm::{GeminiModel, ProviderModel, StructuredModel, StructuredRequest};
pub use pipeline::ocr::{MistralOcr, OcrDocument, OcrImage, OcrPage, OcrService};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderedPages};
pub use process::{process_batch, process_document, process_inputs, process_sync};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{BillDate, BillRecord, Classification};
pub use stream::{process_stream, OutcomeStream};
pub use workflow::{PipelineState, Stage, Workflow, WorkflowServices};
