//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one step. The state machine in
//! [`crate::workflow`] decides which of them run and in what order; the
//! stages themselves know nothing about each other.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ocr ──▶ classify ──┬─▶ extract (single) ──┬─▶ render ──▶ encode
//! (path/URL) (markdown)        └─▶ extract (multi)  ──┘  (pdfium)   (PNG)
//! ```
//!
//! 1. [`input`]   : read a local file or download a URL, check `%PDF`
//! 2. [`ocr`]     : one OCR call for the whole document; pages joined with
//!    `PAGE NUMBER :n` markers
//! 3. [`classify`]: one or several billing periods, plus the address
//! 4. [`extract`] : schema-constrained bill extraction, validated per record
//! 5. [`render`]  : rasterise the pages bills were read from; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 6. [`encode`]  : PNG-encode rendered pages, base64 for the response
//!
//! [`llm`], [`http`] and [`postprocess`] are shared plumbing for the stages
//! that call external services.

pub mod classify;
pub mod encode;
pub mod extract;
pub(crate) mod http;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod render;
