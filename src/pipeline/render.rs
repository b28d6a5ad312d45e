//! Page rasterisation: render the pages bills were read from to PNG.
//!
//! ## Threading
//!
//! pdfium keeps thread-local state and blocks, so every render pass runs on
//! the tokio blocking pool via `spawn_blocking`.
//!
//! ## Out-of-range pages
//!
//! `page_no` comes from a language model and can point past the end of the
//! document. Such pages are skipped with a [`RecordError::RenderSkipped`];
//! the bill keeps its structured fields and simply has no image.

use crate::config::ExtractionConfig;
use crate::error::{BillError, RecordError};
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output of one render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedPages {
    /// Number of pages in the document.
    pub page_count: usize,
    /// 0-based page index → PNG bytes.
    pub images: BTreeMap<usize, Vec<u8>>,
    /// Pages that were requested but produced no image.
    pub problems: Vec<RecordError>,
}

/// Rasterises selected PDF pages.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render the 0-based `pages` of `pdf`, scaled by `zoom`.
    ///
    /// Only an unreadable document is an error; individual pages that cannot
    /// be rendered are reported in [`RenderedPages::problems`].
    async fn render(
        &self,
        pdf: Arc<[u8]>,
        pages: &[usize],
        zoom: f32,
    ) -> Result<RenderedPages, BillError>;
}

/// pdfium-backed renderer.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// `library_path` is the pdfium shared library file. If `None`, falls back
    /// to `PDFIUM_LIB_PATH` and then the system library search path.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.pdfium_library_path.clone())
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(
        &self,
        pdf: Arc<[u8]>,
        pages: &[usize],
        zoom: f32,
    ) -> Result<RenderedPages, BillError> {
        let library_path = self.library_path.clone();
        let indices = pages.to_vec();

        tokio::task::spawn_blocking(move || {
            render_pages_blocking(library_path.as_deref(), &pdf, &indices, zoom)
        })
        .await
        .map_err(|e| BillError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to pdfium: explicit path, then `PDFIUM_LIB_PATH`, then system library.
fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, BillError> {
    let env_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
    let bindings = match library_path.map(Path::to_path_buf).or(env_path) {
        Some(path) => Pdfium::bind_to_library(&path).map_err(|e| {
            BillError::PdfiumBindingFailed(format!("{}: {}", path.display(), e))
        })?,
        None => Pdfium::bind_to_system_library()
            .map_err(|e| BillError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    library_path: Option<&Path>,
    pdf: &[u8],
    page_indices: &[usize],
    zoom: f32,
) -> Result<RenderedPages, BillError> {
    let pdfium = bind_pdfium(library_path)?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| BillError::CorruptPdf {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let page_count = pages.len() as usize;
    info!("PDF loaded: {} pages, rendering {:?}", page_count, page_indices);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);

    let mut rendered = RenderedPages {
        page_count,
        ..Default::default()
    };

    for &idx in page_indices {
        if idx >= page_count {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx, page_count
            );
            rendered.problems.push(RecordError::RenderSkipped {
                page: idx,
                page_count,
            });
            continue;
        }

        let png = pages
            .get(idx as u16)
            .map_err(|e| format!("{:?}", e))
            .and_then(|page| {
                page.render_with_config(&render_config)
                    .map_err(|e| format!("{:?}", e))
                    .and_then(|bitmap| {
                        let image = bitmap.as_image();
                        debug!(
                            "Rendered page {} → {}x{} px",
                            idx,
                            image.width(),
                            image.height()
                        );
                        encode::encode_png(&image)
                            .map_err(|e| format!("PNG encoding failed: {}", e))
                    })
            });

        match png {
            Ok(bytes) => {
                rendered.images.insert(idx, bytes);
            }
            Err(detail) => {
                warn!("Page {}: rasterisation failed: {}", idx, detail);
                rendered
                    .problems
                    .push(RecordError::RenderFailed { page: idx, detail });
            }
        }
    }

    Ok(rendered)
}

/// The distinct pages referenced by a set of bills, in ascending order.
pub fn referenced_pages<'a>(pages: impl IntoIterator<Item = &'a usize>) -> Vec<usize> {
    let mut pages: Vec<usize> = pages.into_iter().copied().collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_pages_are_distinct_and_sorted() {
        assert_eq!(referenced_pages(&[2, 0, 2, 99]), vec![0, 2, 99]);
        assert!(referenced_pages(&Vec::<usize>::new()).is_empty());
    }

    #[test]
    fn renderer_keeps_configured_path() {
        let config = ExtractionConfig::builder()
            .pdfium_library_path("/opt/pdfium/lib/libpdfium.so")
            .build()
            .unwrap();
        let r = PdfiumRenderer::from_config(&config);
        assert_eq!(
            r.library_path.as_deref(),
            Some(Path::new("/opt/pdfium/lib/libpdfium.so"))
        );
    }
}
