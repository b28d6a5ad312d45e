//! The extraction state machine.
//!
//! ```text
//! start ─▶ extract_content ─▶ check_multiple_bills ─┬─▶ single_bill ────┬─▶ extract_images ─▶ end
//!                                                   └─▶ multiple_bills ─┘
//! ```
//!
//! [`PipelineState`] is a value: every stage takes the current state and
//! returns a new one. [`Workflow::step`] is public so a test can feed a
//! recorded state back into one stage and compare the result, and
//! [`Stage::next`] is a pure function of the state, so routing can be
//! checked without running anything.
//!
//! Within one document the stages run strictly in sequence. Services are
//! injected through [`WorkflowServices`]; nothing here touches process-wide
//! state.

use crate::config::ExtractionConfig;
use crate::error::{BillError, RecordError};
use crate::pipeline::llm::{resolve_model, StructuredModel};
use crate::pipeline::ocr::{MistralOcr, OcrService};
use crate::pipeline::render::{referenced_pages, PageRenderer, PdfiumRenderer, RenderedPages};
use crate::pipeline::{classify, extract};
use crate::record::{BillRecord, Classification};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A node of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    ExtractContent,
    CheckMultipleBills,
    SingleBill,
    MultipleBills,
    ExtractImages,
    End,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::ExtractContent => "extract_content",
            Stage::CheckMultipleBills => "check_multiple_bills",
            Stage::SingleBill => "single_bill",
            Stage::MultipleBills => "multiple_bills",
            Stage::ExtractImages => "extract_images",
            Stage::End => "end",
        }
    }

    /// The stage that follows `self`, given the state it produced.
    ///
    /// The only fork is after classification. Routing before the classifier
    /// has answered, or past `end`, is an internal error.
    pub fn next(self, state: &PipelineState) -> Result<Stage, BillError> {
        match self {
            Stage::Start => Ok(Stage::ExtractContent),
            Stage::ExtractContent => Ok(Stage::CheckMultipleBills),
            Stage::CheckMultipleBills => match state.is_multiple {
                Some(true) => Ok(Stage::MultipleBills),
                Some(false) => Ok(Stage::SingleBill),
                None => Err(BillError::Internal(
                    "cannot route: document has not been classified".to_string(),
                )),
            },
            Stage::SingleBill | Stage::MultipleBills => Ok(Stage::ExtractImages),
            Stage::ExtractImages => Ok(Stage::End),
            Stage::End => Err(BillError::Internal("no stage follows 'end'".to_string())),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one run knows about its document.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pdf: Arc<[u8]>,
    /// OCR markdown with page markers; empty until `extract_content` ran.
    pub ocr_text: String,
    /// `None` until `check_multiple_bills` ran.
    pub is_multiple: Option<bool>,
    pub address: Option<String>,
    pub bills: Vec<BillRecord>,
    /// Page index → PNG. Keys are always pages referenced by `bills`.
    pub page_images: BTreeMap<usize, Vec<u8>>,
    /// Known once the document has been opened for rendering.
    pub page_count: Option<usize>,
    /// Non-fatal problems: rejected records, pages without an image.
    pub rejected: Vec<RecordError>,
    /// Stages visited so far, in order.
    pub trail: Vec<Stage>,
}

impl PipelineState {
    pub fn new(pdf: impl Into<Arc<[u8]>>) -> Self {
        Self {
            pdf: pdf.into(),
            ocr_text: String::new(),
            is_multiple: None,
            address: None,
            bills: Vec::new(),
            page_images: BTreeMap::new(),
            page_count: None,
            rejected: Vec::new(),
            trail: Vec::new(),
        }
    }

    pub fn pdf(&self) -> &[u8] {
        &self.pdf
    }

    pub fn with_ocr_text(self, ocr_text: String) -> Self {
        Self { ocr_text, ..self }
    }

    pub fn with_classification(self, c: Classification) -> Self {
        Self {
            is_multiple: Some(c.is_multiple),
            address: c.address,
            ..self
        }
    }

    pub fn with_bills(self, bills: Vec<BillRecord>, rejected: Vec<RecordError>) -> Self {
        let mut all = self.rejected;
        all.extend(rejected);
        Self {
            bills,
            rejected: all,
            ..self
        }
    }

    /// Attach rendered pages, dropping any page no bill refers to.
    pub fn with_render(self, rendered: RenderedPages) -> Self {
        let wanted: BTreeSet<usize> = self.bills.iter().map(|b| b.page_no).collect();
        let page_images = rendered
            .images
            .into_iter()
            .filter(|(page, _)| wanted.contains(page))
            .collect();
        let mut all = self.rejected;
        all.extend(rendered.problems);
        Self {
            page_images,
            page_count: Some(rendered.page_count),
            rejected: all,
            ..self
        }
    }

    fn visited(mut self, stage: Stage) -> Self {
        self.trail.push(stage);
        self
    }
}

/// External services a workflow talks to.
#[derive(Clone)]
pub struct WorkflowServices {
    pub ocr: Arc<dyn OcrService>,
    pub model: Arc<dyn StructuredModel>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl fmt::Debug for WorkflowServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowServices").finish_non_exhaustive()
    }
}

/// Runs documents through the state machine.
#[derive(Debug, Clone)]
pub struct Workflow {
    services: WorkflowServices,
    config: ExtractionConfig,
}

impl Workflow {
    pub fn new(services: WorkflowServices, config: ExtractionConfig) -> Self {
        Self { services, config }
    }

    /// Build the production services from the environment:
    /// `MISTRAL_API_KEY` for OCR, the structured model as resolved by
    /// [`resolve_model`], and pdfium for rendering.
    pub fn from_env(config: ExtractionConfig) -> Result<Self, BillError> {
        let services = WorkflowServices {
            ocr: Arc::new(MistralOcr::from_env(&config)?),
            model: resolve_model(&config)?,
            renderer: Arc::new(PdfiumRenderer::from_config(&config)),
        };
        Ok(Self::new(services, config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run one document from `start` to `end`.
    pub async fn run(&self, pdf: impl Into<Arc<[u8]>>) -> Result<PipelineState, BillError> {
        self.drive(PipelineState::new(pdf), None).await
    }

    /// Like [`Workflow::run`], reporting stage progress for batch document `index`.
    pub(crate) async fn run_tracked(
        &self,
        index: usize,
        pdf: Arc<[u8]>,
    ) -> Result<PipelineState, BillError> {
        self.drive(PipelineState::new(pdf), Some(index)).await
    }

    async fn drive(
        &self,
        initial: PipelineState,
        index: Option<usize>,
    ) -> Result<PipelineState, BillError> {
        let mut stage = Stage::Start;
        let mut state = initial;
        loop {
            state = self.step(stage, &state).await?;
            if let (Some(i), Some(cb)) = (index, self.config.progress_callback.as_ref()) {
                cb.on_stage_complete(i, stage);
            }
            if stage == Stage::End {
                return Ok(state);
            }
            stage = stage.next(&state)?;
        }
    }

    /// Execute one stage against `state` and return the state it produces.
    pub async fn step(
        &self,
        stage: Stage,
        state: &PipelineState,
    ) -> Result<PipelineState, BillError> {
        debug!("stage {} starting", stage);
        let state = state.clone();
        let next = match stage {
            Stage::Start | Stage::End => state,
            Stage::ExtractContent => self.extract_content(state).await?,
            Stage::CheckMultipleBills => {
                let c = classify::classify(
                    self.services.model.as_ref(),
                    &self.config,
                    &state.ocr_text,
                )
                .await?;
                state.with_classification(c)
            }
            Stage::SingleBill => {
                let bill = extract::extract_single(
                    self.services.model.as_ref(),
                    &self.config,
                    &state.ocr_text,
                )
                .await?;
                state.with_bills(vec![bill], Vec::new())
            }
            Stage::MultipleBills => {
                let out = extract::extract_multiple(
                    self.services.model.as_ref(),
                    &self.config,
                    &state.ocr_text,
                )
                .await?;
                state.with_bills(out.bills, out.rejected)
            }
            Stage::ExtractImages => self.extract_images(state).await?,
        };
        Ok(next.visited(stage))
    }

    async fn extract_content(&self, state: PipelineState) -> Result<PipelineState, BillError> {
        let document = self
            .services
            .ocr
            .process(state.pdf(), self.config.ocr_pages.as_deref())
            .await
            .map_err(|e| BillError::extraction(Stage::ExtractContent, e))?;

        if document.is_blank() {
            warn!("OCR returned no text for {} pages", document.pages.len());
        }
        let text = document.to_markdown();
        info!(
            "OCR: {} pages, {} chars of markdown",
            document.pages.len(),
            text.len()
        );
        Ok(state.with_ocr_text(text))
    }

    async fn extract_images(&self, state: PipelineState) -> Result<PipelineState, BillError> {
        if !self.config.render_images {
            debug!("page rendering disabled");
            return Ok(state);
        }
        let pages = referenced_pages(state.bills.iter().map(|b| &b.page_no));
        if pages.is_empty() {
            return Ok(state);
        }
        let rendered = self
            .services
            .renderer
            .render(Arc::clone(&state.pdf), &pages, self.config.render_zoom)
            .await?;
        info!(
            "Rendered {}/{} referenced pages",
            rendered.images.len(),
            pages.len()
        );
        Ok(state.with_render(rendered))
    }
}
