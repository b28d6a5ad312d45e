//! Document and batch entry points.
//!
//! Within one document the stages run in sequence. Across a batch, documents
//! are independent and run on a bounded pool of `config.concurrency`
//! futures; each external call is the expensive part, so the bound is really
//! an API concurrency limit.
//!
//! A failing document never aborts the batch: its error is kept in its
//! [`DocumentOutcome`] next to the successes. [`process_batch`] returns
//! outcomes in input order; use [`crate::stream::process_stream`] to receive
//! them as they complete instead.

use crate::assemble::assemble;
use crate::error::BillError;
use crate::output::{DocumentOutcome, ExtractResponse};
use crate::pipeline::input::{self, SourceDocument};
use crate::workflow::Workflow;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Extract the bills of one in-memory PDF.
///
/// # Errors
/// Returns `Err(BillError)` when the document is not a PDF or any stage
/// fails; [`BillError::stage`] names the failing stage.
///
/// # Example
/// ```rust,no_run
/// use water_bill_extract::{process_document, ExtractionConfig, Workflow};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let workflow = Workflow::from_env(ExtractionConfig::default())?;
/// let bytes = std::fs::read("march.pdf")?;
/// let response = process_document(&workflow, "march.pdf", bytes).await?;
/// for bill in &response.bills {
///     println!("{}: {:.2}", bill.bill_no, bill.bill_amount);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn process_document(
    workflow: &Workflow,
    file_name: &str,
    bytes: impl Into<Arc<[u8]>>,
) -> Result<ExtractResponse, BillError> {
    let bytes: Arc<[u8]> = bytes.into();
    input::validate_pdf(file_name, &bytes)?;
    let state = workflow.run(bytes).await?;
    Ok(assemble(&state, file_name))
}

/// Run one batch member, reporting progress and timing.
pub(crate) async fn run_one(
    workflow: &Workflow,
    index: usize,
    doc: SourceDocument,
) -> DocumentOutcome {
    let cb = workflow.config().progress_callback.clone();
    if let Some(ref cb) = cb {
        cb.on_document_start(index, &doc.file_name);
    }
    let start = Instant::now();
    info!("Processing #{}: {}", index, doc.file_name);

    let result = match input::validate_pdf(&doc.file_name, &doc.bytes) {
        Ok(()) => workflow
            .run_tracked(index, Arc::from(doc.bytes))
            .await
            .map(|state| assemble(&state, &doc.file_name)),
        Err(e) => Err(e),
    };

    match &result {
        Ok(response) => {
            info!(
                "#{} {}: {} bills in {}ms",
                index,
                doc.file_name,
                response.bills.len(),
                start.elapsed().as_millis()
            );
            if let Some(ref cb) = cb {
                cb.on_document_complete(index, &doc.file_name, response.bills.len());
            }
        }
        Err(e) => {
            warn!("#{} {} failed: {}", index, doc.file_name, e);
            if let Some(ref cb) = cb {
                cb.on_document_error(index, &doc.file_name, e.stage(), &e.to_string());
            }
        }
    }

    DocumentOutcome {
        index,
        file_name: doc.file_name,
        result,
    }
}

/// Process many documents concurrently; outcomes come back in input order.
pub async fn process_batch(
    workflow: &Workflow,
    documents: Vec<SourceDocument>,
) -> Vec<DocumentOutcome> {
    let total = documents.len();
    let config = workflow.config();
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut outcomes: Vec<DocumentOutcome> = stream::iter(
        documents
            .into_iter()
            .enumerate()
            .map(|(index, doc)| run_one(workflow, index, doc)),
    )
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // buffer_unordered yields in completion order
    outcomes.sort_by_key(|o| o.index);
    finish_batch(workflow, &outcomes);
    outcomes
}

/// Resolve local paths and HTTP(S) URLs, then process them as a batch.
///
/// An input that cannot be read or is not a PDF becomes a failed outcome;
/// the rest of the batch proceeds.
pub async fn process_inputs(workflow: &Workflow, inputs: &[String]) -> Vec<DocumentOutcome> {
    let total = inputs.len();
    let config = workflow.config();
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }
    let timeout = config.download_timeout_secs;

    let mut outcomes: Vec<DocumentOutcome> =
        stream::iter(inputs.iter().enumerate().map(|(index, raw)| async move {
            match input::resolve_input(raw, timeout).await {
                Ok(doc) => run_one(workflow, index, doc).await,
                Err(e) => {
                    let file_name = input::display_name(raw);
                    warn!("#{} {}: {}", index, raw, e);
                    if let Some(ref cb) = workflow.config().progress_callback {
                        cb.on_document_error(index, &file_name, None, &e.to_string());
                    }
                    DocumentOutcome {
                        index,
                        file_name,
                        result: Err(e),
                    }
                }
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    outcomes.sort_by_key(|o| o.index);
    finish_batch(workflow, &outcomes);
    outcomes
}

fn finish_batch(workflow: &Workflow, outcomes: &[DocumentOutcome]) {
    let ok = outcomes.iter().filter(|o| o.is_ok()).count();
    info!("Batch complete: {}/{} documents", ok, outcomes.len());
    if let Some(ref cb) = workflow.config().progress_callback {
        cb.on_batch_complete(outcomes.len(), ok);
    }
}

/// Synchronous wrapper around [`process_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    workflow: &Workflow,
    documents: Vec<SourceDocument>,
) -> Result<Vec<DocumentOutcome>, BillError> {
    Ok(tokio::runtime::Runtime::new()
        .map_err(|e| BillError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_batch(workflow, documents)))
}
