//! Streaming batch API: emit documents as they complete.
//!
//! Unlike [`crate::process::process_batch`], which returns only after every
//! document finishes and re-sorts the outcomes, [`process_stream`] yields
//! each [`DocumentOutcome`] as soon as it is ready. Completion order is not
//! input order; every outcome carries its input `index`.

use crate::output::DocumentOutcome;
use crate::pipeline::input::SourceDocument;
use crate::process::run_one;
use crate::workflow::Workflow;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document outcomes.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Process documents concurrently, streaming outcomes in completion order.
///
/// # Example
/// ```rust,no_run
/// use water_bill_extract::{process_stream, ExtractionConfig, SourceDocument, Workflow};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let workflow = Workflow::from_env(ExtractionConfig::default())?;
/// let docs = vec![SourceDocument {
///     file_name: "march.pdf".into(),
///     bytes: std::fs::read("march.pdf")?,
/// }];
/// let mut outcomes = process_stream(workflow, docs);
/// while let Some(outcome) = outcomes.next().await {
///     match outcome.result {
///         Ok(r) => println!("#{} {}: {} bills", outcome.index, outcome.file_name, r.bills.len()),
///         Err(e) => eprintln!("#{} {}: {e}", outcome.index, outcome.file_name),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_stream(workflow: Workflow, documents: Vec<SourceDocument>) -> OutcomeStream {
    let concurrency = workflow.config().concurrency;
    info!(
        "Streaming {} documents, concurrency {}",
        documents.len(),
        concurrency
    );
    let workflow = Arc::new(workflow);

    let s = stream::iter(documents.into_iter().enumerate().map(move |(index, doc)| {
        let workflow = Arc::clone(&workflow);
        async move { run_one(&workflow, index, doc).await }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}
