//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! Both OCR and rendering work on in-memory bytes, so nothing is written to
//! disk: local files are read, URLs are downloaded into memory. The `%PDF`
//! magic is checked before anything is sent to an external service, so a
//! mislabelled upload fails fast with [`BillError::NotAPdf`] instead of
//! costing an OCR call.

use crate::error::BillError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// A PDF ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Name echoed back in the response (`file_name`).
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject anything that does not start with the `%PDF` magic.
pub fn validate_pdf(file_name: &str, bytes: &[u8]) -> Result<(), BillError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    Err(BillError::NotAPdf {
        file_name: file_name.to_string(),
        magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
    })
}

/// Resolve the input string to PDF bytes.
///
/// If the input is a URL, download it; otherwise read the local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<SourceDocument, BillError> {
    let doc = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(BillError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(Path::new(input)).await?
    };
    validate_pdf(&doc.file_name, &doc.bytes)?;
    Ok(doc)
}

async fn read_local(path: &Path) -> Result<SourceDocument, BillError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => BillError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => BillError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => BillError::InvalidInput {
            input: path.display().to_string(),
        },
    })?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(SourceDocument {
        file_name: file_name_of(path),
        bytes,
    })
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, BillError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BillError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let download_error = |e: reqwest::Error| {
        if e.is_timeout() {
            BillError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            BillError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(download_error)?;

    if !response.status().is_success() {
        return Err(BillError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(download_error)?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(SourceDocument {
        file_name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// The name a document is reported under, available before it is read.
pub fn display_name(input: &str) -> String {
    if is_url(input) {
        filename_from_url(input)
    } else {
        file_name_of(Path::new(input))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

/// Inputs given on the command line may be directories; expand them to the
/// `.pdf` files they contain, sorted by name.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<String>, BillError> {
    let mut expanded = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if is_url(input) || !path.is_dir() {
            expanded.push(input.clone());
            continue;
        }
        let entries = std::fs::read_dir(&path).map_err(|_| BillError::InvalidInput {
            input: input.clone(),
        })?;
        let mut pdfs: Vec<String> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .map(|p| p.display().to_string())
            .collect();
        pdfs.sort();
        expanded.extend(pdfs);
    }
    Ok(expanded)
}
