/// Discovery of scraped documents on disk.
///
/// A scraper drops each download next to a `<file>.meta.json` sidecar holding
/// its [`SourceMetadata`]. Files without a sidecar are not ingestible.
use crate::domain::entities::{RawDocument, SourceMetadata};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "html", "htm", "txt"];
const METADATA_SUFFIX: &str = ".meta.json";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Invalid metadata in {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },
}

/// Sidecar metadata path for a document file
pub fn metadata_path(document: &Path) -> PathBuf {
    let mut name = document.file_name().unwrap_or_default().to_os_string();
    name.push(METADATA_SUFFIX);
    document.with_file_name(name)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Discover all document files under `dir` recursively, sorted by path
pub async fn discover_document_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = walk(dir).await?;
    files.sort();
    Ok(files)
}

async fn walk(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    Box::pin(async move {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.is_file() {
                if is_document(&path) {
                    files.push(path);
                }
            } else if path.is_dir() {
                // Skip hidden directories
                if let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) {
                    if !dir_name.starts_with('.') {
                        let mut sub_files = walk(&path).await?;
                        files.append(&mut sub_files);
                    }
                }
            }
        }

        Ok(files)
    })
    .await
}

async fn read_metadata(path: &Path) -> Result<SourceMetadata, DiscoveryError> {
    let raw = fs::read(path).await?;
    serde_json::from_slice(&raw).map_err(|e| DiscoveryError::InvalidMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read every discovered document that has a valid sidecar.
///
/// Files without metadata, or with metadata that does not parse, are skipped
/// with a warning; I/O errors on the directory itself are returned.
pub async fn load_raw_documents(dir: &Path) -> Result<Vec<RawDocument>, DiscoveryError> {
    let files = discover_document_files(dir).await?;
    let mut documents = Vec::with_capacity(files.len());

    for file in files {
        let sidecar = metadata_path(&file);
        if !sidecar.is_file() {
            warn!("Skipping {}: no {} sidecar", file.display(), METADATA_SUFFIX);
            continue;
        }

        let metadata = match read_metadata(&sidecar).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
        };

        let bytes = fs::read(&file).await?;
        debug!("Read {} ({} bytes)", file.display(), bytes.len());
        documents.push(RawDocument::new(bytes, metadata));
    }

    Ok(documents)
}
