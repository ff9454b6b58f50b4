//! Document sources: where raw APS text comes from.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// File extensions the pipeline accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "pdf"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("unsupported document type: {0}")]
    Unsupported(String),

    #[error("document id escapes the source root: {0}")]
    InvalidId(String),

    #[error("{0} is not valid UTF-8 text")]
    Encoding(String),

    #[error("extracting text from PDF {document_id}: {detail}")]
    Pdf { document_id: String, detail: String },

    #[error("reading {document_id}: {source}")]
    Io {
        document_id: String,
        source: std::io::Error,
    },
}

/// Fetch raw text given a document reference.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, document_id: &str) -> Result<String, SourceError>;
}

/// True if the path has a supported extension (case-insensitive).
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

/// Documents stored as files under a root directory.
///
/// Document ids are `/`-separated paths relative to the root, e.g.
/// `uploads/aps_1042.txt`. PDFs must carry a text layer; scanned images
/// extract to empty text.
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a document id to a path under the root.
    pub fn resolve(&self, document_id: &str) -> Result<PathBuf, SourceError> {
        let rel = Path::new(document_id);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if document_id.is_empty() || escapes {
            return Err(SourceError::InvalidId(document_id.to_string()));
        }
        if !is_supported(rel) {
            return Err(SourceError::Unsupported(document_id.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// List every supported document under the root, sorted by id.
    pub fn discover(&self) -> Result<Vec<String>, SourceError> {
        let mut ids = Vec::new();
        self.walk(&self.root, &mut ids)?;
        ids.sort();
        debug!(root = %self.root.display(), count = ids.len(), "discovered documents");
        Ok(ids)
    }

    fn walk(&self, dir: &Path, ids: &mut Vec<String>) -> Result<(), SourceError> {
        let io_err = |source| SourceError::Io {
            document_id: dir.display().to_string(),
            source,
        };
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                self.walk(&path, ids)?;
            } else if is_supported(&path) {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let id: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    ids.push(id.join("/"));
                }
            } else {
                debug!(path = %path.display(), "skipping non-document file");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn fetch(&self, document_id: &str) -> Result<String, SourceError> {
        let path = self.resolve(document_id)?;
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(document_id.to_string())
            } else {
                SourceError::Io {
                    document_id: document_id.to_string(),
                    source,
                }
            }
        })?;

        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            let pdf_err = |detail: String| SourceError::Pdf {
                document_id: document_id.to_string(),
                detail,
            };
            let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                .await
                .map_err(|e| pdf_err(e.to_string()))?
                .map_err(pdf_err)?;
            if text.trim().is_empty() {
                warn!(document_id, "PDF has no text layer");
            }
            Ok(text)
        } else {
            String::from_utf8(bytes).map_err(|_| SourceError::Encoding(document_id.to_string()))
        }
    }
}

/// Text layer of a PDF, all pages in order.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())?;
    debug!(bytes = bytes.len(), chars = text.chars().count(), "extracted PDF text");
    Ok(text)
}

/// Documents held in memory, keyed by id.
#[derive(Default)]
pub struct MemoryDocumentSource {
    docs: HashMap<String, String>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, document_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.docs.insert(document_id.into(), text.into());
        self
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn fetch(&self, document_id: &str) -> Result<String, SourceError> {
        self.docs
            .get(document_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(document_id.to_string()))
    }
}
