//! Uploaded documents and their temporary storage
//!
//! A stored document is deleted from disk when its guard drops, whichever
//! way the owning run ends. The bundled sample is never deleted.

use crate::config::DocumentConfig;
use crate::error::AnalysisError;
use crate::models::DocumentSummary;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Immutable, validated document bytes.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    bytes: Vec<u8>,
    sha256: String,
}

impl Document {
    fn new(filename: String, content_type: String, bytes: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            id: Uuid::new_v4(),
            filename,
            content_type,
            bytes,
            sha256,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            document_id: self.id,
            filename: self.filename.clone(),
            size_bytes: self.size(),
            sha256: self.sha256.clone(),
        }
    }
}

/// Deletes the backing file on drop unless disarmed.
#[derive(Debug)]
struct TempFileGuard {
    path: PathBuf,
    owned: bool,
}

impl TempFileGuard {
    fn disarm(&mut self) -> PathBuf {
        self.owned = false;
        self.path.clone()
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary document"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Could not remove temporary document"
            ),
        }
    }
}

/// A document plus the scoped lifetime of its on-disk copy.
#[derive(Debug)]
pub struct StoredDocument {
    document: Arc<Document>,
    guard: TempFileGuard,
}

impl StoredDocument {
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Whether the file is removed when this value drops.
    pub fn is_temporary(&self) -> bool {
        self.guard.owned
    }

    /// Hand ownership of the file to a serializable handle.
    pub fn into_handle(mut self) -> DocumentHandle {
        let owned = self.guard.owned;
        let path = self.guard.disarm();
        DocumentHandle {
            path,
            filename: self.document.filename.clone(),
            content_type: self.document.content_type.clone(),
            temporary: owned,
        }
    }
}

/// Self-contained reference to a stored document, safe to put on a queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentHandle {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
    pub temporary: bool,
}

impl DocumentHandle {
    /// Delete the file behind a handle that will never be reopened.
    pub fn discard(self) {
        drop(TempFileGuard {
            path: self.path,
            owned: self.temporary,
        });
    }
}

/// Validates uploads and manages their temporary storage.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    config: DocumentConfig,
}

impl DocumentSource {
    pub fn new(config: DocumentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn validate(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(AnalysisError::Validation("Missing filename".to_string()));
        }

        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(AnalysisError::Validation(
                "Only PDF files are supported".to_string(),
            ));
        }

        if let Some(ct) = content_type {
            let essence = ct.split(';').next().unwrap_or_default().trim();
            if !essence.eq_ignore_ascii_case(PDF_CONTENT_TYPE) {
                return Err(AnalysisError::Validation(format!(
                    "Content type must be {}, got {}",
                    PDF_CONTENT_TYPE, essence
                )));
            }
        }

        if bytes.is_empty() {
            return Err(AnalysisError::Validation("Empty file uploaded".to_string()));
        }

        if bytes.len() > self.config.max_upload_bytes {
            return Err(AnalysisError::Validation(format!(
                "File size must be at most {} bytes",
                self.config.max_upload_bytes
            )));
        }

        Ok(Document::new(
            filename.to_string(),
            PDF_CONTENT_TYPE.to_string(),
            bytes,
        ))
    }

    /// Write a validated document into the data directory.
    pub async fn store(&self, document: Document) -> Result<StoredDocument> {
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| {
                AnalysisError::Storage(format!(
                    "Cannot create {}: {}",
                    self.config.data_dir.display(),
                    e
                ))
            })?;

        let path = self
            .config
            .data_dir
            .join(format!("financial_document_{}.pdf", document.id));

        // Guard first so a partial write is still cleaned up.
        let guard = TempFileGuard {
            path: path.clone(),
            owned: true,
        };

        tokio::fs::write(&path, document.bytes())
            .await
            .map_err(|e| AnalysisError::Storage(format!("Error saving uploaded file: {}", e)))?;

        info!(
            document_id = %document.id,
            filename = %document.filename,
            size = document.size(),
            "Stored uploaded document"
        );

        Ok(StoredDocument {
            document: Arc::new(document),
            guard,
        })
    }

    pub async fn accept_upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<StoredDocument> {
        let document = self.validate(filename, content_type, bytes)?;
        self.store(document).await
    }

    /// Load the bundled sample document. Its file is left in place.
    pub async fn load_sample(&self) -> Result<StoredDocument> {
        let path = self.config.sample_path.clone();
        self.load_path(&path, false).await
    }

    /// Load an arbitrary local PDF without taking ownership of the file.
    pub async fn load_path(&self, path: &Path, temporary: bool) -> Result<StoredDocument> {
        let guard = TempFileGuard {
            path: path.to_path_buf(),
            owned: temporary,
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalysisError::Validation(format!(
                    "Document not found: {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        let document = self.validate(&filename, None, bytes)?;

        Ok(StoredDocument {
            document: Arc::new(document),
            guard,
        })
    }

    /// Reopen a queued document; the file is owned by the result again.
    pub async fn open_handle(&self, handle: DocumentHandle) -> Result<StoredDocument> {
        let guard = TempFileGuard {
            path: handle.path.clone(),
            owned: handle.temporary,
        };

        let bytes = tokio::fs::read(&handle.path).await.map_err(|e| {
            AnalysisError::Storage(format!(
                "Queued document {} unreadable: {}",
                handle.path.display(),
                e
            ))
        })?;

        let document = self.validate(&handle.filename, Some(&handle.content_type), bytes)?;

        Ok(StoredDocument {
            document: Arc::new(document),
            guard,
        })
    }
}

/// Build an in-memory document without touching disk.
pub fn document_from_bytes(filename: &str, bytes: Vec<u8>) -> Document {
    Document::new(filename.to_string(), PDF_CONTENT_TYPE.to_string(), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn source(dir: &Path) -> DocumentSource {
        DocumentSource::new(
            DocumentConfig::default()
                .with_data_dir(dir)
                .with_max_upload_bytes(64),
        )
    }

    #[test]
    fn test_validation_rules() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        assert_ok!(source.validate("report.PDF", Some("application/pdf"), b"%PDF-1.4".to_vec()));
        assert_err!(source.validate("report.txt", None, b"%PDF-1.4".to_vec()));
        assert_err!(source.validate("report.pdf", Some("text/plain"), b"%PDF-1.4".to_vec()));
        assert_err!(source.validate("report.pdf", None, Vec::new()));
        assert_err!(source.validate("report.pdf", None, vec![b'x'; 65]));
    }

    #[test]
    fn test_sha256_is_stable() {
        let a = document_from_bytes("a.pdf", b"same".to_vec());
        let b = document_from_bytes("b.pdf", b"same".to_vec());
        assert_eq!(a.sha256(), b.sha256());
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_stored_document_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        let stored = source
            .accept_upload("q1.pdf", None, b"%PDF-1.4 data".to_vec())
            .await
            .unwrap();
        let path = stored.path().to_path_buf();
        assert!(path.exists());
        assert!(stored.is_temporary());

        drop(stored);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_handle_round_trip_transfers_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        let stored = source
            .accept_upload("q1.pdf", None, b"%PDF-1.4 data".to_vec())
            .await
            .unwrap();
        let handle = stored.into_handle();
        assert!(handle.path.exists(), "handle keeps the file alive");

        let reopened = source.open_handle(handle.clone()).await.unwrap();
        assert_eq!(reopened.document().bytes(), b"%PDF-1.4 data");
        drop(reopened);
        assert!(!handle.path.exists());
    }

    #[tokio::test]
    async fn test_sample_is_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("sample.pdf");
        std::fs::write(&sample, b"%PDF-1.4 sample").unwrap();

        let source = DocumentSource::new(
            DocumentConfig::default()
                .with_data_dir(dir.path())
                .with_sample_path(&sample),
        );

        let stored = source.load_sample().await.unwrap();
        assert!(!stored.is_temporary());
        drop(stored);
        assert!(sample.exists());
    }

    #[tokio::test]
    async fn test_missing_sample_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DocumentSource::new(
            DocumentConfig::default().with_sample_path(dir.path().join("missing.pdf")),
        );
        let err = source.load_sample().await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }
}
