use std::sync::Arc;

use nanoid::nanoid;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::IngestionConfig;
use crate::db::DatabaseBackend;
use crate::error::{FakturoError, Result};
use crate::models::{AuditAction, AuditEntry, Document, DocumentStatus};

use super::audit::{actor, AuditLog};
use super::worker::{JobQueue, JobReason};

/// A file as it arrives at the ingestion boundary.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub uploaded_by: Option<String>,
    pub preferred_engine: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Queued { document_id: String },
    Rejected { document_id: String, reason: String },
}

impl Admission {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Queued { document_id } | Self::Rejected { document_id, .. } => document_id,
        }
    }
}

/// Validates uploads, persists them and hands accepted ones to the workers.
pub struct Ingestor {
    db: Arc<dyn DatabaseBackend>,
    audit: AuditLog,
    queue: JobQueue,
    config: IngestionConfig,
}

impl Ingestor {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        audit: AuditLog,
        queue: JobQueue,
        config: IngestionConfig,
    ) -> Self {
        Self {
            db,
            audit,
            queue,
            config,
        }
    }

    /// Returns as soon as the document is stored; processing is asynchronous.
    ///
    /// Invalid files still get a document record in `Rejected` so the caller
    /// can look up why. Only a missing filename is refused outright.
    pub async fn admit(&self, upload: Upload) -> Result<Admission> {
        let filename = upload.filename.trim().to_string();
        if filename.is_empty() {
            return Err(FakturoError::Validation("filename is required".to_string()));
        }

        let mime_type = resolve_mime_type(&filename, upload.content_type.as_deref(), &upload.bytes);
        let mut doc = Document::new(
            nanoid!(),
            filename,
            mime_type.clone(),
            upload.bytes.len() as i64,
        );
        doc.content_sha256 = Some(format!("{:x}", Sha256::digest(&upload.bytes)));
        doc.uploaded_by = upload.uploaded_by;
        doc.preferred_engine = upload.preferred_engine;

        if let Err(reason) = self.check(&upload.bytes, upload.content_type.as_deref(), &mime_type) {
            self.db.create_document(&doc, None).await?;
            self.db
                .transition_status(
                    &doc.id,
                    DocumentStatus::Uploaded,
                    DocumentStatus::Rejected,
                    Some(&reason),
                )
                .await?;
            warn!(doc_id = %doc.id, filename = %doc.filename, reason = %reason, "Upload rejected");
            self.audit
                .record(
                    AuditEntry::new(&doc.id, AuditAction::DocumentRejected, actor::INGESTION)
                        .detail(json!({ "reason": reason, "size_bytes": doc.size_bytes })),
                )
                .await;
            return Ok(Admission::Rejected {
                document_id: doc.id,
                reason,
            });
        }

        self.db.create_document(&doc, Some(&upload.bytes)).await?;
        self.audit
            .record(
                AuditEntry::new(&doc.id, AuditAction::DocumentAdmitted, actor::INGESTION).detail(
                    json!({
                        "filename": doc.filename,
                        "mime_type": doc.mime_type,
                        "size_bytes": doc.size_bytes,
                        "sha256": doc.content_sha256,
                    }),
                ),
            )
            .await;

        self.db
            .transition_status(
                &doc.id,
                DocumentStatus::Uploaded,
                DocumentStatus::Queued,
                None,
            )
            .await?;
        self.audit
            .record(AuditEntry::new(
                &doc.id,
                AuditAction::DocumentQueued,
                actor::INGESTION,
            ))
            .await;

        info!(
            doc_id = %doc.id,
            filename = %doc.filename,
            mime_type = %doc.mime_type,
            size_bytes = doc.size_bytes,
            "Document admitted"
        );
        self.queue.enqueue(&doc.id, JobReason::Uploaded);

        Ok(Admission::Queued {
            document_id: doc.id,
        })
    }

    fn check(
        &self,
        bytes: &[u8],
        declared: Option<&str>,
        resolved: &str,
    ) -> std::result::Result<(), String> {
        if bytes.is_empty() {
            return Err("file is empty".to_string());
        }
        if bytes.len() > self.config.max_upload_bytes {
            return Err(format!(
                "file too large: {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.config.max_upload_bytes
            ));
        }
        if !self
            .config
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(resolved))
        {
            return Err(format!("unsupported content type: {resolved}"));
        }
        if let (Some(declared), Some(sniffed)) = (declared.and_then(normalize_mime), sniff(bytes)) {
            if declared != sniffed {
                return Err(format!(
                    "declared content type {declared} does not match file contents ({sniffed})"
                ));
            }
        }
        Ok(())
    }
}

fn normalize_mime(value: &str) -> Option<String> {
    let essence = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
        "" | "application/octet-stream" => None,
        "image/jpg" | "image/pjpeg" => Some("image/jpeg".to_string()),
        "image/x-png" => Some("image/png".to_string()),
        _ => Some(essence),
    }
}

fn sniff(bytes: &[u8]) -> Option<String> {
    infer::get(bytes).map(|kind| kind.mime_type().to_string())
}

/// Declared type wins, then magic bytes, then the file extension.
fn resolve_mime_type(filename: &str, declared: Option<&str>, bytes: &[u8]) -> String {
    declared
        .and_then(normalize_mime)
        .or_else(|| sniff(bytes))
        .or_else(|| mime_guess::from_path(filename).first_raw().map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::test_backend;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn config(max_upload_bytes: usize) -> IngestionConfig {
        IngestionConfig {
            max_upload_bytes,
            ..IngestionConfig::default()
        }
    }

    fn upload(filename: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Upload {
        Upload {
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            uploaded_by: Some("clerk".into()),
            preferred_engine: None,
            bytes,
        }
    }

    #[tokio::test]
    async fn test_valid_upload_is_queued_and_enqueued() {
        let (_dir, db) = test_backend().await;
        let (queue, mut receiver) = JobQueue::channel(4);
        let ingestor = Ingestor::new(db.clone(), AuditLog::new(db.clone()), queue, config(1024));

        let admission = ingestor
            .admit(upload("fv.png", Some("image/png"), PNG_MAGIC.to_vec()))
            .await
            .unwrap();
        let Admission::Queued { document_id } = admission else {
            panic!("expected admission");
        };

        let doc = db.get_document(&document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Queued);
        assert_eq!(doc.mime_type, "image/png");
        assert_eq!(doc.content_sha256.as_ref().map(|h| h.len()), Some(64));
        assert_eq!(
            db.get_document_content(&document_id).await.unwrap().unwrap(),
            PNG_MAGIC.to_vec()
        );

        let job = receiver.try_recv().unwrap();
        assert_eq!(job.document_id, document_id);
        assert_eq!(job.reason, JobReason::Uploaded);
    }

    #[tokio::test]
    async fn test_oversize_upload_is_rejected_without_attempts() {
        let (_dir, db) = test_backend().await;
        let (queue, mut receiver) = JobQueue::channel(4);
        let ingestor = Ingestor::new(db.clone(), AuditLog::new(db.clone()), queue, config(10));

        let admission = ingestor
            .admit(upload("big.png", Some("image/png"), vec![0u8; 12]))
            .await
            .unwrap();
        let Admission::Rejected { document_id, reason } = admission else {
            panic!("expected rejection");
        };
        assert!(reason.contains("too large"));

        let doc = db.get_document(&document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
        assert_eq!(doc.error_message.as_deref(), Some(reason.as_str()));
        assert_eq!(db.count_attempts(&document_id).await.unwrap(), 0);
        assert!(db.get_document_content(&document_id).await.unwrap().is_none());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disallowed_type_is_rejected() {
        let (_dir, db) = test_backend().await;
        let (queue, _receiver) = JobQueue::channel(4);
        let ingestor = Ingestor::new(db.clone(), AuditLog::new(db.clone()), queue, config(1024));

        let admission = ingestor
            .admit(upload("notes.txt", Some("text/plain"), b"hello".to_vec()))
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Rejected { ref reason, .. } if reason.contains("text/plain")));
    }

    #[tokio::test]
    async fn test_declared_type_must_match_contents() {
        let (_dir, db) = test_backend().await;
        let (queue, _receiver) = JobQueue::channel(4);
        let ingestor = Ingestor::new(db.clone(), AuditLog::new(db.clone()), queue, config(1024));

        let admission = ingestor
            .admit(upload("fv.pdf", Some("application/pdf"), PNG_MAGIC.to_vec()))
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Rejected { ref reason, .. } if reason.contains("does not match")));
    }

    #[tokio::test]
    async fn test_blank_filename_is_an_error() {
        let (_dir, db) = test_backend().await;
        let (queue, _receiver) = JobQueue::channel(4);
        let ingestor = Ingestor::new(db.clone(), AuditLog::new(db), queue, config(1024));

        let err = ingestor
            .admit(upload("  ", None, PNG_MAGIC.to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, FakturoError::Validation(_)));
    }

    #[test]
    fn test_mime_resolution_order() {
        assert_eq!(
            resolve_mime_type("a.pdf", Some("image/JPG; q=1"), PNG_MAGIC),
            "image/jpeg"
        );
        assert_eq!(
            resolve_mime_type("a.pdf", Some("application/octet-stream"), PNG_MAGIC),
            "image/png"
        );
        assert_eq!(resolve_mime_type("scan.tiff", None, b"??"), "image/tiff");
        assert_eq!(resolve_mime_type("blob", None, b"??"), "application/octet-stream");
    }
}
