//! Upload pipeline: validate, name, put, render, insert.

use crate::{
    models::{mime::MimeTable, object::UploadProgress, reference::ObjectReference},
    services::{
        backend::BackendError,
        documents::{InsertError, TextInserter},
        link_renderer,
        naming::{NamingError, ResourceNamer, file_name_of},
        registry::ClientRegistry,
    },
};
use bytes::Bytes;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{info, warn};

const PROGRESS_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    Unsupported,
    Unreadable(String),
}

/// A file refused before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub file: PathBuf,
    pub reason: Rejection,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.display();
        match &self.reason {
            Rejection::Empty => write!(f, "{}: file is empty", file),
            Rejection::Unsupported => {
                write!(f, "{}: file type is not in the mime table", file)
            }
            Rejection::Unreadable(err) => write!(f, "{}: cannot read file ({})", file, err),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{}", join_lines(.0))]
    Validation(Vec<ValidationFailure>),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("reading `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{message}")]
    Backend {
        message: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Insert(#[from] InsertError),
}

fn join_lines(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One file to upload. Without an explicit content type, the MIME table
/// decides both the content type and the markup.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub path: PathBuf,
    pub content_type: Option<String>,
}

impl UploadItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uploaded {
    pub file: PathBuf,
    pub backend: String,
    pub key: String,
    pub url: String,
    pub markup: String,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<Uploaded>,
    /// One-line notices for files that failed after validation.
    pub failed: Vec<String>,
}

/// Logs upload progress on a ticker until dropped.
pub struct ProgressSubscription {
    task: JoinHandle<()>,
}

impl ProgressSubscription {
    pub fn spawn(mut progress: watch::Receiver<UploadProgress>, file: String) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(PROGRESS_TICK);
            loop {
                ticker.tick().await;
                let current = *progress.borrow_and_update();
                if current.finished {
                    break;
                }
                info!(file = %file, percent = current.percent(), "uploading");
                if progress.has_changed().is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct UploadService {
    registry: Arc<ClientRegistry>,
    mime: Arc<MimeTable>,
    namer: Arc<ResourceNamer>,
    base_url: String,
}

impl UploadService {
    pub fn new(
        registry: Arc<ClientRegistry>,
        mime: Arc<MimeTable>,
        namer: Arc<ResourceNamer>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            mime,
            namer,
            base_url: base_url.into(),
        }
    }

    /// Check every file. All offending files are reported together.
    pub async fn validate(&self, items: &[UploadItem]) -> Result<(), UploadError> {
        let mut failures = Vec::new();
        for item in items {
            let reason = match tokio::fs::metadata(&item.path).await {
                Err(err) => Some(Rejection::Unreadable(err.to_string())),
                Ok(meta) if meta.len() == 0 => Some(Rejection::Empty),
                Ok(_) if item.content_type.is_none() && !self.supports(&item.path) => {
                    Some(Rejection::Unsupported)
                }
                Ok(_) => None,
            };
            if let Some(reason) = reason {
                failures.push(ValidationFailure {
                    file: item.path.clone(),
                    reason,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UploadError::Validation(failures))
        }
    }

    fn supports(&self, path: &Path) -> bool {
        path.to_str().map(|p| self.mime.supports(p)).unwrap_or(false)
    }

    /// Validate, then upload each file to `backend` (default when `None`)
    /// and insert its markup. Failures after validation are collected per
    /// file; the remaining files are still uploaded.
    pub async fn upload(
        &self,
        items: &[UploadItem],
        backend: Option<&str>,
        parent: Option<&str>,
        inserter: &dyn TextInserter,
    ) -> Result<UploadReport, UploadError> {
        self.validate(items).await?;

        let mut report = UploadReport::default();
        for item in items {
            match self.upload_one(item, backend, parent).await {
                Ok(uploaded) => match inserter.insert_text_at_cursor(&uploaded.markup).await {
                    Ok(()) => report.uploaded.push(uploaded),
                    Err(err) => {
                        warn!(file = %item.path.display(), error = %err, "link not inserted");
                        report.failed.push(format!(
                            "{}: uploaded to {} but the link could not be inserted ({})",
                            item.path.display(),
                            uploaded.url,
                            err
                        ));
                    }
                },
                Err(err) => {
                    warn!(file = %item.path.display(), error = %err, "upload failed");
                    report.failed.push(err.to_string());
                }
            }
        }
        Ok(report)
    }

    async fn upload_one(
        &self,
        item: &UploadItem,
        backend: Option<&str>,
        parent: Option<&str>,
    ) -> Result<Uploaded, UploadError> {
        let file_name = file_name_of(&item.path)?;
        let data = tokio::fs::read(&item.path)
            .await
            .map_err(|source| UploadError::Read {
                path: item.path.clone(),
                source,
            })?;

        let entry = self.mime.classify_path(&file_name);
        let content_type = item
            .content_type
            .clone()
            .unwrap_or_else(|| entry.content_type.clone());
        let name = self.namer.name_for(&file_name, parent, &data);

        let client = self.registry.resolve(backend);
        if let Some(requested) = backend.filter(|id| *id != client.id()) {
            warn!(requested, using = client.id(), "unknown backend, using default");
        }

        let (tx, rx) = watch::channel(UploadProgress::default());
        let subscription = ProgressSubscription::spawn(rx, file_name.clone());
        let result = client
            .put(&name, Bytes::from(data), &content_type, &tx)
            .await;
        drop(subscription);

        let key = result.map_err(|source| UploadError::Backend {
            message: source.user_message(&file_name),
            source,
        })?;

        let url = ObjectReference::new(key.clone(), client.id(), client.bucket()).encode(&self.base_url);
        let markup = match &item.content_type {
            Some(content_type) => link_renderer::render(&url, content_type),
            None => link_renderer::render_method(entry.method, &url),
        };
        info!(file = %file_name, backend = client.id(), key = %key, "uploaded");

        Ok(Uploaded {
            file: item.path.clone(),
            backend: client.id().to_string(),
            key,
            url,
            markup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::mime::DEFAULT_MIME_TABLE,
        services::{backend::ObjectBackend, memory_backend::MemoryBackend, naming::content_hash},
    };
    use async_trait::async_trait;
    use std::sync::{Mutex, atomic::Ordering};

    const BASE: &str = "http://localhost:4998";

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl TextInserter for Recorder {
        async fn insert_text_at_cursor(&self, text: &str) -> Result<(), InsertError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct NoEditor;

    #[async_trait]
    impl TextInserter for NoEditor {
        async fn insert_text_at_cursor(&self, _text: &str) -> Result<(), InsertError> {
            Err(InsertError::NoActiveEditor)
        }
    }

    fn service(backend: Arc<MemoryBackend>) -> UploadService {
        let registry = ClientRegistry::new(vec![backend as Arc<dyn ObjectBackend>]).unwrap();
        UploadService::new(
            Arc::new(registry),
            Arc::new(MimeTable::parse(DEFAULT_MIME_TABLE)),
            Arc::new(ResourceNamer::default()),
            BASE,
        )
    }

    #[tokio::test]
    async fn zero_byte_file_is_rejected_before_any_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "mybucket", "obsidian"));

        let err = service(backend.clone())
            .upload(&[UploadItem::new(&empty)], None, None, &Recorder::default())
            .await
            .unwrap_err();

        match err {
            UploadError::Validation(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].reason, Rejection::Empty);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(backend.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_offending_file_is_reported_and_nothing_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.png");
        let bad = dir.path().join("notes.xyz");
        let empty = dir.path().join("blank.gif");
        std::fs::write(&good, b"png").unwrap();
        std::fs::write(&bad, b"data").unwrap();
        std::fs::write(&empty, b"").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "mybucket", "obsidian"));

        let items = [UploadItem::new(&good), UploadItem::new(&bad), UploadItem::new(&empty)];
        let err = service(backend.clone())
            .upload(&items, None, None, &Recorder::default())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert_eq!(message.lines().count(), 2);
        assert!(message.contains("notes.xyz: file type is not in the mime table"));
        assert!(message.contains("blank.gif: file is empty"));
        assert_eq!(backend.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn uploads_and_inserts_image_markup() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        std::fs::write(&photo, b"fake png bytes").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "mybucket", "obsidian"));
        let recorder = Recorder::default();

        let report = service(backend.clone())
            .upload(&[UploadItem::new(&photo)], None, Some("trip"), &recorder)
            .await
            .unwrap();

        let key = format!("obsidian/trip-{}-photo.png", content_hash(b"fake png bytes"));
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].key, key);
        assert_eq!(backend.object(&key).unwrap().as_ref(), b"fake png bytes");

        let url = format!("{}/{}?client=default&bucket=mybucket", BASE, key);
        assert_eq!(report.uploaded[0].url, url);
        assert_eq!(*recorder.0.lock().unwrap(), vec![format!("![S3 File]({})", url)]);
    }

    #[tokio::test]
    async fn explicit_content_type_picks_markup_by_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.bin");
        std::fs::write(&clip, b"xx").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "b", ""));
        let recorder = Recorder::default();

        let item = UploadItem {
            path: clip,
            content_type: Some("video/mp4".into()),
        };
        service(backend)
            .upload(&[item], None, None, &recorder)
            .await
            .unwrap();

        assert!(recorder.0.lock().unwrap()[0].starts_with("<iframe"));
    }

    #[tokio::test]
    async fn backend_failure_is_reported_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        std::fs::write(&photo, b"x").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "b", "obsidian"));
        backend.set_unreachable(true);

        let report = service(backend)
            .upload(&[UploadItem::new(&photo)], None, None, &Recorder::default())
            .await
            .unwrap();

        assert!(report.uploaded.is_empty());
        assert_eq!(
            report.failed,
            vec!["photo.png: backend unreachable (check the endpoint and your network connection)"]
        );
    }

    #[tokio::test]
    async fn missing_editor_keeps_the_upload_and_reports_the_url() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        std::fs::write(&photo, b"x").unwrap();
        let backend = Arc::new(MemoryBackend::new("default", "b", "obsidian"));

        let report = service(backend.clone())
            .upload(&[UploadItem::new(&photo)], None, None, &NoEditor)
            .await
            .unwrap();

        assert_eq!(backend.keys().len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].contains("no active editor"));
    }

    #[tokio::test]
    async fn dropping_the_subscription_stops_the_ticker() {
        let (tx, rx) = watch::channel(UploadProgress::default());
        let subscription = ProgressSubscription::spawn(rx, "a.png".into());
        drop(subscription);
        time::timeout(Duration::from_secs(5), tx.closed())
            .await
            .unwrap();
    }
}
