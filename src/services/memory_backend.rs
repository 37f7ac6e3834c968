//! In-memory `ObjectBackend` used by unit tests.

use crate::{
    models::object::{ObjectEntry, UploadProgress},
    services::backend::{BackendError, BackendResult, ListScope, ObjectBackend, ObjectStream},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::watch;

/// Bytes handed out per stream item by `get`.
const CHUNK: usize = 4;

#[derive(Default)]
pub struct MemoryBackend {
    id: String,
    bucket: String,
    folder: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    unreachable: AtomicBool,
    failing_removes: Mutex<BTreeSet<String>>,
    pub put_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    removed: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new(id: &str, bucket: &str, folder: &str) -> Self {
        Self {
            id: id.to_string(),
            bucket: bucket.to_string(),
            folder: folder.trim_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Store an object under its full key.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub fn with_object(self, key: &str, data: impl Into<Bytes>) -> Self {
        self.insert(key, data);
        self
    }

    /// Every call fails with `Unreachable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make `remove` fail for this key.
    pub fn fail_remove_of(&self, key: &str) {
        self.failing_removes.lock().unwrap().insert(key.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Keys passed to `remove`, in call order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> BackendResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(BackendError::Unreachable(format!(
                "connect to {} refused",
                self.id
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn folder(&self) -> &str {
        &self.folder
    }

    async fn put(
        &self,
        name: &str,
        data: Bytes,
        _content_type: &str,
        progress: &watch::Sender<UploadProgress>,
    ) -> BackendResult<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let total = data.len() as u64;
        progress.send_replace(UploadProgress {
            transferred: 0,
            total,
            finished: false,
        });

        let result = self.check_reachable().map(|_| {
            for chunk in data.chunks(CHUNK) {
                let n = chunk.len() as u64;
                progress.send_modify(|p| p.transferred += n);
            }
            let key = self.object_key(name);
            self.insert(&key, data);
            key
        });

        progress.send_modify(|p| p.finished = true);
        result
    }

    async fn get(&self, path: &str) -> BackendResult<ObjectStream> {
        self.check_reachable()?;
        let data = self
            .object(path)
            .ok_or_else(|| BackendError::ObjectNotFound(path.to_string()))?;
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list(&self, scope: ListScope, recursive: bool) -> BackendResult<Vec<ObjectEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let prefix = match scope {
            ListScope::Folder if !self.folder.is_empty() => format!("{}/", self.folder),
            _ => String::new(),
        };
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| recursive || !key[prefix.len()..].contains('/'))
            .map(|(key, data)| ObjectEntry::new(key.clone(), data.len() as u64))
            .collect())
    }

    async fn remove(&self, path: &str) -> BackendResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.failing_removes.lock().unwrap().contains(path) {
            return Err(BackendError::AccessDenied(path.to_string()));
        }
        self.removed.lock().unwrap().push(path.to_string());
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}
