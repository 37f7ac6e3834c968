//! The `ObjectBackend` contract every configured store implements.
//!
//! A backend is scoped to one bucket and one folder. Object paths passed to
//! `get`/`remove` are keys relative to the bucket root (folder included),
//! exactly as they appear in proxy URLs and listings; names passed to `put`
//! are relative to the folder.

use crate::models::object::{ObjectEntry, UploadProgress};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;
use tokio::sync::watch;

/// Body of a downloaded object, consumed incrementally.
pub type ObjectStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("access denied for `{0}`")]
    AccessDenied(String),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend misconfigured: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Actionable hint appended to user-facing notices.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            BackendError::AccessDenied(_) | BackendError::Config(_) => {
                Some("check credentials and bucket settings")
            }
            BackendError::Unreachable(_) => Some("check the endpoint and your network connection"),
            BackendError::ObjectNotFound(_) => Some("the object may have been deleted"),
            BackendError::Backend(_) | BackendError::Io(_) => None,
        }
    }

    /// One-line message naming the object, without backend internals.
    pub fn user_message(&self, object: &str) -> String {
        let what = match self {
            BackendError::ObjectNotFound(_) => "not found",
            BackendError::AccessDenied(_) => "access denied",
            BackendError::Unreachable(_) => "backend unreachable",
            BackendError::Config(_) => "backend misconfigured",
            BackendError::Backend(_) | BackendError::Io(_) => "backend request failed",
        };
        match self.hint() {
            Some(hint) => format!("{}: {} ({})", object, what, hint),
            None => format!("{}: {}", object, what),
        }
    }
}

/// Which part of the bucket a listing covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListScope {
    /// Only the backend's configured folder.
    Folder,
    /// The whole bucket, including objects this tool did not create.
    Bucket,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Registry identifier (`?client=<id>`).
    fn id(&self) -> &str;

    fn bucket(&self) -> &str;

    /// Folder prefix without surrounding slashes.
    fn folder(&self) -> &str;

    /// Full key for an object name inside the folder.
    fn object_key(&self, name: &str) -> String {
        let folder = self.folder();
        if folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", folder, name)
        }
    }

    /// Store `data` under `folder/name` and return the full key.
    ///
    /// Progress is published on `progress` each time the backend
    /// acknowledges a part. An upload sent as a single request is one part,
    /// so it moves from 0 to `total` when the request completes. Exactly
    /// one final update with `finished = true` is sent whether the upload
    /// succeeds or fails.
    async fn put(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
        progress: &watch::Sender<UploadProgress>,
    ) -> BackendResult<String>;

    /// Open a streaming reader for `path`.
    async fn get(&self, path: &str) -> BackendResult<ObjectStream>;

    /// List objects. Non-recursive listings stop at the next `/`.
    async fn list(&self, scope: ListScope, recursive: bool) -> BackendResult<Vec<ObjectEntry>>;

    /// Delete `path`. Removing a missing object succeeds.
    async fn remove(&self, path: &str) -> BackendResult<()>;

    /// Sum of object sizes in the folder, or in the whole bucket when
    /// `include_all` is set. An empty listing is 0.
    async fn total_size(&self, include_all: bool) -> BackendResult<u64> {
        let scope = if include_all {
            ListScope::Bucket
        } else {
            ListScope::Folder
        };
        let objects = self.list(scope, true).await?;
        Ok(objects.iter().map(|o| o.size).sum())
    }
}
