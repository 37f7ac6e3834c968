//! S3-compatible backend built on the AWS SDK.

use crate::{
    models::{
        backend::BackendConfig,
        object::{ObjectEntry, UploadProgress},
    },
    services::backend::{BackendError, BackendResult, ListScope, ObjectBackend, ObjectStream},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// S3 requires every part but the last to be at least 5 MiB.
const PART_SIZE: usize = 5 * 1024 * 1024;

/// Uploads above this size go through multipart upload.
const MULTIPART_THRESHOLD: usize = PART_SIZE;

pub struct S3Backend {
    client: Client,
    id: String,
    bucket: String,
    folder: String,
    endpoint: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("folder", &self.folder)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client for one configured backend. No network I/O happens
    /// here; bad credentials surface on the first request.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(BackendError::Config(format!(
                "backend `{}` is missing {}",
                config.id,
                missing.join(", ")
            )));
        }

        let (host, explicit_tls) = normalize_endpoint(&config.endpoint)
            .ok_or_else(|| BackendError::Config(format!("invalid endpoint `{}`", config.endpoint)))?;
        let scheme = if explicit_tls.unwrap_or(config.use_ssl) {
            "https"
        } else {
            "http"
        };
        let endpoint_url = format!("{}://{}", scheme, host);

        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "s3-attach-config",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint_url)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            backend = %config.id,
            endpoint = %endpoint_url,
            bucket = %config.bucket,
            "S3 client initialized"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            id: config.id.clone(),
            bucket: config.bucket.clone(),
            folder: config.normalized_folder().to_string(),
            endpoint: endpoint_url,
        })
    }

    fn list_prefix(&self, scope: ListScope) -> Option<String> {
        match scope {
            ListScope::Folder if !self.folder.is_empty() => Some(format!("{}/", self.folder)),
            _ => None,
        }
    }

    async fn simple_upload(&self, key: &str, data: Bytes, content_type: &str) -> BackendResult<()> {
        let digest = md5::compute(&data);
        let content_md5 = general_purpose::STANDARD.encode(digest.0);
        let len = data.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_length(len)
            .content_type(content_type)
            .content_md5(content_md5)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn multipart_upload(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: &watch::Sender<UploadProgress>,
    ) -> BackendResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| BackendError::Backend("no upload id in response".into()))?
            .to_string();

        match self.upload_parts(key, &upload_id, data, progress).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %DisplayErrorContext(&abort_err), "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: Bytes,
        progress: &watch::Sender<UploadProgress>,
    ) -> BackendResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut offset = 0usize;
        let mut part_number = 1;
        while offset < data.len() {
            let end = (offset + PART_SIZE).min(data.len());
            let chunk = data.slice(offset..end);
            let chunk_len = chunk.len() as u64;

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .build(),
            );
            progress.send_modify(|p| p.transferred += chunk_len);
            debug!(key = %key, part = part_number, "uploaded part");

            offset = end;
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn id(&self) -> &str {
        &self.id
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn folder(&self) -> &str {
        &self.folder
    }

    #[instrument(skip(self, data, progress), fields(backend = %self.id, size = data.len()))]
    async fn put(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
        progress: &watch::Sender<UploadProgress>,
    ) -> BackendResult<String> {
        let key = self.object_key(name);
        let total = data.len() as u64;
        progress.send_replace(UploadProgress {
            transferred: 0,
            total,
            finished: false,
        });

        let result = if data.len() > MULTIPART_THRESHOLD {
            self.multipart_upload(&key, data, content_type, progress).await
        } else {
            // One request, one acknowledged part.
            let result = self.simple_upload(&key, data, content_type).await;
            if result.is_ok() {
                progress.send_modify(|p| p.transferred = total);
            }
            result
        };

        progress.send_modify(|p| p.finished = true);
        result.map(|_| key)
    }

    #[instrument(skip(self), fields(backend = %self.id))]
    async fn get(&self, path: &str) -> BackendResult<ObjectStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))?;

        let reader = ReaderStream::new(output.body.into_async_read());
        Ok(Box::pin(reader))
    }

    #[instrument(skip(self), fields(backend = %self.id))]
    async fn list(&self, scope: ListScope, recursive: bool) -> BackendResult<Vec<ObjectEntry>> {
        let prefix = self.list_prefix(scope);
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(prefix) = &prefix {
                request = request.prefix(prefix);
            }
            if !recursive {
                request = request.delimiter("/");
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| map_sdk_error(e, prefix.as_deref().unwrap_or(&self.bucket)))?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    let size = obj.size().unwrap_or(0).max(0) as u64;
                    entries.push(ObjectEntry::new(key, size));
                }
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(backend = %self.id, count = entries.len(), "listed objects");
        Ok(entries)
    }

    #[instrument(skip(self), fields(backend = %self.id))]
    async fn remove(&self, path: &str) -> BackendResult<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, path))
        {
            Ok(_) | Err(BackendError::ObjectNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Reduce an endpoint to `host[:port]`.
///
/// Returns the host and, when the input carried a scheme, whether that
/// scheme was `https`.
pub fn normalize_endpoint(endpoint: &str) -> Option<(String, Option<bool>)> {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        let url = Url::parse(endpoint).ok()?;
        let host = url.host_str()?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        return Some((host, Some(url.scheme() == "https")));
    }

    let host = endpoint.split('/').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some((host.to_string(), None))
    }
}

fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> BackendError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    debug!(key = %key, error = %detail, "S3 request failed");
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => BackendError::Unreachable(detail),
        SdkError::ServiceError(service_err) => match service_err.raw().status().as_u16() {
            404 => BackendError::ObjectNotFound(key.to_string()),
            401 | 403 => BackendError::AccessDenied(key.to_string()),
            _ => BackendError::Backend(detail),
        },
        SdkError::ConstructionFailure(_) => BackendError::Config(detail),
        _ => BackendError::Backend(detail),
    }
}
