//! Configuration of one S3-compatible backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the backend that always exists and cannot be removed.
pub const DEFAULT_BACKEND_ID: &str = "default";

/// Connection settings for a single S3-compatible endpoint.
///
/// A backend is addressed by `id` in object URLs (`?client=<id>`), so ids
/// must be unique within a configuration.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Unique, non-empty identifier.
    pub id: String,

    /// Endpoint host. A full URL is accepted and normalized to its host.
    pub endpoint: String,

    pub access_key: String,

    pub secret_key: String,

    /// Bucket holding the objects.
    pub bucket: String,

    /// Key prefix under which uploaded objects are stored.
    #[serde(default)]
    pub folder: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Talk HTTPS to the endpoint.
    #[serde(default = "default_true")]
    pub use_ssl: bool,

    /// Path-style addressing (`endpoint/bucket/key`), needed by most
    /// non-AWS gateways.
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

impl BackendConfig {
    /// Build a config with default region and transport flags.
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            folder: folder.into(),
            region: default_region(),
            use_ssl: true,
            force_path_style: true,
        }
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint.trim().is_empty() {
            missing.push("endpoint");
        }
        if self.access_key.trim().is_empty() {
            missing.push("access_key");
        }
        if self.secret_key.trim().is_empty() {
            missing.push("secret_key");
        }
        if self.bucket.trim().is_empty() {
            missing.push("bucket");
        }
        missing
    }

    /// Folder without surrounding slashes; empty means bucket root.
    pub fn normalized_folder(&self) -> &str {
        self.folder.trim_matches('/')
    }
}

// Secrets stay out of logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("folder", &self.folder)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}
