//! Ordered collection of configured backends.

use crate::{
    models::backend::{BackendConfig, DEFAULT_BACKEND_ID},
    services::{
        backend::{BackendError, BackendResult, ObjectBackend},
        s3_backend::S3Backend,
    },
};
use std::sync::Arc;

/// Backends keyed by id, default first.
///
/// Lookups never fail: a request naming an unknown backend is served by
/// the default one.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Vec<Arc<dyn ObjectBackend>>,
}

impl ClientRegistry {
    /// Build S3 clients for every configured backend.
    ///
    /// The configuration is expected to be validated; a backend that still
    /// fails to construct aborts the whole build.
    pub fn from_configs(configs: &[BackendConfig]) -> BackendResult<Self> {
        let clients = configs
            .iter()
            .map(|cfg| S3Backend::new(cfg).map(|b| Arc::new(b) as Arc<dyn ObjectBackend>))
            .collect::<BackendResult<Vec<_>>>()?;
        Self::new(clients)
    }

    /// Register backends in order, moving the `default` one to the front.
    /// An empty list is a configuration error.
    pub fn new(mut clients: Vec<Arc<dyn ObjectBackend>>) -> BackendResult<Self> {
        if clients.is_empty() {
            return Err(BackendError::Config(
                "at least one backend must be configured".into(),
            ));
        }
        if let Some(pos) = clients.iter().position(|c| c.id() == DEFAULT_BACKEND_ID) {
            let default = clients.remove(pos);
            clients.insert(0, default);
        }
        Ok(Self { clients })
    }

    /// Exact match on `id`, else the default backend.
    pub fn resolve(&self, id: Option<&str>) -> Arc<dyn ObjectBackend> {
        id.and_then(|id| self.get(id))
            .unwrap_or_else(|| self.default_client())
    }

    /// Exact match only.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ObjectBackend>> {
        self.clients.iter().find(|c| c.id() == id).cloned()
    }

    pub fn default_client(&self) -> Arc<dyn ObjectBackend> {
        self.clients[0].clone()
    }

    /// Whether a reference naming `client` would be served by `backend_id`.
    pub fn serves(&self, backend_id: &str, client: Option<&str>) -> bool {
        self.resolve(client).id() == backend_id
    }

    pub fn ids(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ObjectBackend>> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
