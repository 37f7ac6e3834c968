//! Everything built from one configuration snapshot.

use crate::{
    config::{AppConfig, ConfigError},
    models::mime::MimeTable,
    services::{
        backend::BackendError,
        naming::ResourceNamer,
        reconciler::Reconciler,
        registry::ClientRegistry,
        scanner::ReferenceScanner,
        server::{ProxyServer, ProxyState, ServerError},
        upload::UploadService,
    },
};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid proxy base url: {0}")]
    BaseUrl(#[from] regex::Error),
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Registry, MIME table, namer and reconciler for one configuration.
pub struct ServiceContext {
    pub config: AppConfig,
    pub registry: Arc<ClientRegistry>,
    pub mime: Arc<MimeTable>,
    pub namer: Arc<ResourceNamer>,
    pub scanner: ReferenceScanner,
    pub reconciler: Reconciler,
}

impl ServiceContext {
    /// Validate `config` and build every backend client. Fails without
    /// side effects.
    pub fn build(config: AppConfig) -> Result<Self, ContextError> {
        config.validate()?;
        let registry = ClientRegistry::from_configs(&config.clients)?;
        let mime = MimeTable::parse(&config.mime_table);
        if mime.is_empty() {
            warn!("mime table is empty, every file will be served as text/plain");
        }
        let scanner = ReferenceScanner::new(&config.base_url())?;

        Ok(Self {
            registry: Arc::new(registry),
            mime: Arc::new(mime),
            namer: Arc::new(ResourceNamer::new(config.naming)),
            scanner,
            reconciler: Reconciler::default(),
            config,
        })
    }

    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    pub fn proxy_state(&self) -> ProxyState {
        ProxyState {
            registry: self.registry.clone(),
            mime: self.mime.clone(),
        }
    }

    pub fn upload_service(&self) -> UploadService {
        UploadService::new(
            self.registry.clone(),
            self.mime.clone(),
            self.namer.clone(),
            self.base_url(),
        )
    }

    /// Backend for new uploads: `requested`, else the active backend.
    pub fn upload_target<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.config.active_client)
    }
}

/// The running proxy and the context it serves.
pub struct Service {
    context: ServiceContext,
    server: ProxyServer,
}

impl Service {
    pub async fn start(context: ServiceContext) -> Result<(Self, SocketAddr), ContextError> {
        let mut server = ProxyServer::new(
            context.config.host.clone(),
            context.config.port,
            context.proxy_state(),
        );
        let addr = server.start().await?;
        Ok((Self { context, server }, addr))
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Swap in a new configuration.
    ///
    /// The new context is built first; if that fails the current listener
    /// keeps running. Otherwise the old listener is fully stopped before
    /// the new one binds. If the new listener cannot bind, the old one is
    /// started again with the old context and the bind error is returned.
    pub async fn reload(&mut self, config: AppConfig) -> Result<SocketAddr, ContextError> {
        let context = ServiceContext::build(config)?;
        self.server.stop().await?;

        let mut server = ProxyServer::new(
            context.config.host.clone(),
            context.config.port,
            context.proxy_state(),
        );
        let addr = match server.start().await {
            Ok(addr) => addr,
            Err(err) => {
                warn!(error = %err, "new listener failed, restoring the previous one");
                if let Err(restore) = self.server.start().await {
                    error!(error = %restore, "previous listener could not be restored");
                }
                return Err(err.into());
            }
        };
        self.context = context;
        self.server = server;
        info!(%addr, backends = ?self.context.registry.ids(), "configuration reloaded");
        Ok(addr)
    }

    pub async fn stop(&mut self) -> Result<(), ContextError> {
        self.server.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backend::BackendConfig;

    fn config(port: u16) -> AppConfig {
        AppConfig {
            port,
            clients: vec![
                BackendConfig::new("default", "http://127.0.0.1:9", "k", "s", "b", "obsidian"),
                BackendConfig::new("work", "http://127.0.0.1:9", "k", "s", "w", ""),
            ],
            ..AppConfig::default()
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let mut cfg = config(4998);
        cfg.clients.remove(0);
        assert!(matches!(
            ServiceContext::build(cfg),
            Err(ContextError::Config(ConfigError::MissingDefault))
        ));
    }

    #[tokio::test]
    async fn upload_target_defaults_to_active_backend() {
        let mut cfg = config(4998);
        cfg.active_client = "work".into();
        let ctx = ServiceContext::build(cfg).unwrap();
        assert_eq!(ctx.upload_target(None), "work");
        assert_eq!(ctx.upload_target(Some("default")), "default");
        assert_eq!(ctx.base_url(), "http://localhost:4998");
    }

    #[tokio::test]
    async fn invalid_reload_keeps_the_old_listener() {
        let port = free_port();
        let ctx = ServiceContext::build(config(port)).unwrap();
        let (mut service, addr) = Service::start(ctx).await.unwrap();

        let mut broken = config(port);
        broken.clients.clear();
        assert!(service.reload(broken).await.is_err());
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
        assert_eq!(service.context().registry.len(), 2);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_bind_on_reload_restores_the_old_listener() {
        let port = free_port();
        let ctx = ServiceContext::build(config(port)).unwrap();
        let (mut service, addr) = Service::start(ctx).await.unwrap();

        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let next = config(taken.local_addr().unwrap().port());
        assert!(matches!(
            service.reload(next).await,
            Err(ContextError::Server(ServerError::Bind { .. }))
        ));
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
        assert_eq!(service.context().config.port, port);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reload_rebinds_the_same_port() {
        let port = free_port();
        let ctx = ServiceContext::build(config(port)).unwrap();
        let (mut service, addr) = Service::start(ctx).await.unwrap();

        let mut next = config(port);
        next.clients.truncate(1);
        let reloaded = service.reload(next).await.unwrap();
        assert_eq!(reloaded, addr);
        assert_eq!(service.context().registry.ids(), vec!["default"]);

        service.stop().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
