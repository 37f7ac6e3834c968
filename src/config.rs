use crate::{
    models::{
        backend::{BackendConfig, DEFAULT_BACKEND_ID},
        mime::DEFAULT_MIME_TABLE,
    },
    services::naming::NamingStrategy,
};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4998;
pub const DEFAULT_CONFIG_FILE: &str = "s3-attach.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("no `default` backend configured")]
    MissingDefault,
    #[error("backend id must not be empty")]
    EmptyId,
    #[error("backend `{0}` is configured more than once")]
    DuplicateId(String),
    #[error("backend `{id}` is missing {}", .fields.join(", "))]
    MissingFields {
        id: String,
        fields: Vec<&'static str>,
    },
    #[error("the `default` backend cannot be removed")]
    DefaultNotRemovable,
    #[error("backend `{0}` is not configured")]
    UnknownBackend(String),
    #[error("invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },
    #[error("reading `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Persisted settings, plus the listener address overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Backend new uploads go to.
    pub active_client: String,
    pub naming: NamingStrategy,
    /// `method, .ext, mime/type` per line.
    pub mime_table: String,
    pub clients: Vec<BackendConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            active_client: DEFAULT_BACKEND_ID.into(),
            naming: NamingStrategy::default(),
            mime_table: DEFAULT_MIME_TABLE.into(),
            clients: Vec::new(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Serve and clean up note attachments stored in S3-compatible buckets"
)]
pub struct Args {
    /// Settings file (overrides S3_ATTACH_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides S3_ATTACH_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Proxy port (overrides S3_ATTACH_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the resolving proxy until interrupted. SIGHUP reloads settings.
    Serve,
    /// Upload files and insert their links.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Backend id (defaults to the active backend)
        #[arg(long)]
        backend: Option<String>,
        /// Name of the document the files belong to
        #[arg(long)]
        parent: Option<String>,
        /// Append links to this note instead of printing them
        #[arg(long)]
        note: Option<PathBuf>,
        /// Content type for every file, bypassing the mime table
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Delete objects no note references any more.
    Gc {
        /// Directory holding the markdown notes
        #[arg(long)]
        vault: PathBuf,
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
    /// Show storage used per backend.
    Usage,
    /// List, add or remove backends.
    Backends {
        #[command(subcommand)]
        action: Option<BackendAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackendAction {
    List,
    Add {
        id: String,
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        access_key: String,
        #[arg(long)]
        secret_key: String,
        #[arg(long)]
        bucket: String,
        #[arg(long, default_value = "")]
        folder: String,
        #[arg(long)]
        region: Option<String>,
    },
    Remove {
        id: String,
    },
}

/// Host/port values layered over the settings file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Overrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("S3_ATTACH_HOST").ok().filter(|h| !h.is_empty());
        let port = match env::var("S3_ATTACH_PORT") {
            Ok(value) => Some(value.parse::<u16>().map_err(|_| ConfigError::Env {
                var: "S3_ATTACH_PORT",
                value,
            })?),
            Err(_) => None,
        };
        Ok(Self { host, port })
    }

    pub fn from_args(args: &Args) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
        }
    }
}

/// `--config`, else `S3_ATTACH_CONFIG`, else `./s3-attach.json`.
pub fn config_path(args: &Args) -> PathBuf {
    args.config
        .clone()
        .or_else(|| env::var_os("S3_ATTACH_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

impl AppConfig {
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        self
    }

    /// Load from `store`, then apply environment and CLI overrides.
    pub async fn resolve(store: &dyn ConfigStore, args: &Args) -> Result<Self, ConfigError> {
        let env = Overrides::from_env()?;
        Ok(store
            .load()
            .await?
            .with_overrides(&env)
            .with_overrides(&Overrides::from_args(args)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Prefix of every object URL handed out.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Check the invariants the proxy relies on. Nothing may start on
    /// an invalid configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.id.trim().is_empty() {
                return Err(ConfigError::EmptyId);
            }
            if !seen.insert(client.id.as_str()) {
                return Err(ConfigError::DuplicateId(client.id.clone()));
            }
            let missing = client.missing_fields();
            if !missing.is_empty() {
                return Err(ConfigError::MissingFields {
                    id: client.id.clone(),
                    fields: missing,
                });
            }
        }

        if !seen.contains(DEFAULT_BACKEND_ID) {
            return Err(ConfigError::MissingDefault);
        }
        Ok(())
    }

    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn add_backend(&mut self, backend: BackendConfig) -> Result<(), ConfigError> {
        if backend.id.trim().is_empty() {
            return Err(ConfigError::EmptyId);
        }
        if self.backend(&backend.id).is_some() {
            return Err(ConfigError::DuplicateId(backend.id));
        }
        self.clients.push(backend);
        Ok(())
    }

    /// Remove a backend. The active backend falls back to `default` when
    /// it is the one removed.
    pub fn remove_backend(&mut self, id: &str) -> Result<BackendConfig, ConfigError> {
        if id == DEFAULT_BACKEND_ID {
            return Err(ConfigError::DefaultNotRemovable);
        }
        let pos = self
            .clients
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ConfigError::UnknownBackend(id.to_string()))?;
        if self.active_client == id {
            self.active_client = DEFAULT_BACKEND_ID.into();
        }
        Ok(self.clients.remove(pos))
    }
}

/// Where settings are persisted.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<AppConfig, ConfigError>;

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError>;
}

/// Pretty-printed JSON file. A missing file loads as the defaults.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self) -> impl Fn(io::Error) -> ConfigError + '_ {
        move |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no settings file, using defaults");
                return Ok(AppConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let body = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(self.write_err())?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &body).await.map_err(self.write_err())?;
        fs::rename(&tmp, &self.path).await.map_err(self.write_err())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(id: &str) -> BackendConfig {
        BackendConfig::new(id, "s3.example.com", "key", "secret", "bucket", "obsidian")
    }

    fn valid() -> AppConfig {
        AppConfig {
            clients: vec![backend("default"), backend("work")],
            ..AppConfig::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validation_catches_each_invariant() {
        let mut cfg = valid();
        cfg.port = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPort)));

        let cfg = AppConfig {
            clients: vec![backend("work")],
            ..AppConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingDefault)));

        let mut cfg = valid();
        cfg.clients.push(backend("work"));
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateId(id)) if id == "work"));

        let mut cfg = valid();
        cfg.clients.push(backend(" "));
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyId)));

        let mut cfg = valid();
        cfg.clients[1].secret_key.clear();
        cfg.clients[1].bucket = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "backend `work` is missing secret_key, bucket");
    }

    #[test]
    fn default_backend_cannot_be_removed() {
        let mut cfg = valid();
        assert!(matches!(
            cfg.remove_backend("default"),
            Err(ConfigError::DefaultNotRemovable)
        ));
        assert!(matches!(
            cfg.remove_backend("nope"),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn removing_the_active_backend_resets_it() {
        let mut cfg = valid();
        cfg.active_client = "work".into();
        let removed = cfg.remove_backend("work").unwrap();
        assert_eq!(removed.id, "work");
        assert_eq!(cfg.active_client, "default");
        assert_eq!(cfg.clients.len(), 1);
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut cfg = valid();
        assert!(matches!(
            cfg.add_backend(backend("work")),
            Err(ConfigError::DuplicateId(_))
        ));
        cfg.add_backend(backend("archive")).unwrap();
        assert!(cfg.backend("archive").is_some());
    }

    #[test]
    fn cli_overrides_env_overrides_file() {
        let file = AppConfig {
            port: 5000,
            host: "0.0.0.0".into(),
            ..valid()
        };
        let env = Overrides {
            host: None,
            port: Some(6000),
        };
        let cli = Overrides {
            host: Some("127.0.0.1".into()),
            port: Some(7000),
        };

        let merged = file.clone().with_overrides(&env);
        assert_eq!((merged.host.as_str(), merged.port), ("0.0.0.0", 6000));
        let merged = merged.with_overrides(&cli);
        assert_eq!((merged.host.as_str(), merged.port), ("127.0.0.1", 7000));
        assert_eq!(merged.base_url(), "http://localhost:7000");
    }

    #[test]
    fn parses_minimal_json_with_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"clients":[{"id":"default","endpoint":"e","access_key":"a","secret_key":"s","bucket":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.naming, NamingStrategy::Hash);
        assert_eq!(cfg.clients[0].region, "us-east-1");
        assert!(cfg.clients[0].use_ssl);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::parse_from(["s3-attach", "--port", "5001", "gc", "--vault", "notes", "--dry-run"]);
        assert_eq!(args.port, Some(5001));
        assert!(matches!(
            args.command,
            Command::Gc { ref vault, dry_run: true } if vault == Path::new("notes")
        ));

        let args = Args::parse_from(["s3-attach", "upload", "a.png", "b.mp4", "--parent", "trip"]);
        match args.command {
            Command::Upload { files, parent, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(parent.as_deref(), Some("trip"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn json_store_round_trips_and_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("nested/settings.json"));
        assert_eq!(store.load().await.unwrap(), AppConfig::default());

        let cfg = AppConfig {
            naming: NamingStrategy::Timestamp,
            ..valid()
        };
        store.save(&cfg).await.unwrap();
        assert_eq!(store.load().await.unwrap(), cfg);
        assert!(!dir.path().join("nested/settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_settings_are_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonConfigStore::new(&path);
        assert!(matches!(store.load().await, Err(ConfigError::Parse { .. })));
    }
}
