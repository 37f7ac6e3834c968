//! Subcommand drivers. Each one loads settings, builds a context and
//! reports per-item failures without aborting the remaining work.

use crate::{
    config::{AppConfig, Args, BackendAction, Command, ConfigStore, JsonConfigStore, config_path},
    context::{Service, ServiceContext},
    models::backend::{BackendConfig, DEFAULT_BACKEND_ID},
    services::{
        documents::{FsCorpus, NoteAppender, StdoutInserter, TextInserter},
        reconciler::Reconciler,
        upload::UploadItem,
    },
};
use anyhow::{Context, Result, bail};
use std::{io, path::PathBuf};
use tracing::{error, info, warn};

pub async fn run(args: Args) -> Result<()> {
    let store = JsonConfigStore::new(config_path(&args));
    let config = AppConfig::resolve(&store, &args)
        .await
        .with_context(|| format!("loading settings from `{}`", store.path().display()))?;

    match &args.command {
        Command::Serve => serve(config, &store, &args).await,
        Command::Upload {
            files,
            backend,
            parent,
            note,
            content_type,
        } => {
            upload(
                config,
                files,
                backend.as_deref(),
                parent.as_deref(),
                note.clone(),
                content_type.as_deref(),
            )
            .await
        }
        Command::Gc { vault, dry_run } => gc(config, vault.clone(), *dry_run).await,
        Command::Usage => usage(config).await,
        Command::Backends { action } => backends(&store, action.as_ref(), &config).await,
    }
}

async fn serve(config: AppConfig, store: &JsonConfigStore, args: &Args) -> Result<()> {
    let context = ServiceContext::build(config).context("invalid configuration")?;
    let (mut service, addr) = Service::start(context).await?;
    info!(%addr, backends = ?service.context().registry.ids(), "serving attachments");

    let mut hangup = Hangup::new().context("installing SIGHUP handler")?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for Ctrl-C")?;
                break;
            }
            _ = hangup.recv() => {
                info!("reloading settings");
                match AppConfig::resolve(store, args).await {
                    Ok(next) => match service.reload(next).await {
                        Ok(addr) => info!(%addr, "proxy restarted"),
                        Err(err) => error!(error = %err, "reload failed"),
                    },
                    Err(err) => error!(error = %err, "cannot read settings, keeping current ones"),
                }
            }
        }
    }

    service.stop().await?;
    info!("shut down");
    Ok(())
}

async fn upload(
    config: AppConfig,
    files: &[PathBuf],
    backend: Option<&str>,
    parent: Option<&str>,
    note: Option<PathBuf>,
    content_type: Option<&str>,
) -> Result<()> {
    let context = ServiceContext::build(config).context("invalid configuration")?;
    let items: Vec<UploadItem> = files
        .iter()
        .map(|path| UploadItem {
            path: path.clone(),
            content_type: content_type.map(str::to_string),
        })
        .collect();

    // Links belong to the note they are inserted into.
    let parent = parent.map(str::to_string).or_else(|| {
        note.as_ref()
            .and_then(|n| n.file_stem())
            .and_then(|s| s.to_str())
            .map(str::to_string)
    });
    let inserter: Box<dyn TextInserter> = match note {
        Some(note) => Box::new(NoteAppender::new(Some(note))),
        None => Box::new(StdoutInserter),
    };

    let target = context.upload_target(backend);
    let report = context
        .upload_service()
        .upload(&items, Some(target), parent.as_deref(), inserter.as_ref())
        .await?;

    for uploaded in &report.uploaded {
        info!(file = %uploaded.file.display(), url = %uploaded.url, "link inserted");
    }
    for failure in &report.failed {
        error!("{}", failure);
    }
    if !report.failed.is_empty() {
        bail!("{} of {} uploads failed", report.failed.len(), items.len());
    }
    Ok(())
}

async fn gc(config: AppConfig, vault: PathBuf, dry_run: bool) -> Result<()> {
    let mut context = ServiceContext::build(config).context("invalid configuration")?;
    context.reconciler = Reconciler::new(dry_run);
    let corpus = FsCorpus::new(vault);

    let outcomes = context
        .reconciler
        .reconcile_all(&context.scanner, &corpus, &context.registry)
        .await
        .context("reconciliation aborted")?;

    let mut failures = 0;
    for outcome in outcomes {
        match outcome {
            Ok(report) if report.dry_run => println!(
                "{}: {} of {} objects unused (dry run)",
                report.backend,
                report.orphans.len(),
                report.live
            ),
            Ok(report) => {
                let after = report
                    .size_after
                    .map(format_bytes)
                    .unwrap_or_else(|| "unknown".into());
                println!(
                    "{}: deleted {} of {} objects, {} -> {}",
                    report.backend,
                    report.deleted.len(),
                    report.live,
                    format_bytes(report.size_before),
                    after
                );
                for failure in &report.failed {
                    failures += 1;
                    println!("  failed: {}", failure.reason);
                }
            }
            Err(err) => {
                failures += 1;
                println!("{}", err);
            }
        }
    }

    if failures > 0 {
        bail!("{} reconciliation failures", failures);
    }
    Ok(())
}

async fn usage(config: AppConfig) -> Result<()> {
    let context = ServiceContext::build(config).context("invalid configuration")?;
    for backend in context.registry.iter() {
        let folder = backend.total_size(false).await;
        let bucket = backend.total_size(true).await;
        match (folder, bucket) {
            (Ok(folder), Ok(bucket)) => println!(
                "{}: {} in {}/{}, {} in bucket",
                backend.id(),
                format_bytes(folder),
                backend.bucket(),
                backend.folder(),
                format_bytes(bucket)
            ),
            (Err(err), _) | (_, Err(err)) => {
                warn!(backend = backend.id(), error = %err, "usage unavailable");
                println!("{}", err.user_message(backend.id()));
            }
        }
    }
    Ok(())
}

async fn backends(
    store: &JsonConfigStore,
    action: Option<&BackendAction>,
    effective: &AppConfig,
) -> Result<()> {
    match action {
        None | Some(BackendAction::List) => {
            print_backends(effective, &mut io::stdout().lock())?;
            Ok(())
        }
        Some(BackendAction::Add {
            id,
            endpoint,
            access_key,
            secret_key,
            bucket,
            folder,
            region,
        }) => {
            let mut stored = store.load().await?;
            let mut backend = BackendConfig::new(
                id.as_str(),
                endpoint.as_str(),
                access_key.as_str(),
                secret_key.as_str(),
                bucket.as_str(),
                folder.as_str(),
            );
            if let Some(region) = region {
                backend.region = region.clone();
            }
            let missing = backend.missing_fields();
            if !missing.is_empty() {
                bail!("backend `{}` is missing {}", id, missing.join(", "));
            }
            stored.add_backend(backend)?;
            store.save(&stored).await?;
            info!(backend = %id, "backend added");
            Ok(())
        }
        Some(BackendAction::Remove { id }) => {
            let mut stored = store.load().await?;
            stored.remove_backend(id)?;
            store.save(&stored).await?;
            info!(backend = %id, "backend removed");
            Ok(())
        }
    }
}

fn print_backends(config: &AppConfig, out: &mut impl io::Write) -> io::Result<()> {
    for client in &config.clients {
        let mut tags = Vec::new();
        if client.id == DEFAULT_BACKEND_ID {
            tags.push("default");
        }
        if client.id == config.active_client {
            tags.push("active");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        writeln!(
            out,
            "{}{}: {} bucket={} folder={}",
            client.id,
            tags,
            client.endpoint,
            client.bucket,
            client.normalized_folder()
        )?;
    }
    Ok(())
}

/// Human-readable binary size, one decimal above bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// SIGHUP on unix; never fires elsewhere.
struct Hangup {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl Hangup {
    fn new() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            signal: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.signal.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    }
}
