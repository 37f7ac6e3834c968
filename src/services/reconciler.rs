//! Deletes stored objects that no document references any more.
//!
//! A run reads the whole corpus and scans it before any backend is
//! listed. Deletion for a backend only starts after its listing completed,
//! so a failed read or listing never removes anything.

use crate::{
    models::object::ObjectEntry,
    services::{
        backend::{BackendError, ListScope, ObjectBackend},
        documents::{CorpusError, DocumentCorpus},
        registry::ClientRegistry,
        scanner::{ReferenceSource, scan_references},
    },
};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("a reconciliation is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("listing `{backend}` failed: {source}")]
    Listing {
        backend: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of one backend's reconciliation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub backend: String,
    pub referenced: usize,
    pub live: usize,
    pub orphans: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
    /// Folder size before deletion, summed from the listing.
    pub size_before: u64,
    /// Folder size after deletion, `None` when it could not be measured.
    pub size_after: Option<u64>,
    pub dry_run: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Live objects whose name is not in `referenced`.
pub fn orphans<'a>(live: &'a [ObjectEntry], referenced: &BTreeSet<String>) -> Vec<&'a ObjectEntry> {
    live.iter()
        .filter(|entry| !referenced.contains(&entry.name))
        .collect()
}

#[derive(Debug, Default)]
pub struct Reconciler {
    dry_run: bool,
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            running: Mutex::new(()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Reconcile a single backend against `documents`.
    ///
    /// Every path referenced in the corpus protects the object with that
    /// key, whichever backend the reference names.
    pub async fn reconcile<S: AsRef<str>>(
        &self,
        source: &dyn ReferenceSource,
        documents: &[S],
        backend: &dyn ObjectBackend,
    ) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let referenced: BTreeSet<String> = scan_references(source, documents)
            .into_iter()
            .map(|r| r.path)
            .collect();

        let run_id = Uuid::new_v4();
        self.reconcile_backend(backend, &referenced)
            .instrument(info_span!("reconcile", %run_id, backend = backend.id()))
            .await
    }

    /// Reconcile every registered backend.
    ///
    /// References are attributed to the backend that would serve them. A
    /// backend that cannot be listed yields an error entry; the others are
    /// still processed. Reading the corpus is all-or-nothing.
    pub async fn reconcile_all(
        &self,
        source: &dyn ReferenceSource,
        corpus: &dyn DocumentCorpus,
        registry: &ClientRegistry,
    ) -> Result<Vec<Result<ReconcileReport, ReconcileError>>, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id);

        async {
            let documents = corpus.read_all().await?;
            let references = scan_references(source, &documents);
            info!(
                documents = documents.len(),
                references = references.len(),
                "scanned corpus"
            );

            let mut outcomes = Vec::with_capacity(registry.len());
            for backend in registry.iter() {
                let referenced: BTreeSet<String> = references
                    .iter()
                    .filter(|r| registry.serves(backend.id(), r.client.as_deref()))
                    .map(|r| r.path.clone())
                    .collect();

                let outcome = self
                    .reconcile_backend(&**backend, &referenced)
                    .instrument(info_span!("backend", id = backend.id()))
                    .await;
                if let Err(err) = &outcome {
                    warn!(error = %err, "skipping backend");
                }
                outcomes.push(outcome);
            }
            Ok::<_, ReconcileError>(outcomes)
        }
        .instrument(span)
        .await
    }

    async fn reconcile_backend(
        &self,
        backend: &dyn ObjectBackend,
        referenced: &BTreeSet<String>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let live = backend
            .list(ListScope::Folder, true)
            .await
            .map_err(|source| ReconcileError::Listing {
                backend: backend.id().to_string(),
                source,
            })?;
        let size_before: u64 = live.iter().map(|o| o.size).sum();

        let unused: Vec<String> = orphans(&live, referenced)
            .into_iter()
            .map(|o| o.name.clone())
            .collect();

        let mut report = ReconcileReport {
            backend: backend.id().to_string(),
            referenced: referenced.len(),
            live: live.len(),
            orphans: unused.clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
            size_before,
            size_after: Some(size_before),
            dry_run: self.dry_run,
        };

        if unused.is_empty() {
            info!(live = live.len(), "no unused objects");
            return Ok(report);
        }
        if self.dry_run {
            info!(count = unused.len(), "dry run, would delete unused objects");
            return Ok(report);
        }

        info!(count = unused.len(), "deleting unused objects");
        for name in unused {
            match backend.remove(&name).await {
                Ok(()) => report.deleted.push(name),
                Err(err) => {
                    warn!(object = %name, error = %err, "delete failed");
                    report.failed.push(DeleteFailure {
                        reason: err.user_message(&name),
                        name,
                    });
                }
            }
        }

        report.size_after = match backend.total_size(false).await {
            Ok(size) => Some(size),
            Err(err) => {
                warn!(error = %err, "could not measure folder size after deletion");
                None
            }
        };
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            size_before = report.size_before,
            size_after = ?report.size_after,
            "reconciliation finished"
        );
        Ok(report)
    }
}
