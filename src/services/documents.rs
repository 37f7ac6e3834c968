//! Document corpus and editor insertion point.
//!
//! The note-taking host owns both; these traits are the boundary. The
//! filesystem implementations treat a directory of markdown notes as the
//! corpus and a note file as the active editor.

use async_trait::async_trait;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("no active editor")]
    NoActiveEditor,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Opaque handle to one document.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocumentHandle(PathBuf);

impl DocumentHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name without extension, used as the parent name of uploads.
    pub fn basename(&self) -> Option<&str> {
        self.0.file_stem().and_then(|s| s.to_str())
    }
}

#[async_trait]
pub trait DocumentCorpus: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<DocumentHandle>, CorpusError>;

    async fn read_text(&self, handle: &DocumentHandle) -> Result<String, CorpusError>;

    /// Read every document. Any failure aborts the whole read so callers
    /// never act on a partial corpus.
    async fn read_all(&self) -> Result<Vec<String>, CorpusError> {
        let handles = self.list_documents().await?;
        let mut texts = Vec::with_capacity(handles.len());
        for handle in &handles {
            texts.push(self.read_text(handle).await?);
        }
        Ok(texts)
    }
}

#[async_trait]
pub trait TextInserter: Send + Sync {
    async fn insert_text_at_cursor(&self, text: &str) -> Result<(), InsertError>;
}

/// Markdown notes under a vault directory. Hidden entries (`.obsidian`,
/// `.trash`, dotfiles) are skipped.
#[derive(Debug, Clone)]
pub struct FsCorpus {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["md".to_string()],
        }
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        self
    }

    fn wanted(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DocumentCorpus for FsCorpus {
    async fn list_documents(&self) -> Result<Vec<DocumentHandle>, CorpusError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let read_err = |source| CorpusError::Read {
                path: dir.clone(),
                source,
            };
            let mut entries = fs::read_dir(&dir).await.map_err(read_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(read_err)?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && self.wanted(&path) {
                    found.push(DocumentHandle::new(path));
                }
            }
        }

        found.sort();
        debug!(root = %self.root.display(), count = found.len(), "listed documents");
        Ok(found)
    }

    async fn read_text(&self, handle: &DocumentHandle) -> Result<String, CorpusError> {
        fs::read_to_string(handle.path())
            .await
            .map_err(|source| CorpusError::Read {
                path: handle.path().to_path_buf(),
                source,
            })
    }
}

/// Appends inserted text as a new line at the end of a note file.
#[derive(Debug, Clone)]
pub struct NoteAppender {
    note: Option<PathBuf>,
}

impl NoteAppender {
    pub fn new(note: Option<PathBuf>) -> Self {
        Self { note }
    }
}

#[async_trait]
impl TextInserter for NoteAppender {
    async fn insert_text_at_cursor(&self, text: &str) -> Result<(), InsertError> {
        let note = self.note.as_ref().ok_or(InsertError::NoActiveEditor)?;
        if !fs::try_exists(note).await? {
            return Err(InsertError::NoActiveEditor);
        }

        let existing = fs::read(note).await?;
        let mut file = fs::OpenOptions::new().append(true).open(note).await?;
        if !existing.is_empty() && !existing.ends_with(b"\n") {
            file.write_all(b"\n").await?;
        }
        file.write_all(text.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Prints inserted text to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutInserter;

#[async_trait]
impl TextInserter for StdoutInserter {
    async fn insert_text_at_cursor(&self, text: &str) -> Result<(), InsertError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}
