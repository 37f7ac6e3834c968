//! Object names for uploaded attachments.
//!
//! Names are `[parent-]disambiguator-fileName`. The disambiguator is either
//! a content hash (re-uploading identical bytes yields the same name) or a
//! strictly increasing millisecond timestamp (every upload is unique).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    path::Path,
    sync::atomic::{AtomicI64, Ordering},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("`{0}` has no file name")]
    NoFileName(String),
    #[error("file name of `{0}` is not valid UTF-8")]
    NonUtf8(String),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
    /// MD5 of the content.
    #[default]
    Hash,
    /// Wall-clock milliseconds.
    Timestamp,
}

#[derive(Debug)]
pub struct ResourceNamer {
    strategy: NamingStrategy,
    last_timestamp: AtomicI64,
}

impl ResourceNamer {
    pub fn new(strategy: NamingStrategy) -> Self {
        Self {
            strategy,
            last_timestamp: AtomicI64::new(0),
        }
    }

    pub fn strategy(&self) -> NamingStrategy {
        self.strategy
    }

    /// Build a name from explicit parts. Without a `hash` a fresh timestamp
    /// is used. `file_name` is kept verbatim.
    pub fn generate(&self, file_name: &str, parent: Option<&str>, hash: Option<&str>) -> String {
        let disambiguator = match hash.filter(|h| !h.is_empty()) {
            Some(hash) => hash.to_string(),
            None => self.next_timestamp().to_string(),
        };
        match parent.filter(|p| !p.is_empty()) {
            Some(parent) => format!("{}-{}-{}", parent, disambiguator, file_name),
            None => format!("{}-{}", disambiguator, file_name),
        }
    }

    /// Name an upload according to the configured strategy.
    pub fn name_for(&self, file_name: &str, parent: Option<&str>, content: &[u8]) -> String {
        match self.strategy {
            NamingStrategy::Hash => {
                let hash = content_hash(content);
                self.generate(file_name, parent, Some(&hash))
            }
            NamingStrategy::Timestamp => self.generate(file_name, parent, None),
        }
    }

    /// Current time in milliseconds, bumped so that no two calls on this
    /// namer return the same value.
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_timestamp.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for ResourceNamer {
    fn default() -> Self {
        Self::new(NamingStrategy::default())
    }
}

/// Final component of `path`, used verbatim as the original file name.
pub fn file_name_of(path: &Path) -> Result<String, NamingError> {
    let name = path
        .file_name()
        .ok_or_else(|| NamingError::NoFileName(path.display().to_string()))?;
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| NamingError::NonUtf8(path.display().to_string()))
}

/// Lowercase hex MD5 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
