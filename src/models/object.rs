//! Represents an object as reported by a backend listing.

use serde::Serialize;

/// A single object (blob) in a bucket.
///
/// `name` is the full key relative to the bucket root, folder included,
/// which is also the path used in proxy URLs.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,

    /// Size in bytes.
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Progress of a single upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes acknowledged by the backend so far.
    pub transferred: u64,
    pub total: u64,
    /// Set once when the transfer has ended, successfully or not.
    pub finished: bool,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.transferred.min(self.total) * 100) / self.total) as u8
    }
}
