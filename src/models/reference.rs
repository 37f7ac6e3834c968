//! Externally visible object URLs.
//!
//! `http://localhost:4998/<folder>/<name>?client=<id>&bucket=<bucket>`
//!
//! The path is the object key relative to the bucket root, percent-encoded
//! per segment. Client id and bucket travel as form-encoded query
//! parameters so a single proxy port can serve every backend.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use thiserror::Error;
use url::form_urlencoded;

/// Everything except RFC 3986 unreserved characters is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("url `{0}` does not point at this proxy")]
    ForeignUrl(String),
    #[error("url carries no object path")]
    MissingPath,
    #[error("object path is not valid percent-encoded UTF-8")]
    InvalidEncoding,
}

/// A parsed object URL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectReference {
    /// Object key relative to the bucket root, decoded.
    pub path: String,
    pub client: Option<String>,
    pub bucket: Option<String>,
}

impl ObjectReference {
    pub fn new(path: impl Into<String>, client: &str, bucket: &str) -> Self {
        Self {
            path: path.into(),
            client: Some(client.to_string()),
            bucket: Some(bucket.to_string()),
        }
    }

    /// Render as a URL under `base_url` (no trailing slash expected).
    pub fn encode(&self, base_url: &str) -> String {
        let path = self
            .path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(client) = &self.client {
            query.append_pair("client", client);
        }
        if let Some(bucket) = &self.bucket {
            query.append_pair("bucket", bucket);
        }
        let query = query.finish();

        let base = base_url.trim_end_matches('/');
        if query.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}?{}", base, path, query)
        }
    }

    /// Parse a full URL that must start with `base_url`.
    pub fn parse(url: &str, base_url: &str) -> Result<Self, ReferenceError> {
        let base = base_url.trim_end_matches('/');
        let rest = url
            .strip_prefix(base)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| ReferenceError::ForeignUrl(url.to_string()))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        Self::from_parts(path, query)
    }

    /// Parse a request target such as `/folder/a.png?client=x`.
    pub fn object_path_from_uri(target: &str) -> Result<Self, ReferenceError> {
        match target.split_once('?') {
            Some((path, query)) => Self::from_parts(path, Some(query)),
            None => Self::from_parts(target, None),
        }
    }

    /// Build from the path and query of a request URI.
    pub fn from_parts(path: &str, query: Option<&str>) -> Result<Self, ReferenceError> {
        let path = path.split('#').next().unwrap_or(path);
        let raw = path.strip_prefix('/').unwrap_or(path);
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ReferenceError::InvalidEncoding)?;
        if decoded.is_empty() {
            return Err(ReferenceError::MissingPath);
        }

        let mut client = None;
        let mut bucket = None;
        if let Some(query) = query {
            let query = query.split('#').next().unwrap_or(query);
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                if value.is_empty() {
                    continue;
                }
                match key.as_ref() {
                    "client" => client = Some(value.into_owned()),
                    "bucket" => bucket = Some(value.into_owned()),
                    _ => {}
                }
            }
        }

        Ok(Self {
            path: decoded.into_owned(),
            client,
            bucket,
        })
    }
}
