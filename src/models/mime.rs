//! Extension → (render method, content type) table.
//!
//! The table is user-editable text, one entry per line:
//!
//! ```text
//! image, .png, image/png
//! iframe, .mp4, video/mp4
//! link, .zip, application/zip
//! ```
//!
//! Blank lines, `#` comments and lines that do not parse are skipped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Content type served when an extension is unknown.
pub const FALLBACK_CONTENT_TYPE: &str = "text/plain";

/// Table shipped when the configuration does not provide one.
pub const DEFAULT_MIME_TABLE: &str = "\
image, .png, image/png
image, .jpg, image/jpeg
image, .jpeg, image/jpeg
image, .gif, image/gif
image, .webp, image/webp
image, .svg, image/svg+xml
image, .ico, image/x-icon
image, .bmp, image/bmp
iframe, .wav, audio/wav
iframe, .mp3, audio/mpeg
iframe, .ogg, audio/ogg
iframe, .flac, audio/flac
iframe, .m4a, audio/mp4
iframe, .mp4, video/mp4
iframe, .webm, video/webm
iframe, .mov, video/quicktime
iframe, .pdf, application/pdf
link, .zip, application/zip
link, .txt, text/plain
";

/// How an uploaded object is embedded into a document.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RenderMethod {
    /// `![..](url)`
    Image,
    /// `<iframe src="url" ...>`
    Iframe,
    /// Bare URL.
    Link,
}

impl FromStr for RenderMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "img" => Ok(Self::Image),
            "iframe" => Ok(Self::Iframe),
            "link" => Ok(Self::Link),
            other => Err(format!("unknown render method `{}`", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimeEntry {
    pub method: RenderMethod,
    pub content_type: String,
}

impl MimeEntry {
    fn fallback() -> Self {
        Self {
            method: RenderMethod::Link,
            content_type: FALLBACK_CONTENT_TYPE.to_string(),
        }
    }
}

/// Parsed MIME classification table keyed by lowercase extension
/// (without the leading dot).
#[derive(Clone, Debug, Default)]
pub struct MimeTable {
    entries: HashMap<String, MimeEntry>,
}

impl MimeTable {
    /// Parse the line-oriented table format. Never fails: bad lines are
    /// dropped with a debug log.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((ext, entry)) => {
                    entries.insert(ext, entry);
                }
                None => tracing::debug!(line = lineno + 1, "ignoring malformed mime table line"),
            }
        }
        Self { entries }
    }

    /// Classify an extension (`png`, `.PNG`). Unknown → `text/plain`, link.
    pub fn classify(&self, extension: &str) -> MimeEntry {
        self.entries
            .get(&normalize_extension(extension))
            .cloned()
            .unwrap_or_else(MimeEntry::fallback)
    }

    /// Classify by the extension of an object path or file name.
    pub fn classify_path(&self, path: &str) -> MimeEntry {
        match extension_of(path) {
            Some(ext) => self.classify(ext),
            None => MimeEntry::fallback(),
        }
    }

    pub fn content_type_for(&self, path: &str) -> String {
        self.classify_path(path).content_type
    }

    /// Whether the table has an explicit entry for this file's extension.
    pub fn supports(&self, path: &str) -> bool {
        extension_of(path)
            .map(|ext| self.entries.contains_key(&normalize_extension(ext)))
            .unwrap_or(false)
    }

    /// Whether some entry declares this content type.
    pub fn includes_content_type(&self, content_type: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.content_type.eq_ignore_ascii_case(content_type))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MimeEntry {
    fn default() -> Self {
        Self::fallback()
    }
}

fn parse_line(line: &str) -> Option<(String, MimeEntry)> {
    let mut parts = line.split(',').map(str::trim);
    let method = parts.next()?.parse::<RenderMethod>().ok()?;
    let ext = normalize_extension(parts.next()?);
    let content_type = parts.next()?;
    if parts.next().is_some() || ext.is_empty() || !content_type.contains('/') {
        return None;
    }
    Some((
        ext,
        MimeEntry {
            method,
            content_type: content_type.to_string(),
        },
    ))
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Extension of the last path segment, ignoring any query string.
fn extension_of(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_table() {
        let table = MimeTable::parse(DEFAULT_MIME_TABLE);
        assert!(table.len() >= 15);
        let png = table.classify(".png");
        assert_eq!(png.method, RenderMethod::Image);
        assert_eq!(png.content_type, "image/png");
        assert_eq!(table.classify("MP4").method, RenderMethod::Iframe);
    }

    #[test]
    fn unknown_extension_falls_back_to_plain_link() {
        let table = MimeTable::parse(DEFAULT_MIME_TABLE);
        let entry = table.classify("xyz");
        assert_eq!(entry.method, RenderMethod::Link);
        assert_eq!(entry.content_type, "text/plain");
        assert_eq!(table.content_type_for("notes/no-extension"), "text/plain");
        assert_eq!(MimeTable::default().content_type_for("a.png"), "text/plain");
    }

    #[test]
    fn malformed_and_blank_lines_are_ignored() {
        let table = MimeTable::parse(
            "\n# comment\nimage, .png, image/png\nbogus line\nvideo, .mp4, video/mp4\nlink, , text/plain\nlink, .a, b, c\niframe, .mp3, nonsense\n",
        );
        assert_eq!(table.len(), 1);
        assert!(table.supports("x.png"));
        assert!(!table.supports("x.mp4"));
    }

    #[test]
    fn classify_path_ignores_directories() {
        let table = MimeTable::parse(DEFAULT_MIME_TABLE);
        assert_eq!(
            table.content_type_for("obsidian/trip-deadbeef-photo.png"),
            "image/png"
        );
        assert_eq!(table.content_type_for("dir.with.dots/readme"), "text/plain");
        assert_eq!(table.content_type_for(".hidden"), "text/plain");
    }

    #[test]
    fn reserved_characters_stay_part_of_the_name() {
        let table = MimeTable::parse(DEFAULT_MIME_TABLE);
        assert_eq!(table.content_type_for("obsidian/h-what?.png"), "image/png");
        assert_eq!(table.content_type_for("a#1.png"), "image/png");
        assert!(table.supports("what?.png"));
        assert_eq!(table.content_type_for("notes?.png.bak"), "text/plain");
    }

    #[test]
    fn includes_content_type_is_case_insensitive() {
        let table = MimeTable::parse(DEFAULT_MIME_TABLE);
        assert!(table.includes_content_type("IMAGE/PNG"));
        assert!(!table.includes_content_type("application/x-msdownload"));
    }
}
