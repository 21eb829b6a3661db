//! Media as the client sees it: keys assigned by the backend and files the
//! user picked locally.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::Path};
use thiserror::Error;

const MAX_REFERENCE_LEN: usize = 1024;

/// Media types browsers report for HEIC/HEIF containers, when they report one at all.
const HEIC_MEDIA_TYPES: [&str; 4] = [
    "image/heic",
    "image/heif",
    "image/heic-sequence",
    "image/heif-sequence",
];
const HEIC_EXTENSIONS: [&str; 2] = [".heic", ".heif"];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("media reference `{key}` invalid: {reason}")]
pub struct ReferenceError {
    pub key: String,
    pub reason: &'static str,
}

/// Opaque key identifying a stored media object (e.g. `images/<uuid>.jpg`).
///
/// Only constructed through [`MediaReference::new`], so every value in the
/// program is safe to splice into an address path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaReference(String);

impl MediaReference {
    pub fn new(key: impl Into<String>) -> Result<Self, ReferenceError> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("must not be empty")
        } else if key.len() > MAX_REFERENCE_LEN {
            Some("longer than 1024 bytes")
        } else if key.starts_with('/') || key.contains("..") {
            Some("must be relative and must not contain `..`")
        } else if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            Some("contains control characters or backslashes")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ReferenceError { key, reason }),
            None => Ok(Self(key)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MediaReference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MediaReference> for String {
    fn from(value: MediaReference) -> Self {
        value.0
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which decode path a selected file needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFamily {
    /// HEIC/HEIF containers; never natively displayable, always transcoded.
    Heic,
    /// Anything else; handed to the viewer as-is.
    Generic,
}

impl FormatFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatFamily::Heic => "heic",
            FormatFamily::Generic => "generic",
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-memory file picked by the user.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    /// Media type as reported by the picker. Frequently empty for HEIC.
    pub declared_type: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, inferring the declared type from its extension
    /// the way a browser file picker would.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
            })?;
        let declared_type = infer_media_type(&name).unwrap_or_default().to_string();
        Ok(Self::new(name, declared_type, bytes))
    }

    /// HEIC-family when either the declared type or the file name says so.
    /// Both are checked because pickers often leave the type blank for HEIC.
    pub fn family(&self) -> FormatFamily {
        let declared = self.declared_type.trim();
        let by_type = HEIC_MEDIA_TYPES
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(declared));
        let name = self.name.to_ascii_lowercase();
        let by_name = HEIC_EXTENSIONS.iter().any(|ext| name.ends_with(ext));

        if by_type || by_name {
            FormatFamily::Heic
        } else {
            FormatFamily::Generic
        }
    }

    pub fn content_type(&self) -> &str {
        if self.declared_type.trim().is_empty() {
            "application/octet-stream"
        } else {
            self.declared_type.trim()
        }
    }
}

/// Extension-based media type lookup. HEIC is deliberately absent: pickers
/// do not report it, and classification must not depend on it.
fn infer_media_type(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(media_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_references() {
        assert!(MediaReference::new("").is_err());
        assert!(MediaReference::new("/etc/passwd").is_err());
        assert!(MediaReference::new("images/../secret").is_err());
        assert!(MediaReference::new("images\\a.jpg").is_err());
        assert!(MediaReference::new("a".repeat(1025)).is_err());

        let key = MediaReference::new("images/3f1c.jpg").unwrap();
        assert_eq!(key.as_str(), "images/3f1c.jpg");
    }

    #[test]
    fn reference_deserializes_through_validation() {
        let ok: MediaReference = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(ok.to_string(), "abc123");
        assert!(serde_json::from_str::<MediaReference>(r#""../x""#).is_err());
    }

    #[test]
    fn heic_detected_by_extension_when_type_is_blank() {
        let file = SelectedFile::new("photo.HEIC", "", Vec::new());
        assert_eq!(file.family(), FormatFamily::Heic);

        let file = SelectedFile::new("IMG_0001.heif", "", Vec::new());
        assert_eq!(file.family(), FormatFamily::Heic);
    }

    #[test]
    fn heic_detected_by_declared_type() {
        let file = SelectedFile::new("upload", "Image/HEIC", Vec::new());
        assert_eq!(file.family(), FormatFamily::Heic);

        let file = SelectedFile::new("burst", "image/heif-sequence", Vec::new());
        assert_eq!(file.family(), FormatFamily::Heic);
    }

    #[test]
    fn other_images_are_generic() {
        let file = SelectedFile::new("photo.png", "image/png", Vec::new());
        assert_eq!(file.family(), FormatFamily::Generic);
        assert_eq!(file.content_type(), "image/png");

        let file = SelectedFile::new("heic-notes.txt", "", Vec::new());
        assert_eq!(file.family(), FormatFamily::Generic);
        assert_eq!(file.content_type(), "application/octet-stream");
    }

    #[tokio::test]
    async fn from_path_infers_type_like_a_picker() {
        let dir = std::env::temp_dir().join(format!("moments-media-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let png = dir.join("cat.PNG");
        tokio::fs::write(&png, b"png-bytes").await.unwrap();
        let file = SelectedFile::from_path(&png).await.unwrap();
        assert_eq!(file.name, "cat.PNG");
        assert_eq!(file.declared_type, "image/png");
        assert_eq!(&file.bytes[..], b"png-bytes");

        let heic = dir.join("photo.heic");
        tokio::fs::write(&heic, b"heic-bytes").await.unwrap();
        let file = SelectedFile::from_path(&heic).await.unwrap();
        assert_eq!(file.declared_type, "");
        assert_eq!(file.family(), FormatFamily::Heic);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
