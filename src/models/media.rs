use axum::body::Bytes;
use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use serde::{ Deserialize, Serialize };
use std::fmt;
use thiserror::Error;

use crate::llm::chat::InlineMedia;

/// Image types accepted by the inference endpoint as inline data.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

pub const SUPPORTED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/mpg",
    "video/mov",
    "video/quicktime",
    "video/avi",
    "video/x-msvideo",
    "video/x-flv",
    "video/webm",
    "video/wmv",
    "video/x-ms-wmv",
    "video/3gpp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn of(mime_type: &str) -> Option<MediaKind> {
        if SUPPORTED_IMAGE_TYPES.contains(&mime_type) {
            Some(MediaKind::Image)
        } else if SUPPORTED_VIDEO_TYPES.contains(&mime_type) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Uploaded file is empty")]
    Empty,

    #[error("Unsupported media type '{0}'")]
    UnsupportedType(String),

    #[error("Expected {expected} media but got '{found}'")]
    WrongKind { expected: MediaKind, found: String },
}

fn normalize_mime(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

/// A single uploaded file. Replaced wholesale when a new file is chosen.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    bytes: Bytes,
    mime_type: String,
    file_name: Option<String>,
    kind: MediaKind,
}

impl UploadedMedia {
    /// Uses the declared content type, falling back to the file extension when the
    /// client sent none or a generic one.
    pub fn new(
        bytes: impl Into<Bytes>,
        declared_type: Option<&str>,
        file_name: Option<&str>
    ) -> Result<Self, MediaError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        let declared = declared_type
            .map(normalize_mime)
            .filter(|m| !m.is_empty() && m != "application/octet-stream");
        let mime_type = match declared {
            Some(m) => m,
            None =>
                file_name
                    .and_then(|name| mime_guess::from_path(name).first_raw())
                    .map(normalize_mime)
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
        };

        let kind = MediaKind::of(&mime_type).ok_or_else(||
            MediaError::UnsupportedType(mime_type.clone())
        )?;

        Ok(Self {
            bytes,
            mime_type,
            file_name: file_name.map(str::to_string),
            kind,
        })
    }

    pub fn ensure_kind(&self, expected: MediaKind) -> Result<(), MediaError> {
        if self.kind != expected {
            return Err(MediaError::WrongKind {
                expected,
                found: self.mime_type.clone(),
            });
        }
        Ok(())
    }

    pub fn base64_payload(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_inline(&self) -> InlineMedia {
        InlineMedia {
            mime_type: self.mime_type.clone(),
            data: self.base64_payload(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_wins_and_is_normalized() {
        let media = UploadedMedia::new(
            vec![1u8, 2, 3],
            Some("image/JPG; charset=binary"),
            Some("scan.png")
        ).unwrap();
        assert_eq!(media.mime_type(), "image/jpeg");
        assert_eq!(media.kind(), MediaKind::Image);
        assert_eq!(media.file_name(), Some("scan.png"));
    }

    #[test]
    fn falls_back_to_extension_for_generic_types() {
        let media = UploadedMedia::new(
            vec![0u8; 8],
            Some("application/octet-stream"),
            Some("clip.mp4")
        ).unwrap();
        assert_eq!(media.mime_type(), "video/mp4");
        assert_eq!(media.kind(), MediaKind::Video);
    }

    #[test]
    fn rejects_empty_and_unsupported_files() {
        assert_eq!(
            UploadedMedia::new(Vec::<u8>::new(), Some("image/png"), None).unwrap_err(),
            MediaError::Empty
        );
        assert_eq!(
            UploadedMedia::new(vec![1u8], Some("application/pdf"), Some("a.pdf")).unwrap_err(),
            MediaError::UnsupportedType("application/pdf".into())
        );
        assert_eq!(
            UploadedMedia::new(vec![1u8], None, None).unwrap_err(),
            MediaError::UnsupportedType("application/octet-stream".into())
        );
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let media = UploadedMedia::new(vec![1u8], Some("video/webm"), None).unwrap();
        assert!(media.ensure_kind(MediaKind::Video).is_ok());
        assert_eq!(
            media.ensure_kind(MediaKind::Image).unwrap_err(),
            MediaError::WrongKind { expected: MediaKind::Image, found: "video/webm".into() }
        );
    }

    #[test]
    fn inline_payload_is_standard_base64() {
        let media = UploadedMedia::new(b"hello".to_vec(), Some("image/png"), None).unwrap();
        let inline = media.to_inline();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "aGVsbG8=");
    }
}
