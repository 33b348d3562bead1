/// Image type detection
///
/// Uploads and provider responses are opaque bytes. The only thing the core
/// checks is that the declared content type is a supported image format and
/// that the leading magic bytes agree with it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// MIME type for the format
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Parses a declared content type, ignoring parameters and case
    pub fn from_content_type(value: &str) -> Option<Self> {
        let mime = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    /// Detects the format from magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

/// Reason an image failed the type check
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageCheckError {
    #[error("image is empty")]
    Empty,

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("content does not match declared type {declared}")]
    Mismatch { declared: ImageFormat },
}

/// Confirms `bytes` is a non-empty image of the declared type
pub fn check_image(bytes: &[u8], declared: &str) -> Result<ImageFormat, ImageCheckError> {
    if bytes.is_empty() {
        return Err(ImageCheckError::Empty);
    }

    let format = ImageFormat::from_content_type(declared)
        .ok_or_else(|| ImageCheckError::UnsupportedType(declared.to_string()))?;

    match ImageFormat::sniff(bytes) {
        Some(sniffed) if sniffed == format => Ok(format),
        _ => Err(ImageCheckError::Mismatch { declared: format }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_from_content_type() {
        assert_eq!(ImageFormat::from_content_type("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_content_type("IMAGE/PNG"), Some(ImageFormat::Png));
        assert_eq!(
            ImageFormat::from_content_type("image/webp; charset=binary"),
            Some(ImageFormat::Webp)
        );
        assert_eq!(ImageFormat::from_content_type("image/gif"), None);
        assert_eq!(ImageFormat::from_content_type(""), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(&PNG_HEADER), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
        assert_eq!(ImageFormat::sniff(b"RIFF"), None);
    }

    #[test]
    fn test_check_image() {
        assert_eq!(check_image(&PNG_HEADER, "image/png"), Ok(ImageFormat::Png));
        assert_eq!(check_image(&[], "image/png"), Err(ImageCheckError::Empty));
        assert_eq!(
            check_image(&PNG_HEADER, "image/jpeg"),
            Err(ImageCheckError::Mismatch { declared: ImageFormat::Jpeg })
        );
        assert!(matches!(
            check_image(&PNG_HEADER, "text/plain"),
            Err(ImageCheckError::UnsupportedType(_))
        ));
    }
}
