use serde::Serialize;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = b"\xff\xd8";
const GIF_SIGNATURES: [&[u8]; 2] = [b"GIF87a", b"GIF89a"];

/// Image format as read from the leading bytes of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectedFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

impl DetectedFormat {
    pub const PNG: Self = Self {
        mime_type: "image/png",
        extension: ".png",
    };
    pub const JPEG: Self = Self {
        mime_type: "image/jpeg",
        extension: ".jpg",
    };
    pub const WEBP: Self = Self {
        mime_type: "image/webp",
        extension: ".webp",
    };
    pub const GIF: Self = Self {
        mime_type: "image/gif",
        extension: ".gif",
    };
}

/// Sniffs the real image format from magic bytes.
///
/// Servers are not trusted to report the right MIME type, so only the
/// content decides. Anything unrecognised, including an empty buffer,
/// resolves to PNG.
pub fn detect(bytes: &[u8]) -> DetectedFormat {
    if bytes.starts_with(PNG_SIGNATURE) {
        return DetectedFormat::PNG;
    }
    if bytes.starts_with(JPEG_SIGNATURE) {
        return DetectedFormat::JPEG;
    }
    if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        return DetectedFormat::WEBP;
    }
    if GIF_SIGNATURES
        .iter()
        .any(|signature| bytes.starts_with(signature))
    {
        return DetectedFormat::GIF;
    }
    DetectedFormat::PNG
}
