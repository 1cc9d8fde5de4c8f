use std::path::Path;

use serde::{Deserialize, Serialize};

/// The user's chosen input modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Image,
    Video,
    Webcam,
}

pub const SOURCE_KINDS: [SourceKind; 3] =
    [SourceKind::Image, SourceKind::Video, SourceKind::Webcam];

/// Extensions accepted for still-image uploads. Video uploads are not
/// restricted by extension; the decoder decides.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub fn is_supported_image(file_name: &str) -> bool {
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => IMAGE_EXTENSIONS.iter().any(|ok| ok.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Best-effort content type for echoing an upload back to the page.
pub fn image_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
