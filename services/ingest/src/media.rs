//! Recognized image file types.

use std::path::Path;

/// Image formats the service ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Classify a path by its extension (case-insensitive).
    ///
    /// Returns `None` for anything that is not `.jpg`, `.jpeg` or `.png`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    /// MIME type sent to storage and to the notification API.
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

/// Whether a path names a file the watcher should pick up.
pub fn is_supported_image(path: &Path) -> bool {
    ImageKind::from_path(path).is_some()
}
