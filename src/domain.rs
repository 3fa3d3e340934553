use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Extensions treated as archives when classifying members of a source
/// archive. A member with one of these extensions makes the source "nested".
pub const ARCHIVE_EXTENSIONS: &[&str] = &["rar", "cbr", "zip", "cbz"];

/// Image types eligible for packing into a canonical container.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Container format of a source archive, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Zip,
    Rar,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zip" | "cbz" => Some(SourceFormat::Zip),
            "rar" | "cbr" => Some(SourceFormat::Rar),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Zip => write!(f, "zip"),
            SourceFormat::Rar => write!(f, "rar"),
        }
    }
}

pub fn is_archive_name(name: &str) -> bool {
    has_extension_in(name, ARCHIVE_EXTENSIONS)
}

pub fn is_image_name(name: &str) -> bool {
    has_extension_in(name, IMAGE_EXTENSIONS)
}

fn has_extension_in(name: &str, set: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            set.iter().any(|candidate| *candidate == ext)
        })
        .unwrap_or(false)
}

/// One entry inside a source archive, captured during inspection.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub name: String,
    pub uncompressed_size: u64,
    /// Not reported by the RAR listing API.
    pub compressed_size: Option<u64>,
    pub is_nested_archive: bool,
}

impl ArchiveMember {
    pub fn new(name: String, uncompressed_size: u64, compressed_size: Option<u64>) -> Self {
        let is_nested_archive = is_archive_name(&name);
        Self {
            name,
            uncompressed_size,
            compressed_size,
            is_nested_archive,
        }
    }
}

/// Outcome of processing one source archive. Immutable once built; the
/// coordinator appends these to the run-level result log.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub original_path: String,
    pub series_name: String,
    pub output_files: Vec<String>,
    pub metadata_found: bool,
    pub metadata_source: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub processing_secs: f64,
}
