//! Input format detection.
//!
//! The leading bytes of a file are matched against known signatures first;
//! the file extension is only consulted when the content is unrecognised or
//! names a generic container such as a plain zip archive.

use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::capability::normalize_format;
use crate::error::{AppError, Result};

/// Bytes read for signature matching.
const SNIFF_BYTES: usize = 8 * 1024;

/// Bytes of a PDF scanned for font and image resources.
const PDF_SCAN_BYTES: u64 = 4 * 1024 * 1024;

/// Container formats that other formats (docx, epub, odt) are built on.
const GENERIC_CONTAINERS: &[&str] = &["zip", "xml", "gz"];

/// Where a detected format came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Content,
    Extension,
}

/// What is known about an input file before planning.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileDetection {
    pub path: String,
    /// Format token handed to the planner.
    pub format: String,
    pub mime_type: String,
    pub extension: String,
    pub size_bytes: u64,
    /// PDF whose pages are images with no embedded text fonts.
    pub is_scanned_pdf: bool,
    pub detected_by: DetectionSource,
}

/// Inspects a file on disk.
pub fn detect(path: &Path) -> Result<FileDetection> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        AppError::validation_with(
            format!("cannot read {}: {}", path.display(), e),
            "Check the input path",
        )
    })?;
    if !metadata.is_file() {
        return Err(AppError::validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let head = read_head(path, SNIFF_BYTES as u64)?;
    let extension = extension_of(path).unwrap_or_default();
    let sniffed = infer::get(&head);

    let (format, mime_type, detected_by) = match sniffed {
        Some(kind) if !GENERIC_CONTAINERS.contains(&kind.extension()) || extension.is_empty() => (
            kind.extension().to_string(),
            kind.mime_type().to_string(),
            DetectionSource::Content,
        ),
        _ if !extension.is_empty() => (
            extension.clone(),
            sniffed
                .map(|k| k.mime_type().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            DetectionSource::Extension,
        ),
        _ => {
            return Err(AppError::validation_with(
                format!("cannot detect the format of {}", path.display()),
                "Give the file an extension that names its format",
            ))
        }
    };

    let is_scanned_pdf = format == "pdf" && is_likely_scanned_pdf(&read_head(path, PDF_SCAN_BYTES)?);
    debug!(
        path = %path.display(),
        format = %format,
        by = ?detected_by,
        scanned = is_scanned_pdf,
        "Detected input format"
    );

    Ok(FileDetection {
        path: path.display().to_string(),
        format,
        mime_type,
        extension,
        size_bytes: metadata.len(),
        is_scanned_pdf,
        detected_by,
    })
}

/// Format token for a path: content signature when the file is readable,
/// otherwise the extension.
pub fn format_of_path(path: &Path) -> Result<String> {
    if path.is_file() {
        return detect(path).map(|d| d.format);
    }
    extension_of(path).ok_or_else(|| {
        AppError::validation_with(
            format!("cannot detect the format of {}", path.display()),
            "Give the file an extension that names its format",
        )
    })
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(normalize_format)
        .filter(|e| !e.is_empty())
}

fn read_head(path: &Path, limit: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)?.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Image XObjects without any font resource.
fn is_likely_scanned_pdf(bytes: &[u8]) -> bool {
    let images = count(bytes, b"/Subtype/Image") + count(bytes, b"/Subtype /Image");
    let fonts = count(bytes, b"/Font");
    images > 0 && fonts == 0
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}
