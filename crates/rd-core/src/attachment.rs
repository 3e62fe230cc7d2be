//! Upload payload loading: file validation and MIME detection.

use std::path::Path;

use bytes::Bytes;
use rd_backend::UploadPayload;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Map file extension to MIME type.
fn mime_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "pdf" => Some("application/pdf"),
        "json" => Some("application/json"),
        "zip" => Some("application/zip"),
        "gz" | "tgz" => Some("application/gzip"),
        "txt" | "log" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "csv" => Some("text/csv"),
        "html" | "htm" => Some("text/html"),
        "yaml" | "yml" => Some("application/yaml"),
        "toml" => Some("application/toml"),
        "py" => Some("text/x-python"),
        "rs" => Some("text/x-rust"),
        "sh" => Some("application/x-sh"),
        _ => None,
    }
}

pub fn guess_mime(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_type_for_extension)
        .unwrap_or(FALLBACK_MIME)
}

/// Load and validate a file for upload.
pub fn load_upload(path: &Path, max_bytes: u64) -> Result<UploadPayload, String> {
    if !path.exists() {
        return Err(format!("file not found: {}", path.display()));
    }

    let metadata =
        std::fs::metadata(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    if !metadata.is_file() {
        return Err(format!("not a regular file: {}", path.display()));
    }
    if metadata.len() > max_bytes {
        return Err(format!(
            "file too large: {} bytes (max {} MB)",
            metadata.len(),
            max_bytes / 1024 / 1024
        ));
    }

    let data = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    Ok(UploadPayload {
        filename,
        content_type: guess_mime(path).to_string(),
        data: Bytes::from(data),
    })
}
