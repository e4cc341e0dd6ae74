use std::path::Path;

use tracing::{debug, warn};

use crate::sync::model::FileRef;
use crate::sync::platform::{DestinationPlatform, PlatformError, SourcePlatform};
use crate::utils::formatting::shorten_file_name;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MAX_FILE_NAME_CHARS: usize = 60;

/// Moves Slack attachments into Mattermost one file at a time.
///
/// Oversized files are skipped, never truncated. The downloaded bytes are owned
/// by the upload call and dropped as soon as the destination acknowledges it.
#[derive(Debug, Clone, Copy)]
pub struct MediaTransfer {
    max_file_size: u64,
}

impl MediaTransfer {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size: if max_file_size == 0 {
                DEFAULT_MAX_FILE_SIZE
            } else {
                max_file_size
            },
        }
    }

    /// `Ok(None)` when the file was skipped for its size.
    pub async fn transfer(
        &self,
        source: &dyn SourcePlatform,
        dest: &dyn DestinationPlatform,
        channel_id: &str,
        file: &FileRef,
    ) -> Result<Option<String>, PlatformError> {
        if file.size > self.max_file_size {
            warn!(
                file = %file.name,
                size = file.size,
                limit = self.max_file_size,
                "skipping oversized file"
            );
            return Ok(None);
        }

        let data = match source.download_file(&file.url, self.max_file_size).await {
            Ok(data) => data,
            Err(PlatformError::TooLarge { size, limit }) => {
                warn!(file = %file.name, size, limit, "skipping oversized file");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let content_type = normalize_content_type(file.mimetype.as_deref(), &file.name, &data);
        let file_name = upload_file_name(&file.name, &content_type);
        debug!(file = %file_name, bytes = data.len(), "uploading attachment");
        let file_id = dest.upload_file(channel_id, &file_name, data).await?;
        Ok(Some(file_id))
    }
}

/// Reads a response body, failing with [`PlatformError::TooLarge`] past `max_bytes`.
pub async fn read_limited(
    mut response: reqwest::Response,
    max_bytes: u64,
    method: &str,
) -> Result<Vec<u8>, PlatformError> {
    if let Some(length) = response.content_length()
        && length > max_bytes
    {
        return Err(PlatformError::TooLarge {
            size: length,
            limit: max_bytes,
        });
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| PlatformError::Transport {
        method: method.to_string(),
        reason: e.to_string(),
    })? {
        if (data.len() + chunk.len()) as u64 > max_bytes {
            return Err(PlatformError::TooLarge {
                size: (data.len() + chunk.len()) as u64,
                limit: max_bytes,
            });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Sanitized name with an extension matching the content, at most 60 characters.
pub fn upload_file_name(raw: &str, content_type: &str) -> String {
    let name = sanitize_filename(raw).unwrap_or_else(|| "attachment".to_string());
    let name = ensure_filename_extension(&name, content_type);
    shorten_file_name(&name, MAX_FILE_NAME_CHARS)
}

pub fn filename_from_url(url: &str) -> Option<String> {
    if let Ok(parsed) = url::Url::parse(url)
        && let Some(segment) = parsed.path_segments().and_then(|mut s| s.next_back())
        && let Some(name) = sanitize_filename(segment)
    {
        return Some(name);
    }

    let without_query = url.split('?').next().unwrap_or(url);
    let tail = without_query.rsplit('/').next().unwrap_or(without_query);
    sanitize_filename(tail)
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let basename = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).trim();
    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn normalize_content_type(declared: Option<&str>, filename: &str, data: &[u8]) -> String {
    let declared = declared
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or("application/octet-stream");

    if !declared.is_empty() && declared != "application/octet-stream" {
        return declared.to_string();
    }

    guess_mime_from_filename(filename)
        .or_else(|| sniff_mime(data))
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn ensure_filename_extension(filename: &str, content_type: &str) -> String {
    if Path::new(filename).extension().is_some() {
        return filename.to_string();
    }

    match extension_from_mime(content_type) {
        Some(ext) => format!("{filename}.{ext}"),
        None => filename.to_string(),
    }
}

fn guess_mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "mp3" => Some("audio/mpeg"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "zip" => Some("application/zip"),
        _ => None,
    }
}

fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "audio/mpeg" => Some("mp3"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if data.len() >= 3 && data[..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    if data.len() >= 6 && (&data[..6] == b"GIF87a" || &data[..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 5 && &data[..5] == b"%PDF-" {
        return Some("application/pdf");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeDestination, FakeSource};

    fn file(name: &str, size: u64, url: &str) -> FileRef {
        FileRef {
            id: "F1".to_string(),
            name: name.to_string(),
            size,
            url: url.to_string(),
            mimetype: None,
        }
    }

    #[test]
    fn upload_names_are_bounded_and_typed() {
        let long = format!("{}.pdf", "x".repeat(80));
        let name = upload_file_name(&long, "application/pdf");
        assert_eq!(name.chars().count(), MAX_FILE_NAME_CHARS);
        assert!(name.ends_with(".pdf"));

        assert_eq!(upload_file_name("scan", "image/png"), "scan.png");
        assert_eq!(upload_file_name("  ", "text/plain"), "attachment.txt");
    }

    #[test]
    fn content_type_falls_back_to_sniffing() {
        let body = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(
            normalize_content_type(Some("application/octet-stream"), "blob", &body),
            "image/png"
        );
        assert_eq!(normalize_content_type(None, "notes.txt", b"hi"), "text/plain");
    }

    #[test]
    fn url_file_names_drop_the_query() {
        assert_eq!(
            filename_from_url("https://files.slack.com/files-pri/T1-F1/report.pdf?t=abc").as_deref(),
            Some("report.pdf")
        );
    }

    #[tokio::test]
    async fn oversized_files_are_skipped_before_download() {
        let source = FakeSource::default();
        source.add_file("https://files.example/big.bin", vec![0; 16]);
        let dest = FakeDestination::default();
        let transfer = MediaTransfer::new(8);

        let outcome = transfer
            .transfer(&source, &dest, "mm-general", &file("big.bin", 16, "https://files.example/big.bin"))
            .await
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(source.downloads(), 0);
        assert!(dest.uploaded_files().is_empty());
    }

    #[tokio::test]
    async fn files_are_downloaded_then_uploaded() {
        let source = FakeSource::default();
        source.add_file("https://files.example/a.txt", b"hello".to_vec());
        let dest = FakeDestination::default();
        let transfer = MediaTransfer::new(DEFAULT_MAX_FILE_SIZE);

        let outcome = transfer
            .transfer(
                &source,
                &dest,
                "mm-general",
                &file("a.txt", 5, "https://files.example/a.txt"),
            )
            .await
            .unwrap();

        assert!(outcome.is_some());
        assert_eq!(
            dest.uploaded_files(),
            vec![("mm-general".to_string(), "a.txt".to_string(), 5)]
        );
    }
}
