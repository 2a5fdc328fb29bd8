//! Ingestor: read a user-supplied path into memory.
//!
//! No transformation and no format validation happen here: decoding the
//! image is the model service's job. The only decision taken is which media
//! type to declare, and that comes from the file name, never the bytes.

use crate::error::ExtractError;
use image::ImageFormat;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Media type declared when the extension gives no hint.
pub const FALLBACK_MEDIA_TYPE: &str = "image/png";

/// A file read into memory, ready for the conversation builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Read the whole file at `path`.
///
/// # Errors
/// [`ExtractError::NotFound`] when the path does not exist or is not a
/// regular file, [`ExtractError::PermissionDenied`] when it cannot be read.
/// Both map to [`crate::error::ErrorKind::NotFound`]. No partial buffer is
/// ever returned.
pub async fn ingest(path: impl AsRef<Path>) -> Result<IngestedFile, ExtractError> {
    let path = path.as_ref().to_path_buf();

    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| io_error(&path, e))?;
    if !meta.is_file() {
        return Err(ExtractError::NotFound { path });
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| io_error(&path, e))?;

    let media_type = media_type_for(&path).to_string();
    debug!(
        "Ingested {}: {} bytes, declared as {}",
        path.display(),
        bytes.len(),
        media_type
    );

    Ok(IngestedFile {
        path,
        bytes,
        media_type,
    })
}

/// Declared media type for a path, from its extension.
pub fn media_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(ImageFormat::from_extension)
        .map(|f| f.to_mime_type())
        .filter(|m| m.starts_with("image/"))
        .unwrap_or(FALLBACK_MEDIA_TYPE)
}

fn io_error(path: &Path, e: std::io::Error) -> ExtractError {
    match e.kind() {
        IoErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::NotFound {
            path: path.to_path_buf(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[tokio::test]
    async fn returns_exact_bytes() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        file.write_all(&payload).unwrap();

        let ingested = ingest(file.path()).await.unwrap();
        assert_eq!(ingested.bytes, payload);
        assert_eq!(ingested.media_type, "image/png");
        assert_eq!(ingested.path, file.path());
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let err = ingest("/definitely/not/a/real/scan.png").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingest(dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_file_is_read_without_validation() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ingested = ingest(file.path()).await.unwrap();
        assert!(ingested.bytes.is_empty());
    }

    #[test]
    fn media_type_from_extension() {
        assert_eq!(media_type_for(Path::new("a/scan.jpg")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("scan.JPEG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("scan.webp")), "image/webp");
        assert_eq!(media_type_for(Path::new("scan.png")), "image/png");
        assert_eq!(media_type_for(Path::new("scan")), FALLBACK_MEDIA_TYPE);
        assert_eq!(media_type_for(Path::new("notes.txt")), FALLBACK_MEDIA_TYPE);
    }
}
