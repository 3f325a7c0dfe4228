use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Prefix shared by every staged upload so the sweeper only touches our files.
pub const UPLOAD_PREFIX: &str = "helm-upload-";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("Invalid base64 image format")]
    InvalidFormat,

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Writes inbound data-URL images to disk so the assistant can read them.
#[derive(Debug, Clone)]
pub struct ImageStaging {
    dir: PathBuf,
}

impl ImageStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Staging rooted at the platform temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode a single `data:image/<ext>;base64,<payload>` URL to a new file.
    pub async fn stage(&self, data_url: &str) -> Result<PathBuf, StageError> {
        let (ext, payload) = parse_data_url(data_url)?;
        let bytes = STANDARD.decode(payload.trim())?;

        let ext = if ext == "jpeg" { "jpg" } else { ext };
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{UPLOAD_PREFIX}{millis}-{seq}.{ext}"));

        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Stage every image in order. Images that fail are logged and skipped.
    pub async fn stage_all(&self, images: &[String]) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            match self.stage(image).await {
                Ok(path) => paths.push(path),
                Err(e) => tracing::warn!(index, error = %e, "failed to stage image, skipping"),
            }
        }
        paths
    }

    /// Best-effort delete of staged files.
    pub async fn cleanup(paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed staged image"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to clean up staged image")
                }
            }
        }
    }

    /// Remove staged uploads older than `max_age`. Returns how many were deleted.
    pub async fn reap_expired(&self, max_age: Duration) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let now = SystemTime::now();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(UPLOAD_PREFIX) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age > max_age && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Read an image file into a data URL, the shape the chat API accepts.
pub async fn encode_file_as_data_url(path: &Path) -> Result<String, StageError> {
    let subtype = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "png",
        Some("jpg" | "jpeg") => "jpeg",
        Some("gif") => "gif",
        Some("webp") => "webp",
        _ => return Err(StageError::InvalidFormat),
    };
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("data:image/{subtype};base64,{}", STANDARD.encode(bytes)))
}

/// Split a data URL into its image subtype and base64 payload.
pub fn parse_data_url(data_url: &str) -> Result<(&str, &str), StageError> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or(StageError::InvalidFormat)?;
    let (ext, payload) = rest
        .split_once(";base64,")
        .ok_or(StageError::InvalidFormat)?;

    let ext_ok = !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ext_ok || payload.is_empty() {
        return Err(StageError::InvalidFormat);
    }
    Ok((ext, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 transparent PNG
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    #[test]
    fn parse_data_url_accepts_png() {
        let url = format!("data:image/png;base64,{PNG_B64}");
        let (ext, payload) = parse_data_url(&url).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(payload, PNG_B64);
    }

    #[test]
    fn parse_data_url_rejects_non_image() {
        assert!(matches!(
            parse_data_url("data:text/plain;base64,aGk="),
            Err(StageError::InvalidFormat)
        ));
    }

    #[test]
    fn parse_data_url_rejects_compound_subtype() {
        assert!(parse_data_url("data:image/svg+xml;base64,PHN2Zz4=").is_err());
    }

    #[test]
    fn parse_data_url_rejects_missing_payload() {
        assert!(parse_data_url("data:image/png;base64,").is_err());
        assert!(parse_data_url("data:image/png,abc").is_err());
    }

    #[tokio::test]
    async fn stage_writes_decoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let staging = ImageStaging::new(dir.path());

        let path = staging
            .stage(&format!("data:image/png;base64,{PNG_B64}"))
            .await
            .unwrap();

        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(UPLOAD_PREFIX));
        assert!(name.ends_with(".png"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[tokio::test]
    async fn stage_renames_jpeg_extension() {
        let dir = tempfile::tempdir().unwrap();
        let staging = ImageStaging::new(dir.path());
        let path = staging.stage("data:image/jpeg;base64,/9j/4AAQ").await.unwrap();
        assert_eq!(path.extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn stage_all_skips_bad_images_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let staging = ImageStaging::new(dir.path());
        let images = vec![
            format!("data:image/png;base64,{PNG_B64}"),
            "data:image/png;base64,@@not-base64@@".to_string(),
            "data:image/gif;base64,R0lGODlhAQABAAAAACw=".to_string(),
        ];

        let paths = staging.stage_all(&images).await;
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].extension().unwrap(), "png");
        assert_eq!(paths[1].extension().unwrap(), "gif");
        assert_ne!(paths[0], paths[1]);
    }

    #[tokio::test]
    async fn cleanup_removes_files_and_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = ImageStaging::new(dir.path());
        let path = staging
            .stage(&format!("data:image/png;base64,{PNG_B64}"))
            .await
            .unwrap();
        let missing = dir.path().join("never-existed.png");

        ImageStaging::cleanup(&[path.clone(), missing]).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn encode_file_produces_stageable_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.JPG");
        std::fs::write(&source, [0xff, 0xd8, 0xff]).unwrap();

        let url = encode_file_as_data_url(&source).await.unwrap();
        assert_eq!(url, "data:image/jpeg;base64,/9j/");

        let staged = ImageStaging::new(dir.path()).stage(&url).await.unwrap();
        assert_eq!(std::fs::read(staged).unwrap(), vec![0xff, 0xd8, 0xff]);

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hi").unwrap();
        assert!(matches!(encode_file_as_data_url(&text).await, Err(StageError::InvalidFormat)));
    }

    #[tokio::test]
    async fn reap_expired_only_touches_old_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let staging = ImageStaging::new(dir.path());
        let upload = staging
            .stage(&format!("data:image/png;base64,{PNG_B64}"))
            .await
            .unwrap();
        let unrelated = dir.path().join("keep-me.txt");
        std::fs::write(&unrelated, "x").unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(staging.reap_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(upload.exists());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(staging.reap_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(!upload.exists());
        assert!(unrelated.exists());
    }
}
