use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

const FALLBACK_NAME: &str = "upload.bin";
const MAX_NAME_LEN: usize = 100;

/// Manages on-disk storage for message attachments.
///
/// Files live at `{root}/attachments/YYYY/MM/DD/{uuid}_{name}`; the part after
/// `{root}/` is what gets recorded on the attachment row.
pub struct AttachmentStorage {
    root: PathBuf,
}

impl AttachmentStorage {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Attachment storage directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a storage-relative path.
    pub fn file_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write an uploaded file and return its storage-relative path.
    pub async fn save(&self, original_name: &str, data: &[u8], now: DateTime<Utc>) -> Result<String> {
        let dir = format!("attachments/{}", now.format("%Y/%m/%d"));
        fs::create_dir_all(self.root.join(&dir)).await?;

        let relative = format!("{}/{}_{}", dir, Uuid::new_v4().simple(), sanitize_file_name(original_name));
        let path = self.file_path(&relative);

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(relative)
    }

    /// Delete a stored file; a file that is already gone is not an error.
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.file_path(relative);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted attachment file {}", relative);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Attachment file {} already gone", relative);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers on Windows may send a full path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned = sanitize_filename::sanitize_with_options(
        base,
        sanitize_filename::Options {
            windows: true,
            truncate: false,
            replacement: "_",
        },
    );
    // The name ends up in a URL path.
    let cleaned: String = cleaned
        .chars()
        .map(|c| if c.is_whitespace() || matches!(c, '#' | '%') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return FALLBACK_NAME.to_string();
    }

    // Keep the extension when truncating.
    if cleaned.chars().count() > MAX_NAME_LEN {
        let (stem, ext) = match cleaned.rfind('.') {
            Some(idx) if cleaned.len() - idx <= 10 => cleaned.split_at(idx),
            _ => (cleaned, ""),
        };
        let keep = MAX_NAME_LEN - ext.chars().count();
        return stem.chars().take(keep).chain(ext.chars()).collect();
    }

    cleaned.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo 1.jpg"), "photo_1.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("what?<now>.txt"), "what__now_.txt");
        assert_eq!(sanitize_file_name("draft #2 (100%).md"), "draft__2_(100_).md");
        assert_eq!(sanitize_file_name("résumé.pdf"), "résumé.pdf");
    }

    #[test]
    fn sanitize_falls_back_for_unusable_names() {
        assert_eq!(sanitize_file_name(""), "upload.bin");
        assert_eq!(sanitize_file_name("..."), "upload.bin");
        assert_eq!(sanitize_file_name("uploads/"), "upload.bin");
        assert_eq!(sanitize_file_name("con"), "upload.bin");
    }

    #[test]
    fn sanitize_truncates_but_keeps_extension() {
        let long = format!("{}.txt", "a".repeat(300));
        let cleaned = sanitize_file_name(&long);
        assert_eq!(cleaned.len(), MAX_NAME_LEN);
        assert!(cleaned.ends_with(".txt"));

        let wide = format!("{}.png", "é".repeat(150));
        let cleaned = sanitize_file_name(&wide);
        assert_eq!(cleaned.chars().count(), MAX_NAME_LEN);
        assert!(cleaned.ends_with(".png"));
    }

    #[tokio::test]
    async fn save_writes_into_date_partition() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path().join("media")).await.unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();

        let relative = storage.save("notes.txt", b"hello", now).await.unwrap();
        assert!(relative.starts_with("attachments/2026/03/09/"));
        assert!(relative.ends_with("_notes.txt"));

        let bytes = tokio::fs::read(storage.file_path(&relative)).await.unwrap();
        assert_eq!(bytes, b"hello");

        storage.delete(&relative).await.unwrap();
        assert!(!storage.file_path(&relative).exists());
        // second delete tolerates the missing file
        storage.delete(&relative).await.unwrap();
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path().to_path_buf()).await.unwrap();
        let now = Utc::now();

        let a = storage.save("a.txt", b"1", now).await.unwrap();
        let b = storage.save("a.txt", b"2", now).await.unwrap();
        assert_ne!(a, b);
    }
}
