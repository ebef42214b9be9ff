//! On-disk cache of parsed pages keyed by the ingestion input.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::parser::Page;

/// JSON page cache living under `CACHE_DIR`.
///
/// Read and write failures are logged and treated as cache misses.
#[derive(Debug, Clone)]
pub(crate) struct PageCache {
    dir: PathBuf,
}

impl PageCache {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Digest over book name, grade and PDF bytes.
    pub(crate) fn key(book_name: &str, grade: u32, pdf: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(book_name.as_bytes());
        hasher.update([0]);
        hasher.update(grade.to_le_bytes());
        hasher.update([0]);
        hasher.update(pdf);
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_pages.json"))
    }

    pub(crate) async fn load(&self, key: &str) -> Option<Vec<Page>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "Page cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(pages) => {
                tracing::debug!(path = %path.display(), "Page cache hit");
                Some(pages)
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "Ignoring corrupt page cache");
                None
            }
        }
    }

    pub(crate) async fn store(&self, key: &str, pages: &[Page]) {
        let path = self.path_for(key);
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let body = serde_json::to_vec(pages).map_err(std::io::Error::other)?;
            tokio::fs::write(&path, body).await
        }
        .await;
        if let Err(error) = result {
            tracing::warn!(path = %path.display(), error = %error, "Page cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages() -> Vec<Page> {
        vec![
            Page {
                page_num: 1,
                text: "Chương 1".into(),
            },
            Page {
                page_num: 2,
                text: "Bài 1. Phương trình".into(),
            },
        ]
    }

    #[test]
    fn key_depends_on_every_input() {
        let base = PageCache::key("Toán 8", 8, b"pdf");
        assert_eq!(base, PageCache::key("Toán 8", 8, b"pdf"));
        assert_ne!(base, PageCache::key("Toán 9", 8, b"pdf"));
        assert_ne!(base, PageCache::key("Toán 8", 9, b"pdf"));
        assert_ne!(base, PageCache::key("Toán 8", 8, b"other"));
        assert_eq!(base.len(), 64);
    }

    #[tokio::test]
    async fn stored_pages_load_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PageCache::new(dir.path().join("cache"));
        let key = PageCache::key("Toán 8", 8, b"pdf");
        assert!(cache.load(&key).await.is_none());

        cache.store(&key, &pages()).await;
        assert_eq!(cache.load(&key).await, Some(pages()));
        assert!(cache.dir.join(format!("{key}_pages.json")).exists());
    }

    #[tokio::test]
    async fn corrupt_entries_are_misses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PageCache::new(dir.path());
        std::fs::write(dir.path().join("broken_pages.json"), b"{not json").expect("write");
        assert!(cache.load("broken").await.is_none());
    }
}
