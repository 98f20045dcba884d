use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use serde_json::{Map, Value};

use super::models::{ProgressError, ReadingProgress, progress_percentage};
use crate::storage::{KeyValueStore, StoreError};

/// Key of the JSON object mapping book id to `ReadingProgress`.
pub const READING_PROGRESS_KEY: &str = "ebook_reading_progress";

#[derive(Debug, thiserror::Error)]
pub enum SaveProgressError {
    #[error(transparent)]
    Invalid(#[from] ProgressError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-book bookmarks kept as one blob under `READING_PROGRESS_KEY`.
///
/// Reads never fail: a missing, unreadable or malformed blob is logged and
/// reported as "no progress". Writes read the whole blob, replace one entry
/// and write it back; two writers racing on the same store lose one update.
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load_all(&self) -> BTreeMap<String, ReadingProgress> {
        let Some(raw) = self.read_blob().await else {
            return BTreeMap::new();
        };
        let all: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(all) => all,
            Err(e) => {
                tracing::error!(error = %e, "failed to parse stored reading progress");
                return BTreeMap::new();
            }
        };
        all.into_iter()
            .filter_map(|(book_id, entry)| {
                let parsed = serde_json::from_value::<ReadingProgress>(entry)
                    .map_err(|e| e.to_string())
                    .and_then(|p| p.validate().map(|()| p).map_err(|e| e.to_string()));
                match parsed {
                    Ok(progress) => Some((book_id, progress)),
                    Err(error) => {
                        tracing::warn!(%book_id, %error, "skipping unreadable progress entry");
                        None
                    }
                }
            })
            .collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load(&self, book_id: &str) -> Option<ReadingProgress> {
        self.load_all().await.remove(book_id)
    }

    pub async fn has_progress(&self, book_id: &str) -> bool {
        self.load(book_id).await.is_some()
    }

    /// Upsert `progress`, stamping `last_read_date` with the current time and
    /// recomputing the percentage. Returns the record as written.
    ///
    /// A record outside `1..=total_pages` is refused, and so is any write
    /// whose read of the current blob failed: writing then would drop every
    /// other book's entry.
    #[tracing::instrument(level = "debug", skip(self, progress), fields(book_id = %progress.book_id))]
    pub async fn save(&self, progress: ReadingProgress) -> Result<ReadingProgress, SaveProgressError> {
        progress.validate()?;
        // Entries are kept as raw JSON so records this build cannot parse are
        // written back untouched.
        let mut all: Map<String, Value> = match self.kv.get(READING_PROGRESS_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(all) => all,
                Err(e) => {
                    tracing::warn!(error = %e, "replacing malformed reading progress blob");
                    Map::new()
                }
            },
            None => Map::new(),
        };

        let stamped = ReadingProgress {
            progress_percentage: progress_percentage(progress.current_page, progress.total_pages),
            last_read_date: Utc::now(),
            ..progress
        };
        all.insert(
            stamped.book_id.clone(),
            serde_json::to_value(&stamped).map_err(StoreError::from)?,
        );

        let blob = serde_json::to_string(&all).map_err(StoreError::from)?;
        self.kv.set(READING_PROGRESS_KEY, &blob).await?;
        tracing::debug!(
            page = stamped.current_page,
            total = stamped.total_pages,
            percentage = stamped.progress_percentage,
            "saved reading progress"
        );
        Ok(stamped)
    }

    /// Build a record for `page` of `total_pages` and save it.
    pub async fn record(
        &self,
        book_id: &str,
        page: u32,
        total_pages: u32,
    ) -> Result<ReadingProgress, SaveProgressError> {
        let progress = ReadingProgress::new(book_id, page, total_pages)?;
        self.save(progress).await
    }

    async fn read_blob(&self) -> Option<String> {
        match self.kv.get(READING_PROGRESS_KEY).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "failed to read reading progress from store");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::MemoryKvStore;

    fn store() -> (Arc<MemoryKvStore>, ProgressStore) {
        let kv = Arc::new(MemoryKvStore::new());
        let progress = ProgressStore::new(kv.clone());
        (kv, progress)
    }

    #[tokio::test]
    async fn save_then_load_returns_same_position() {
        let (_kv, progress) = store();
        let started = Utc::now();
        progress
            .save(ReadingProgress::new("BK7A9C2F", 42, 150).unwrap())
            .await
            .unwrap();

        let loaded = progress.load("BK7A9C2F").await.unwrap();
        assert_eq!(loaded.current_page, 42);
        assert_eq!(loaded.total_pages, 150);
        assert_eq!(loaded.progress_percentage, 28);
        assert!(loaded.last_read_date >= started);
    }

    #[tokio::test]
    async fn save_overrides_passed_timestamp() {
        let (_kv, progress) = store();
        let mut p = ReadingProgress::new("BK1", 3, 10).unwrap();
        p.last_read_date = "2001-01-01T00:00:00Z".parse().unwrap();
        let started = Utc::now();

        let written = progress.save(p).await.unwrap();
        assert!(written.last_read_date >= started);
    }

    #[tokio::test]
    async fn unknown_book_is_absent() {
        let (_kv, progress) = store();
        assert!(progress.load("nope").await.is_none());
        assert!(!progress.has_progress("nope").await);
    }

    #[tokio::test]
    async fn malformed_blob_reads_as_empty() {
        let (kv, progress) = store();
        kv.set(READING_PROGRESS_KEY, "{not json").await.unwrap();

        assert!(progress.load("BK7A9C2F").await.is_none());
        assert!(progress.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn save_replaces_malformed_blob() {
        let (kv, progress) = store();
        kv.set(READING_PROGRESS_KEY, "[1, 2").await.unwrap();

        progress.record("BK1", 2, 4).await.unwrap();
        assert_eq!(progress.load("BK1").await.unwrap().progress_percentage, 50);
    }

    #[tokio::test]
    async fn save_keeps_other_books() {
        let (kv, progress) = store();
        progress.record("BK1", 1, 10).await.unwrap();
        progress.record("BK2", 5, 10).await.unwrap();
        progress.record("BK1", 7, 10).await.unwrap();

        let all = progress.load_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["BK1"].current_page, 7);
        assert_eq!(all["BK2"].current_page, 5);

        let raw: Value = serde_json::from_str(&kv.get(READING_PROGRESS_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(raw["BK2"]["progressPercentage"], 50);
    }

    #[tokio::test]
    async fn save_preserves_entries_it_cannot_parse() {
        let (kv, progress) = store();
        kv.set(READING_PROGRESS_KEY, r#"{"legacy":{"bookId":"legacy","page":3}}"#)
            .await
            .unwrap();

        progress.record("BK1", 1, 2).await.unwrap();
        let raw: Value = serde_json::from_str(&kv.get(READING_PROGRESS_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(raw["legacy"]["page"], 3);
        assert_eq!(raw["BK1"]["currentPage"], 1);

        let all = progress.load_all().await;
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("BK1"));
    }

    /// Memory store whose reads can be switched to fail.
    #[derive(Default)]
    struct FailingReads {
        inner: MemoryKvStore,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FailingReads {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sea_orm::DbErr::Custom(
                    "disk I/O error".into(),
                )));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn failed_read_aborts_save_and_keeps_other_books() {
        let kv = Arc::new(FailingReads::default());
        let progress = ProgressStore::new(kv.clone());
        progress.record("BK1", 5, 10).await.unwrap();

        kv.fail.store(true, Ordering::SeqCst);
        let err = progress.record("BK2", 1, 10).await.unwrap_err();
        assert!(matches!(err, SaveProgressError::Store(StoreError::Database(_))));

        kv.fail.store(false, Ordering::SeqCst);
        assert_eq!(progress.load("BK1").await.unwrap().current_page, 5);
        assert!(progress.load("BK2").await.is_none());
    }

    #[tokio::test]
    async fn save_refuses_page_past_the_end() {
        let (kv, progress) = store();
        let mut p = ReadingProgress::new("BK1", 3, 10).unwrap();
        p.current_page = 500;

        let err = progress.save(p).await.unwrap_err();
        assert!(matches!(
            err,
            SaveProgressError::Invalid(ProgressError::InvalidPage { page: 500, total_pages: 10 })
        ));
        assert!(kv.get(READING_PROGRESS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_entries_outside_page_range_are_skipped() {
        let (kv, progress) = store();
        progress.record("BK2", 4, 8).await.unwrap();
        let mut raw: Map<String, Value> =
            serde_json::from_str(&kv.get(READING_PROGRESS_KEY).await.unwrap().unwrap()).unwrap();
        raw.insert(
            "BK1".into(),
            serde_json::json!({
                "bookId": "BK1",
                "currentPage": 500,
                "totalPages": 245,
                "progressPercentage": 100,
                "lastReadDate": "2025-03-01T10:15:30Z"
            }),
        );
        kv.set(READING_PROGRESS_KEY, &Value::Object(raw).to_string())
            .await
            .unwrap();

        assert!(progress.load("BK1").await.is_none());
        let all = progress.load_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all["BK2"].current_page, 4);
    }

    #[tokio::test]
    async fn record_rejects_invalid_page() {
        let (_kv, progress) = store();
        let err = progress.record("BK1", 11, 10).await.unwrap_err();
        assert!(matches!(err, SaveProgressError::Invalid(ProgressError::InvalidPage { .. })));
        assert!(progress.load("BK1").await.is_none());
    }
}
