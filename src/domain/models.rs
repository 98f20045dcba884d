// Domain models shared by the catalog, the progress store and the reader

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub cover_image: String,
    pub pdf_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("book id must not be empty")]
    EmptyBookId,
    #[error("total pages must be at least 1")]
    NoPages,
    #[error("page {page} is outside 1..={total_pages}")]
    InvalidPage { page: u32, total_pages: u32 },
}

/// Reading position of one book, stored as one entry of the progress blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub book_id: String,
    pub current_page: u32,
    pub total_pages: u32,
    /// 0 - 100, always `round(current_page / total_pages * 100)`
    pub progress_percentage: u8,
    pub last_read_date: DateTime<Utc>,
}

impl ReadingProgress {
    pub fn new(
        book_id: impl Into<String>,
        current_page: u32,
        total_pages: u32,
    ) -> Result<Self, ProgressError> {
        let progress = ReadingProgress {
            book_id: book_id.into(),
            current_page,
            total_pages,
            progress_percentage: progress_percentage(current_page, total_pages),
            last_read_date: Utc::now(),
        };
        progress.validate()?;
        Ok(progress)
    }

    /// Checks `1 <= current_page <= total_pages` and a non-empty book id.
    /// Fields are public, so anything built or deserialized outside `new`
    /// should pass through here before it is trusted.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.book_id.is_empty() {
            return Err(ProgressError::EmptyBookId);
        }
        if self.total_pages == 0 {
            return Err(ProgressError::NoPages);
        }
        if self.current_page == 0 || self.current_page > self.total_pages {
            return Err(ProgressError::InvalidPage {
                page: self.current_page,
                total_pages: self.total_pages,
            });
        }
        Ok(())
    }

    /// Label shown under a progress bar, e.g. "Page 42 / 150".
    pub fn page_label(&self) -> String {
        format!("Page {} / {}", self.current_page, self.total_pages)
    }
}

/// Rounds half up, like `Math.round` for non-negative inputs.
pub fn progress_percentage(current_page: u32, total_pages: u32) -> u8 {
    if total_pages == 0 {
        return 0;
    }
    let current = u64::from(current_page.min(total_pages));
    let total = u64::from(total_pages);
    ((current * 200 + total) / (total * 2)) as u8
}
