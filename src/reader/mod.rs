//! Headless reading view: pagination, zoom and key bindings over a document
//! whose rendering happens elsewhere. Only the page count comes back from the
//! renderer.

pub mod library;

use crate::domain::{ProgressError, ProgressStore, ReadingProgress};

pub use library::{LibraryEntry, LibraryView, progress_bar};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfSettings {
    pub min_scale: f32,
    pub max_scale: f32,
    pub default_scale: f32,
    pub scale_step: f32,
}

pub const PDF_SETTINGS: PdfSettings = PdfSettings {
    min_scale: 0.5,
    max_scale: 3.0,
    default_scale: 1.0,
    scale_step: 0.25,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    PrevPage,
    NextPage,
    ZoomIn,
    ZoomOut,
    Back,
}

impl KeyAction {
    /// Map a DOM-style key name (`ArrowLeft`, `PageDown`, `+`, ...) to an action.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowLeft" | "PageUp" => Some(KeyAction::PrevPage),
            "ArrowRight" | "PageDown" | " " => Some(KeyAction::NextPage),
            "+" | "=" => Some(KeyAction::ZoomIn),
            "-" | "_" => Some(KeyAction::ZoomOut),
            "Escape" => Some(KeyAction::Back),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerState {
    pub current_page: u32,
    /// 0 until the document has loaded
    pub total_pages: u32,
    pub scale: f32,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for ViewerState {
    fn default() -> Self {
        ViewerState {
            current_page: 1,
            total_pages: 0,
            scale: PDF_SETTINGS.default_scale,
            is_loading: true,
            error: None,
        }
    }
}

/// One open book.
///
/// Opening a document records progress in memory only; nothing is persisted
/// until the reader actually moves to a page. Merely opening a book therefore
/// never marks it as started.
pub struct ReaderSession {
    book_id: String,
    store: ProgressStore,
    state: ViewerState,
    progress: Option<ReadingProgress>,
}

impl ReaderSession {
    #[tracing::instrument(level = "debug", skip(store))]
    pub async fn open(store: ProgressStore, book_id: &str) -> Self {
        let progress = store.load(book_id).await;
        tracing::debug!(has_progress = progress.is_some(), "opened reading session");
        ReaderSession {
            book_id: book_id.to_string(),
            store,
            state: ViewerState::default(),
            progress,
        }
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn progress(&self) -> Option<&ReadingProgress> {
        self.progress.as_ref()
    }

    /// The renderer finished loading. A saved position is restored only when
    /// it was recorded against the same page count.
    #[tracing::instrument(level = "debug", skip(self), fields(book_id = %self.book_id))]
    pub async fn on_document_loaded(&mut self, num_pages: u32) {
        self.state.is_loading = false;
        if num_pages == 0 {
            self.state.error = Some("PDF file has no pages.".to_string());
            return;
        }
        self.state.total_pages = num_pages;
        self.state.error = None;

        match &self.progress {
            Some(saved) if saved.total_pages == num_pages => {
                self.state.current_page = saved.current_page;
                tracing::debug!(page = saved.current_page, "restored saved page");
            }
            _ => {
                self.state.current_page = 1;
                self.update_progress(1, num_pages, false).await;
            }
        }
    }

    pub fn on_document_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(book_id = %self.book_id, %message, "document failed to load");
        self.state.is_loading = false;
        self.state.error = Some(message);
    }

    /// Move to `page` and persist the new position. Out-of-range pages leave
    /// the session untouched.
    pub async fn go_to_page(&mut self, page: u32) -> Result<(), ProgressError> {
        let total_pages = self.state.total_pages;
        if page == 0 || page > total_pages {
            return Err(ProgressError::InvalidPage { page, total_pages });
        }
        self.state.current_page = page;
        self.update_progress(page, total_pages, true).await;
        Ok(())
    }

    pub async fn next_page(&mut self) -> Result<(), ProgressError> {
        self.go_to_page(self.state.current_page.saturating_add(1))
            .await
    }

    pub async fn prev_page(&mut self) -> Result<(), ProgressError> {
        self.go_to_page(self.state.current_page.saturating_sub(1))
            .await
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.set_scale(self.state.scale + PDF_SETTINGS.scale_step)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.set_scale(self.state.scale - PDF_SETTINGS.scale_step)
    }

    pub fn set_scale(&mut self, scale: f32) -> f32 {
        self.state.scale = scale.clamp(PDF_SETTINGS.min_scale, PDF_SETTINGS.max_scale);
        self.state.scale
    }

    /// Apply the action bound to `key`. `Back` is returned for the caller to
    /// act on; unbound keys yield `None`.
    pub async fn handle_key(&mut self, key: &str) -> Option<KeyAction> {
        let action = KeyAction::from_key(key)?;
        match action {
            KeyAction::PrevPage => {
                let _ = self.prev_page().await;
            }
            KeyAction::NextPage => {
                let _ = self.next_page().await;
            }
            KeyAction::ZoomIn => {
                self.zoom_in();
            }
            KeyAction::ZoomOut => {
                self.zoom_out();
            }
            KeyAction::Back => {}
        }
        Some(action)
    }

    async fn update_progress(&mut self, page: u32, total_pages: u32, persist: bool) {
        let progress = match ReadingProgress::new(self.book_id.as_str(), page, total_pages) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "not recording progress");
                return;
            }
        };
        if !persist {
            self.progress = Some(progress);
            return;
        }
        match self.store.save(progress.clone()).await {
            Ok(saved) => self.progress = Some(saved),
            Err(e) => {
                tracing::error!(error = %e, "failed to save reading progress");
                self.progress = Some(progress);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{KeyValueStore, MemoryKvStore};

    fn store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn key_bindings() {
        assert_eq!(KeyAction::from_key("ArrowLeft"), Some(KeyAction::PrevPage));
        assert_eq!(KeyAction::from_key("PageUp"), Some(KeyAction::PrevPage));
        assert_eq!(KeyAction::from_key(" "), Some(KeyAction::NextPage));
        assert_eq!(KeyAction::from_key("PageDown"), Some(KeyAction::NextPage));
        assert_eq!(KeyAction::from_key("="), Some(KeyAction::ZoomIn));
        assert_eq!(KeyAction::from_key("_"), Some(KeyAction::ZoomOut));
        assert_eq!(KeyAction::from_key("Escape"), Some(KeyAction::Back));
        assert_eq!(KeyAction::from_key("q"), None);
    }

    #[tokio::test]
    async fn opening_a_new_book_does_not_persist() {
        let store = store();
        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(120).await;

        assert_eq!(session.state().current_page, 1);
        assert!(!session.state().is_loading);
        assert_eq!(session.progress().unwrap().progress_percentage, 1);
        assert!(store.load("BK1").await.is_none());
    }

    #[tokio::test]
    async fn navigation_persists_progress() {
        let store = store();
        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(150).await;
        session.go_to_page(42).await.unwrap();

        let saved = store.load("BK1").await.unwrap();
        assert_eq!(saved.current_page, 42);
        assert_eq!(saved.progress_percentage, 28);

        session.next_page().await.unwrap();
        assert_eq!(store.load("BK1").await.unwrap().current_page, 43);
    }

    #[tokio::test]
    async fn saved_position_restored_when_page_count_matches() {
        let store = store();
        store.record("BK1", 78, 245).await.unwrap();

        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(245).await;
        assert_eq!(session.state().current_page, 78);
    }

    #[tokio::test]
    async fn saved_position_ignored_when_page_count_differs() {
        let store = store();
        store.record("BK1", 78, 245).await.unwrap();

        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(300).await;
        assert_eq!(session.state().current_page, 1);
        // the stored bookmark stays until the reader navigates
        assert_eq!(store.load("BK1").await.unwrap().current_page, 78);
    }

    #[tokio::test]
    async fn impossible_saved_position_starts_from_first_page() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(
            crate::domain::progress::READING_PROGRESS_KEY,
            r#"{"BK1":{"bookId":"BK1","currentPage":500,"totalPages":245,"progressPercentage":100,"lastReadDate":"2025-03-01T10:15:30Z"}}"#,
        )
        .await
        .unwrap();
        let store = ProgressStore::new(kv);

        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(245).await;
        assert_eq!(session.state().current_page, 1);

        session.next_page().await.unwrap();
        assert_eq!(store.load("BK1").await.unwrap().current_page, 2);
    }

    #[tokio::test]
    async fn out_of_range_navigation_is_rejected() {
        let store = store();
        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        assert!(session.go_to_page(1).await.is_err());

        session.on_document_loaded(3).await;
        assert!(session.prev_page().await.is_err());
        assert!(session.go_to_page(4).await.is_err());
        assert_eq!(session.state().current_page, 1);

        session.go_to_page(3).await.unwrap();
        assert!(session.next_page().await.is_err());
        assert_eq!(session.state().current_page, 3);
    }

    #[tokio::test]
    async fn zoom_is_clamped() {
        let mut session = ReaderSession::open(store(), "BK1").await;
        for _ in 0..20 {
            session.zoom_in();
        }
        assert_eq!(session.state().scale, PDF_SETTINGS.max_scale);
        for _ in 0..20 {
            session.zoom_out();
        }
        assert_eq!(session.state().scale, PDF_SETTINGS.min_scale);
        assert_eq!(session.set_scale(1.5), 1.5);
        assert_eq!(session.set_scale(9.0), 3.0);
    }

    #[tokio::test]
    async fn keys_drive_the_session() {
        let store = store();
        let mut session = ReaderSession::open(store.clone(), "BK1").await;
        session.on_document_loaded(10).await;

        assert_eq!(session.handle_key("ArrowRight").await, Some(KeyAction::NextPage));
        assert_eq!(session.handle_key(" ").await, Some(KeyAction::NextPage));
        assert_eq!(session.handle_key("ArrowLeft").await, Some(KeyAction::PrevPage));
        assert_eq!(session.handle_key("+").await, Some(KeyAction::ZoomIn));
        assert_eq!(session.handle_key("Escape").await, Some(KeyAction::Back));
        assert_eq!(session.handle_key("x").await, None);

        assert_eq!(session.state().current_page, 2);
        assert_eq!(session.state().scale, 1.25);
        assert_eq!(store.load("BK1").await.unwrap().current_page, 2);
    }

    #[tokio::test]
    async fn load_error_is_recorded() {
        let mut session = ReaderSession::open(store(), "BK1").await;
        session.on_document_error("Failed to load PDF file. Please try again.");
        assert!(!session.state().is_loading);
        assert_eq!(
            session.state().error.as_deref(),
            Some("Failed to load PDF file. Please try again.")
        );
        assert!(session.next_page().await.is_err());
    }
}
