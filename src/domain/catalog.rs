use std::path::Path;

use anyhow::Context;

use super::models::Book;

/// Read-only list of books, loaded once from a JSON array file.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    books: Vec<Book>,
}

impl Catalog {
    pub fn new(books: Vec<Book>) -> Self {
        Self { books }
    }

    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog = Self::from_json(&body)
            .with_context(|| format!("Invalid catalog {}", path.display()))?;
        tracing::debug!(books = catalog.books.len(), "loaded catalog");
        Ok(catalog)
    }

    pub fn from_json(body: &str) -> anyhow::Result<Self> {
        let books: Vec<Book> = serde_json::from_str(body)?;
        Ok(Self::new(books))
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn find(&self, book_id: &str) -> Option<&Book> {
        self.books.iter().find(|b| b.id == book_id)
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
