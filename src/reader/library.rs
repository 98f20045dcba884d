use std::fmt::Write as _;

use crate::domain::{Book, Catalog, ProgressStore, ReadingProgress};

const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub book: Book,
    pub progress: Option<ReadingProgress>,
}

/// Homepage listing: every catalog book with its reading position.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryView {
    pub entries: Vec<LibraryEntry>,
}

impl LibraryView {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn build(catalog: &Catalog, store: &ProgressStore) -> Self {
        let mut all = store.load_all().await;
        let entries = catalog
            .books()
            .iter()
            .map(|book| LibraryEntry {
                book: book.clone(),
                progress: all.remove(&book.id),
            })
            .collect();
        LibraryView { entries }
    }

    /// The first book of the catalog gets the hero slot.
    pub fn featured(&self) -> Option<&LibraryEntry> {
        self.entries.first()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let Some(featured) = self.featured() else {
            out.push_str("No books in the library.\n");
            return out;
        };

        let _ = writeln!(
            out,
            "Featured: {} by {}",
            featured.book.title, featured.book.author
        );
        if let Some(p) = &featured.progress {
            let _ = writeln!(out, "  {}", progress_line(p));
        }
        out.push('\n');
        out.push_str("Featured Books\n");
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "  {:<10} {} by {}",
                entry.book.id, entry.book.title, entry.book.author
            );
            match &entry.progress {
                Some(p) => {
                    let _ = writeln!(out, "             {}", progress_line(p));
                }
                None => out.push_str("             not started\n"),
            }
        }
        out
    }
}

fn progress_line(p: &ReadingProgress) -> String {
    format!(
        "{} {:>3}%  {}",
        progress_bar(p.progress_percentage, BAR_WIDTH),
        p.progress_percentage.min(100),
        p.page_label()
    )
}

/// Text progress bar, e.g. `[#####---------------]` for 25 of width 20.
pub fn progress_bar(percentage: u8, width: usize) -> String {
    let percentage = usize::from(percentage.min(100));
    let filled = (percentage * width + 50) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
