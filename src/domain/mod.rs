pub mod catalog;
pub mod models;
pub mod progress;

pub use catalog::Catalog;
pub use models::{Book, ProgressError, ReadingProgress};
pub use progress::{ProgressStore, SaveProgressError};
