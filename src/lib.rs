//! Ebook reader core: reading-progress bookmarks kept in a persistent
//! key-value store, and an HTTP gateway that recovers from expired access
//! tokens with a single shared refresh.

pub mod auth;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod reader;
pub mod storage;
