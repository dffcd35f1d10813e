//! SQLite backend for the Marquee module repository.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. This crate is the only place where
//! sets and statuses are flattened into column strings.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteRepository;
