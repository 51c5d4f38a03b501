//! SQLite persistence of the graph and of per-file incremental state

pub mod models;
pub mod sqlite;

pub use sqlite::Database;
