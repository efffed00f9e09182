mod articles;
mod categories;
mod counters;
mod feeds;
mod labels;
mod pending;
pub mod preferences;
mod remote_files;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, StoreStats};

/// Rows per multi-row statement; 13 article columns * 50 stays under SQLite's 999 bind limit
pub(crate) const BATCH_SIZE: usize = 50;
