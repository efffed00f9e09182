//! Offline-first synchronization and bounded media cache for a Tiny Tiny RSS
//! client.
//!
//! - [`api`]: session-based JSON API client with streaming headline decoding
//! - [`storage`]: SQLite store holding the local mirror and the pending queue
//! - [`sync`]: refresh, write-through and replay of offline edits
//! - [`cache`]: unread-article image cache under a byte budget

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod events;
pub mod model;
pub mod network;
pub mod scope;
pub mod storage;
pub mod sync;
pub mod util;
