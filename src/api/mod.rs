//! Client for the feed server's session-based JSON API.
//!
//! - [`client`]: transport, session handling and the response envelope
//! - [`headline`]: streaming headline decoder with per-field filter hooks
//! - [`filter`]: omission filters consulted by the decoder
//! - read and write operations are implemented on [`ApiClient`]

mod client;
mod error;
pub mod filter;
pub mod headline;
mod ops;
mod update;

pub use client::{ApiClient, ApiSettings};
pub use error::ApiError;
pub use filter::{ArticleFilter, IdUpdatedFilter, UnreadFilter};
pub use headline::{ArticleField, HeadlineBuilder};
pub use ops::{FeedListing, HeadlineQuery, ViewMode};
pub use update::MAX_IDS_PER_REQUEST;
