//! Media cache: downloads images referenced by unread articles under a byte
//! budget and evicts the least recently accessed files when it is exceeded.
//!
//! A run moves through [`CachePhase`]s:
//! `Start -> UpdatingMetadata -> DownloadingImages -> PurgingCache -> End`,
//! or ends early in `Interrupted`.

mod download;
mod engine;
mod index;
mod store;
mod urls;

pub use download::{download_file, fetch_bytes, DownloadError, DownloadOutcome, SizeLimits};
pub use engine::{CacheEngine, CachePhase, CacheReport, CacheSettings, CancelFlag};
pub use index::{ArticleResult, CacheIndex, IndexSnapshot};
pub use store::FileStore;
pub use urls::candidate_urls;
