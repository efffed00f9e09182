use futures::{Stream, StreamExt};
use reqwest::redirect::Policy;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::engine::CancelFlag;
use super::store::FileStore;
use crate::util::{validate_url, HostPolicy};

/// Chunks written between two cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 16;

/// Errors that end a single download.
///
/// Size rejections and cancellation are outcomes, not errors; see
/// [`DownloadOutcome`].
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Already on disk with this size
    Existing(u64),
    Downloaded(u64),
    /// Outside the accepted size range; nothing was kept
    Rejected(String),
    Cancelled,
}

/// Accepted file sizes in bytes, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub min: u64,
    pub max: u64,
}

impl SizeLimits {
    fn check(&self, len: u64) -> Option<String> {
        if len < self.min {
            Some(format!("{len} bytes is below the minimum of {}", self.min))
        } else if len > self.max {
            Some(format!("{len} bytes exceeds the maximum of {}", self.max))
        } else {
            None
        }
    }
}

/// Redirect policy for media downloads.
///
/// At most 3 hops, no loops, and every hop must pass the host policy.
fn redirect_policy(hosts: HostPolicy) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        if let Err(e) = validate_url(url.as_str(), hosts) {
            return attempt.error(format!("Redirect refused: {e}"));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// HTTP client used by the download workers.
pub fn build_client(
    hosts: HostPolicy,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy(hosts))
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

enum Streamed {
    Complete(u64),
    TooLarge(u64),
    Cancelled,
}

/// Write `stream` to `path`, stopping once more than `max` bytes arrive.
///
/// Cancellation is checked every [`CANCEL_CHECK_INTERVAL`] chunks, between writes.
async fn stream_to_file<S, B>(
    mut stream: S,
    path: &Path,
    max: u64,
    cancel: &CancelFlag,
) -> Result<Streamed, DownloadError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    let mut chunks = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let bytes = chunk.as_ref();
        written = written.saturating_add(bytes.len() as u64);
        if written > max {
            return Ok(Streamed::TooLarge(written));
        }
        file.write_all(bytes).await?;

        chunks += 1;
        if chunks % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Ok(Streamed::Cancelled);
        }
    }

    file.flush().await?;
    Ok(Streamed::Complete(written))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete partial download");
        }
    }
}

/// Download `url` into the store unless it is already there.
///
/// A declared `Content-Length` outside `limits` is rejected before any byte is
/// written; otherwise the body is streamed to a temporary file that is renamed
/// into place only when complete and within `limits`.
pub async fn download_file(
    client: &reqwest::Client,
    store: &FileStore,
    url: &str,
    limits: SizeLimits,
    cancel: &CancelFlag,
) -> Result<DownloadOutcome, DownloadError> {
    if let Some(len) = store.cached_len(url).await {
        return Ok(DownloadOutcome::Existing(len));
    }
    if cancel.is_cancelled() {
        return Ok(DownloadOutcome::Cancelled);
    }

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus(status.as_u16()));
    }

    if let Some(reason) = response.content_length().and_then(|len| limits.check(len)) {
        return Ok(DownloadOutcome::Rejected(reason));
    }

    let temp = store.temp_path_for(url);
    let streamed = stream_to_file(response.bytes_stream(), &temp, limits.max, cancel).await;

    match streamed {
        Ok(Streamed::Complete(len)) => {
            if let Some(reason) = limits.check(len) {
                discard(&temp).await;
                return Ok(DownloadOutcome::Rejected(reason));
            }
            if let Err(e) = tokio::fs::rename(&temp, store.path_for(url)).await {
                discard(&temp).await;
                return Err(e.into());
            }
            tracing::debug!(url = %url, bytes = len, "Media file cached");
            Ok(DownloadOutcome::Downloaded(len))
        }
        Ok(Streamed::TooLarge(len)) => {
            discard(&temp).await;
            Ok(DownloadOutcome::Rejected(format!(
                "aborted after {len} bytes, maximum is {}",
                limits.max
            )))
        }
        Ok(Streamed::Cancelled) => {
            discard(&temp).await;
            Ok(DownloadOutcome::Cancelled)
        }
        Err(e) => {
            discard(&temp).await;
            Err(e)
        }
    }
}

/// Fetch a small file into memory, `None` when its size is outside `limits`.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    limits: SizeLimits,
) -> Result<Option<Vec<u8>>, DownloadError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus(status.as_u16()));
    }
    if response.content_length().and_then(|len| limits.check(len)).is_some() {
        return Ok(None);
    }

    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
        if body.len() as u64 > limits.max {
            return Ok(None);
        }
    }

    if limits.check(body.len() as u64).is_some() {
        return Ok(None);
    }
    Ok(Some(body))
}
