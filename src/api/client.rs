use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use super::error::ApiError;

/// Servers below this API level cap `getHeadlines` at [`LEGACY_PAGE_SIZE`].
const MODERN_API_LEVEL: i64 = 6;
const LEGACY_PAGE_SIZE: usize = 60;
const PAGE_SIZE: usize = 200;

/// Per-deployment transport settings for [`ApiClient`].
pub struct ApiSettings {
    /// JSON endpoint, `<server>/api/`
    pub endpoint: Url,
    pub username: String,
    pub password: SecretString,
    /// Optional HTTP basic auth in front of the server
    pub http_auth: Option<(String, SecretString)>,
    pub connect_timeout: Duration,
    /// Read timeout; deployments with a slow server configure a long one
    pub read_timeout: Duration,
    /// Cap on a single response body
    pub max_response_bytes: usize,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field(
                "http_auth",
                &self.http_auth.as_ref().map(|(user, _)| (user, "[REDACTED]")),
            )
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("max_response_bytes", &self.max_response_bytes)
            .finish()
    }
}

/// Response envelope shared by every operation.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    status: i64,
    content: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct ErrorContent {
    error: String,
}

#[derive(Deserialize)]
struct LoginContent {
    session_id: String,
    #[serde(default)]
    api_level: Option<i64>,
}

/// Session-based client for the feed server's JSON API.
///
/// The session is established lazily on the first call. A call rejected with
/// `NOT_LOGGED_IN` triggers one re-login and one retry; a second rejection is
/// reported as [`ApiError::LoginFailed`].
pub struct ApiClient {
    http: reqwest::Client,
    settings: ApiSettings,
    session: Mutex<Option<String>>,
    api_level: AtomicI64,
}

impl ApiClient {
    pub fn new(settings: ApiSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http,
            settings,
            session: Mutex::new(None),
            api_level: AtomicI64::new(0),
        })
    }

    /// API level reported by the last login (0 before the first login).
    pub fn api_level(&self) -> i64 {
        self.api_level.load(Ordering::Relaxed)
    }

    /// Maximum number of headlines the server returns per request.
    pub fn page_size(&self) -> usize {
        if self.api_level() < MODERN_API_LEVEL {
            LEGACY_PAGE_SIZE
        } else {
            PAGE_SIZE
        }
    }

    /// Establish a new session, replacing any previous one.
    pub async fn login(&self) -> Result<(), ApiError> {
        let mut session = self.session.lock().await;
        *session = Some(self.open_session().await?);
        Ok(())
    }

    /// End the current session on the server; the next call logs in again.
    ///
    /// Without a session nothing is sent. A failed logout is only logged.
    pub async fn logout(&self) {
        let Some(sid) = self.session.lock().await.take() else {
            return;
        };
        match self.request("logout", Some(&sid), Map::new()).await {
            Ok(_) => tracing::debug!("Logged out"),
            Err(e) => tracing::debug!(error = %e, "Logout failed"),
        }
    }

    async fn open_session(&self) -> Result<String, ApiError> {
        let mut params = Map::new();
        params.insert("user".into(), Value::from(self.settings.username.clone()));
        params.insert(
            "password".into(),
            Value::from(self.settings.password.expose_secret()),
        );

        let content = match self.request("login", None, params).await {
            Ok(content) => content,
            Err(ApiError::NotLoggedIn) => {
                return Err(ApiError::LoginFailed("credentials rejected".to_string()))
            }
            Err(e) => return Err(e),
        };

        let login: LoginContent = serde_json::from_str(content.get())
            .map_err(|e| ApiError::Parse(format!("login response: {e}")))?;
        if let Some(level) = login.api_level {
            self.api_level.store(level, Ordering::Relaxed);
        }
        tracing::debug!(api_level = self.api_level(), "Logged in");
        Ok(login.session_id)
    }

    async fn current_session(&self) -> Result<String, ApiError> {
        let mut session = self.session.lock().await;
        if let Some(sid) = session.as_ref() {
            return Ok(sid.clone());
        }
        let sid = self.open_session().await?;
        *session = Some(sid.clone());
        Ok(sid)
    }

    /// Replace `stale` with a fresh session unless another call already did.
    async fn renew_session(&self, stale: &str) -> Result<String, ApiError> {
        let mut session = self.session.lock().await;
        if let Some(sid) = session.as_ref().filter(|sid| sid.as_str() != stale) {
            return Ok(sid.clone());
        }
        session.take();
        let sid = self.open_session().await?;
        *session = Some(sid.clone());
        Ok(sid)
    }

    /// Invoke `op` with `params`, returning the raw `content` payload.
    pub(crate) async fn call(&self, op: &str, params: Value) -> Result<Box<RawValue>, ApiError> {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ApiError::Parse(format!(
                    "parameters must be an object, got {other}"
                )))
            }
        };

        let sid = self.current_session().await?;
        match self.request(op, Some(&sid), params.clone()).await {
            Err(ApiError::NotLoggedIn) => {
                tracing::warn!(op = op, "Session rejected, logging in again");
                let sid = self.renew_session(&sid).await?;
                match self.request(op, Some(&sid), params).await {
                    Err(ApiError::NotLoggedIn) => Err(ApiError::LoginFailed(
                        "session rejected right after login".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn request(
        &self,
        op: &str,
        sid: Option<&str>,
        mut params: Map<String, Value>,
    ) -> Result<Box<RawValue>, ApiError> {
        params.insert("op".into(), Value::from(op));
        if let Some(sid) = sid {
            params.insert("sid".into(), Value::from(sid));
        }
        let body = serde_json::to_vec(&Value::Object(params))
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        let mut request = self
            .http
            .post(self.settings.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some((user, password)) = &self.settings.http_auth {
            request = request.basic_auth(user, Some(password.expose_secret()));
        }

        let started = std::time::Instant::now();
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.settings.max_response_bytes).await?;
        tracing::debug!(
            op = op,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API call completed"
        );

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Parse(format!("{op}: {e}")))?;

        if envelope.status != 0 {
            let code = envelope
                .content
                .as_deref()
                .and_then(|c| serde_json::from_str::<ErrorContent>(c.get()).ok())
                .map(|c| c.error)
                .unwrap_or_default();
            return Err(ApiError::from_code(&code));
        }

        envelope
            .content
            .ok_or_else(|| ApiError::Parse(format!("{op}: response without content")))
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
