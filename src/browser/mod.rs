//! Remote browser sessions reached over the Chrome DevTools Protocol
//!
//! The controller never launches a browser itself. It asks a
//! [`BrowserProvisioner`] for a live [`BrowserSession`] bound to the caller's
//! session id and closes it when the stream ends.

mod wrapper;

pub use wrapper::{CdpProvisioner, RemoteBrowser};

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Invalid browser target: {0}")]
    InvalidTarget(String),

    #[error("Failed to connect to browser: {0}")]
    ConnectFailed(String),

    #[error("Failed to close browser: {0}")]
    CloseFailed(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Where and how to reach the remote browser for one session
#[derive(Clone)]
pub struct BrowserTarget {
    pub connect_url: String,
    pub api_key: String,
    pub session_id: String,
}

impl BrowserTarget {
    pub fn new(
        connect_url: impl Into<String>,
        api_key: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            connect_url: connect_url.into(),
            api_key: api_key.into(),
            session_id: session_id.into(),
        }
    }

    /// Build the CDP endpoint: the connect URL with `apiKey` and `sessionId`
    /// query parameters appended. Existing query parameters are preserved.
    pub fn cdp_url(&self) -> BrowserResult<Url> {
        let mut url = Url::parse(&self.connect_url).map_err(|e| {
            BrowserError::InvalidTarget(format!("{}: {}", self.connect_url, e))
        })?;

        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(BrowserError::InvalidTarget(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                self.connect_url
            )));
        }
        if self.session_id.trim().is_empty() {
            return Err(BrowserError::InvalidTarget("empty session id".into()));
        }

        url.query_pairs_mut()
            .append_pair("apiKey", &self.api_key)
            .append_pair("sessionId", &self.session_id);
        Ok(url)
    }
}

impl fmt::Debug for BrowserTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserTarget")
            .field("connect_url", &self.connect_url)
            .field("api_key", &"***")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Replace the `apiKey` query value so URLs can be logged
pub(crate) fn redact_api_key(url: &Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "apiKey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.set_query(None);
    if !pairs.is_empty() {
        redacted.query_pairs_mut().extend_pairs(pairs);
    }
    redacted.to_string()
}

/// A live browser connection owned by one session
///
/// Planners receive it as a trait object and reach the concrete connection
/// by downcasting, e.g. `session.downcast_ref::<RemoteBrowser>()` for the
/// chromiumoxide handle.
#[async_trait]
pub trait BrowserSession: Send + Sync + 'static {
    /// Endpoint this session is connected to, with credentials redacted
    fn endpoint(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> BrowserResult<()>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn BrowserSession {
    /// The concrete session behind this trait object, if it is a `T`
    pub fn downcast_ref<T: BrowserSession>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Hands out browser sessions for a target
#[async_trait]
pub trait BrowserProvisioner: Send + Sync {
    async fn connect(&self, target: &BrowserTarget) -> BrowserResult<Arc<dyn BrowserSession>>;
}
