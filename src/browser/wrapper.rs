//! Remote browser connection lifecycle
//!
//! Connects chromiumoxide to a remote CDP endpoint and keeps its event
//! handler task alive until the session closes.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};
use url::Url;

use super::{BrowserError, BrowserProvisioner, BrowserResult, BrowserSession, BrowserTarget, redact_api_key};

/// Remote browser plus its CDP event handler task
///
/// The handler MUST be aborted when the session ends, otherwise it keeps
/// polling a dead websocket. `close()` and `Drop` both take care of it.
pub struct RemoteBrowser {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    endpoint: String,
    open: AtomicBool,
}

impl RemoteBrowser {
    /// Connect to a CDP websocket endpoint
    pub async fn connect(url: &Url) -> BrowserResult<Self> {
        let endpoint = redact_api_key(url);
        info!("Connecting to remote browser at {}", endpoint);

        let (browser, mut handler) = Browser::connect(url.as_str())
            .await
            .map_err(|e| BrowserError::ConnectFailed(format!("{}: {}", endpoint, e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    let error_msg = e.to_string();

                    // Chrome emits CDP events chromiumoxide does not model
                    let is_benign_serialization_error = error_msg
                        .contains("data did not match any variant of untagged enum Message")
                        || error_msg.contains("Failed to deserialize WS response");

                    if is_benign_serialization_error {
                        trace!("Suppressed benign CDP serialization error: {}", error_msg);
                    } else {
                        error!("Browser handler error: {:?}", e);
                    }
                }
            }
            info!("Browser handler task completed");
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: handler_task,
            endpoint,
            open: AtomicBool::new(true),
        })
    }

    /// Access the underlying chromiumoxide browser (None once closed)
    ///
    /// Planners get here from the `Arc<dyn BrowserSession>` in their
    /// `PlannerRequest` via `downcast_ref::<RemoteBrowser>()`.
    pub async fn browser(&self) -> MutexGuard<'_, Option<Browser>> {
        self.browser.lock().await
    }
}

#[async_trait]
impl BrowserSession for RemoteBrowser {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> BrowserResult<()> {
        let taken = self.browser.lock().await.take();
        self.open.store(false, Ordering::SeqCst);

        let result = match taken {
            Some(mut browser) => {
                info!("Closing remote browser at {}", self.endpoint);
                browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| BrowserError::CloseFailed(e.to_string()))
            }
            None => Ok(()),
        };

        self.handler.abort();
        result
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for RemoteBrowser {
    fn drop(&mut self) {
        self.handler.abort();
        if self.open.load(Ordering::SeqCst) {
            warn!(
                "RemoteBrowser for {} dropped without close(); remote session may linger",
                self.endpoint
            );
        }
    }
}

/// Provisioner that dials the target's CDP endpoint directly
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpProvisioner;

#[async_trait]
impl BrowserProvisioner for CdpProvisioner {
    async fn connect(&self, target: &BrowserTarget) -> BrowserResult<Arc<dyn BrowserSession>> {
        let url = target.cdp_url()?;
        let browser = RemoteBrowser::connect(&url).await?;
        Ok(Arc::new(browser))
    }
}
