//! Delivery backends.
//!
//! Two external automation services accept work from the dispatcher: a
//! cloud-drive service that ingests magnet links as offline download
//! tasks, and a stream-download service that fetches plain HTTP targets.
//! Both sit behind the `DeliveryBackend` trait so the dispatcher and the
//! tests never talk to the network directly.
//!
//! Backends are constructed per request from a configuration snapshot, so
//! a credential or endpoint change applies to the next push without a
//! restart.

use async_trait::async_trait;
use reqwest::header;
use skiff_common::config::DeliverySettings;
use skiff_common::SkiffError;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("skiff/", env!("CARGO_PKG_VERSION"));

/// A remote service that accepts one submission and starts an
/// asynchronous transfer on our behalf.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Backend name for logs and messages.
    fn name(&self) -> &'static str;

    /// Submit one target to the service.
    ///
    /// `Ok(true)` means the task was accepted. `Ok(false)` means this item
    /// was declined or skipped and the batch keeps going. `Err` means the
    /// service itself failed and the batch must stop.
    async fn add_task(&self, target: &str) -> Result<bool, SkiffError>;
}

// ============================================================================
// Drive backend (magnet links)
// ============================================================================

/// Cloud-drive offline download backend. Requires a stored session
/// credential; without one, magnet items are skipped rather than failed.
pub struct DriveBackend {
    client: reqwest::Client,
    api_url: String,
    session: Option<String>,
}

impl DriveBackend {
    pub fn from_settings(settings: &DeliverySettings) -> Result<Self, SkiffError> {
        Ok(Self {
            client: build_client(settings.request_timeout_secs)?,
            api_url: settings.drive_api_url.clone(),
            session: settings.drive_session.clone(),
        })
    }
}

#[async_trait]
impl DeliveryBackend for DriveBackend {
    fn name(&self) -> &'static str {
        "drive"
    }

    async fn add_task(&self, target: &str) -> Result<bool, SkiffError> {
        let Some(session) = self.session.as_deref() else {
            warn!("no drive session stored, skipping magnet target");
            return Ok(false);
        };

        let resp = self
            .client
            .post(&self.api_url)
            .header(header::COOKIE, session)
            .json(&serde_json::json!({ "url": target }))
            .send()
            .await
            .map_err(|e| SkiffError::Network(format!("drive backend: {e}")))?;

        read_accepted(self.name(), resp).await
    }
}

// ============================================================================
// Stream backend (HTTP targets)
// ============================================================================

/// Stream-download backend for plain HTTP and HLS targets.
pub struct StreamBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl StreamBackend {
    pub fn from_settings(settings: &DeliverySettings) -> Result<Self, SkiffError> {
        Ok(Self {
            client: build_client(settings.request_timeout_secs)?,
            api_url: settings.stream_api_url.clone(),
            api_key: settings.stream_api_key.clone(),
        })
    }
}

#[async_trait]
impl DeliveryBackend for StreamBackend {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn add_task(&self, target: &str) -> Result<bool, SkiffError> {
        let mut req = self
            .client
            .post(&self.api_url)
            .json(&serde_json::json!({ "url": target }));
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("x-api-key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SkiffError::Network(format!("stream backend: {e}")))?;

        read_accepted(self.name(), resp).await
    }
}

// ============================================================================
// Shared plumbing
// ============================================================================

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, SkiffError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SkiffError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a backend response to the accept/decline/fail contract. A non-2xx
/// status is a backend failure; a 2xx body may still decline the task via
/// `{"success": false}`.
async fn read_accepted(name: &str, resp: reqwest::Response) -> Result<bool, SkiffError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(SkiffError::Network(format!(
            "{name} backend returned {status}"
        )));
    }
    let accepted = match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        // Services that answer 200 with a non-JSON body count as accepts.
        Err(_) => true,
    };
    if !accepted {
        debug!("{name} backend declined the task");
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drive_without_session_declines_without_network() {
        // Default settings carry no session; the target must be skipped
        // before any request is attempted.
        let backend = DriveBackend::from_settings(&DeliverySettings::default()).unwrap();
        let accepted = backend.add_task("magnet:?xt=urn:btih:abc").await.unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_backend_names() {
        let settings = DeliverySettings::default();
        assert_eq!(DriveBackend::from_settings(&settings).unwrap().name(), "drive");
        assert_eq!(StreamBackend::from_settings(&settings).unwrap().name(), "stream");
    }
}
