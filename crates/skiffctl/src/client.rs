//! HTTP client for the skiff daemon API.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use skiff_common::api::{
    AckResponse, DeleteRequest, HealthResponse, ListQuery, ListResponse, OrganizeRequest,
    PushRequest, PushResponse, StatusResponse, UpdateResponse,
};
use std::time::Duration;

/// Default daemon address, matching the daemon's default bind.
pub const DEFAULT_ADDR: &str = "127.0.0.1:7931";

/// JSON client for the daemon.
pub struct SkiffClient {
    base_url: String,
    client: reqwest::Client,
}

impl SkiffClient {
    /// Resolve the daemon address.
    ///
    /// Priority:
    /// 1. Explicit --addr flag
    /// 2. $SKIFFD_ADDR environment variable
    /// 3. 127.0.0.1:7931 (default)
    pub fn resolve_addr(explicit: Option<&str>) -> String {
        if let Some(addr) = explicit {
            return addr.to_string();
        }
        if let Ok(addr) = std::env::var("SKIFFD_ADDR") {
            return addr;
        }
        DEFAULT_ADDR.to_string()
    }

    pub fn new(addr: Option<&str>) -> Result<Self> {
        let addr = Self::resolve_addr(addr);
        // Long timeout: a push batch waits the inter-item delay per item.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: format!("http://{addr}"),
            client,
        })
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.get("/status").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/v1/health").await
    }

    pub async fn push(&self, ids: Vec<i64>, organize: bool) -> Result<PushResponse> {
        self.post("/push", &PushRequest { ids, organize }).await
    }

    pub async fn organize(&self, ids: Vec<i64>) -> Result<PushResponse> {
        self.post("/organize", &OrganizeRequest { ids }).await
    }

    pub async fn update(&self) -> Result<UpdateResponse> {
        let url = format!("{}/system/online-update", self.base_url);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| unreachable_hint(&url))?;
        parse_json(resp).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListResponse> {
        let mut url = format!("{}/data?page={}", self.base_url, query.page.unwrap_or(1));
        if let Some(pushed) = query.pushed {
            url.push_str(&format!("&pushed={pushed}"));
        }
        if let Some(keyword) = query.keyword.as_deref() {
            url.push_str(&format!("&keyword={keyword}"));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| unreachable_hint(&url))?;
        parse_json(resp).await
    }

    pub async fn delete(&self, ids: Vec<i64>) -> Result<AckResponse> {
        self.post("/delete", &DeleteRequest { ids }).await
    }

    /// Fetch the CSV export as text.
    pub async fn export(&self) -> Result<String> {
        let url = format!("{}/export", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| unreachable_hint(&url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("daemon returned {status}");
        }
        resp.text().await.context("failed to read export body")
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| unreachable_hint(&url))?;
        parse_json(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| unreachable_hint(&url))?;
        parse_json(resp).await
    }
}

fn unreachable_hint(url: &str) -> String {
    format!("failed to reach skiffd at {url}. Is the daemon running?")
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("daemon returned {status}: {body}");
    }
    resp.json().await.context("failed to parse daemon response")
}
