//! Wire types for the skiff JSON API.
//!
//! Shared between the daemon routes and the control CLI so both sides
//! agree on field names. Responses follow the `{success, ..., msg}` shape
//! throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheme prefix that marks a magnet field as authoritative for routing.
pub const MAGNET_SCHEME: &str = "magnet:?";

/// Delivery lifecycle of a resource record.
///
/// `Pending` is the claim state: a dispatcher has taken the item and is
/// talking to a backend. Exactly one dispatcher can hold a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PushState {
    #[default]
    Idle,
    Pending,
    Pushed,
}

impl PushState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushState::Idle => "idle",
            PushState::Pending => "pending",
            PushState::Pushed => "pushed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(PushState::Idle),
            "pending" => Some(PushState::Pending),
            "pushed" => Some(PushState::Pushed),
            _ => None,
        }
    }
}

/// A curated resource record.
///
/// Created by the scraping subsystem; the dispatcher only ever advances its
/// push state. A magnet field starting with [`MAGNET_SCHEME`] wins over the
/// page link when routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceItem {
    pub id: i64,
    pub code: Option<String>,
    pub title: Option<String>,
    pub magnet: Option<String>,
    pub link: Option<String>,
    #[serde(default)]
    pub push_state: PushState,
    pub created_at: DateTime<Utc>,
}

impl ResourceItem {
    pub fn pushed(&self) -> bool {
        self.push_state == PushState::Pushed
    }

    /// Trimmed magnet field, empty string when absent.
    pub fn magnet_trimmed(&self) -> &str {
        self.magnet.as_deref().unwrap_or("").trim()
    }

    /// Trimmed link field, empty string when absent.
    pub fn link_trimmed(&self) -> &str {
        self.link.as_deref().unwrap_or("").trim()
    }

    /// Whether the magnet field qualifies the item for backend A.
    pub fn has_qualifying_magnet(&self) -> bool {
        self.magnet_trimmed().starts_with(MAGNET_SCHEME)
    }
}

// ============================================================================
// Push / organize
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub organize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    pub count: usize,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

// ============================================================================
// Self-update
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub msg: String,
    /// Stable error code when success is false (see skiff_common::error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

// ============================================================================
// Resource listing / deletion / export
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub pushed: Option<bool>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub success: bool,
    pub data: Vec<ResourceItem>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// Minimal acknowledgement for operations without a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            msg: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
        }
    }
}

// ============================================================================
// Status / health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub device_token: Option<String>,
    pub config: crate::config::SkiffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(magnet: Option<&str>, link: Option<&str>) -> ResourceItem {
        ResourceItem {
            id: 1,
            code: None,
            title: None,
            magnet: magnet.map(String::from),
            link: link.map(String::from),
            push_state: PushState::Idle,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_qualifying_magnet() {
        assert!(item(Some("magnet:?xt=urn:btih:abc"), None).has_qualifying_magnet());
        assert!(item(Some("  magnet:?xt=urn:btih:abc  "), None).has_qualifying_magnet());
        assert!(!item(Some("m3u8|http://x/v.m3u8"), None).has_qualifying_magnet());
        assert!(!item(Some("magnet"), None).has_qualifying_magnet());
        assert!(!item(None, Some("http://x")).has_qualifying_magnet());
    }

    #[test]
    fn test_trimming() {
        let it = item(Some("  magnet:?a  "), Some("  http://x  "));
        assert_eq!(it.magnet_trimmed(), "magnet:?a");
        assert_eq!(it.link_trimmed(), "http://x");
        assert_eq!(item(None, None).magnet_trimmed(), "");
    }

    #[test]
    fn test_push_state_round_trip() {
        for state in [PushState::Idle, PushState::Pending, PushState::Pushed] {
            assert_eq!(PushState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PushState::parse("gone"), None);
    }

    #[test]
    fn test_push_request_defaults() {
        let req: PushRequest = serde_json::from_str(r#"{"ids":[1,2]}"#).unwrap();
        assert_eq!(req.ids, vec![1, 2]);
        assert!(!req.organize);
    }
}
