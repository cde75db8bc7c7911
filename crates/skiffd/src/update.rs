//! Authorization-gated self-update.
//!
//! The update pipeline runs CHECK -> DOWNLOAD -> PARSE -> COMPARE ->
//! INSTALL -> SCHEDULE_EXEC -> TERMINATE. Untrusted content is only ever
//! executed when the device token passes the remote allow-list AND the
//! downloaded script declares a strictly newer version than the running
//! daemon. There are no retries; every failure is terminal for the
//! attempt.
//!
//! Remote fetches sit behind `RemoteSource` so the state machine is
//! testable without a network.

use async_trait::async_trait;
use skiff_common::config::UpdateSettings;
use skiff_common::version::{extract_script_version, is_newer_version};
use skiff_common::SkiffError;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const USER_AGENT: &str = concat!("skiff/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Remote source
// ============================================================================

/// The two remote documents the update pipeline consumes.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the allow-list document (plain text, device tokens as
    /// literal substrings).
    async fn fetch_allowlist(&self) -> Result<String, SkiffError>;

    /// Stream the candidate script body to `dest`.
    async fn download_script(&self, dest: &Path) -> Result<(), SkiffError>;
}

/// HTTP implementation, optionally routed through a forward proxy.
#[derive(Debug)]
pub struct HttpSource {
    client: reqwest::Client,
    allowlist_url: String,
    script_url: String,
}

impl HttpSource {
    /// Build from the update settings. Both URLs are required; empty means
    /// the operator has not configured an update source.
    pub fn from_config(settings: &UpdateSettings, proxy: Option<&str>) -> Result<Self, SkiffError> {
        if settings.allowlist_url.is_empty() {
            return Err(SkiffError::Config(
                "update allow-list URL is not configured".to_string(),
            ));
        }
        if settings.script_url.is_empty() {
            return Err(SkiffError::Config(
                "update script URL is not configured".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.fetch_timeout_secs));
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| SkiffError::Config(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SkiffError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allowlist_url: settings.allowlist_url.clone(),
            script_url: settings.script_url.clone(),
        })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_allowlist(&self) -> Result<String, SkiffError> {
        let resp = self
            .client
            .get(&self.allowlist_url)
            .send()
            .await
            .map_err(|e| SkiffError::Network(format!("allow-list fetch: {e}")))?;
        if !resp.status().is_success() {
            return Err(SkiffError::Network(format!(
                "allow-list fetch returned {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|e| SkiffError::Network(format!("allow-list read: {e}")))
    }

    async fn download_script(&self, dest: &Path) -> Result<(), SkiffError> {
        let mut resp = self
            .client
            .get(&self.script_url)
            .send()
            .await
            .map_err(|e| SkiffError::Network(format!("script download: {e}")))?;
        if !resp.status().is_success() {
            return Err(SkiffError::Network(format!(
                "script download returned {}",
                resp.status()
            )));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(dest)?;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| SkiffError::Network(format!("script download: {e}")))?
        {
            file.write_all(&chunk)?;
        }
        Ok(())
    }
}

// ============================================================================
// Authorization
// ============================================================================

/// A device is authorized when the allow-list contains its token as a
/// substring. An empty token never authorizes, whatever the document
/// says.
pub fn authorized(allowlist: &str, token: &str) -> bool {
    !token.is_empty() && allowlist.contains(token)
}

// ============================================================================
// Update pipeline
// ============================================================================

/// Result of a successful check-and-install.
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Version declared by the installed script.
    pub version: String,
}

/// Runs the update state machine up to and including INSTALL. Scheduling
/// the script execution is the caller's step, after the HTTP response is
/// on its way.
pub struct Updater<S: RemoteSource> {
    source: S,
    settings: UpdateSettings,
    device_token: String,
    running_version: String,
}

impl<S: RemoteSource> Updater<S> {
    pub fn new(
        source: S,
        settings: UpdateSettings,
        device_token: String,
        running_version: String,
    ) -> Self {
        Self {
            source,
            settings,
            device_token,
            running_version,
        }
    }

    pub async fn run(&self) -> Result<UpdateOutcome, SkiffError> {
        // CHECK. A missing token is denied before any fetch.
        if self.device_token.is_empty() {
            return Err(SkiffError::AuthorizationDenied("(none)".to_string()));
        }
        info!("🔍  Checking update authorization...");
        let allowlist = self.source.fetch_allowlist().await?;
        if !authorized(&allowlist, &self.device_token) {
            warn!("⛔  Device {} is not in the allow-list", self.device_token);
            return Err(SkiffError::AuthorizationDenied(self.device_token.clone()));
        }

        // DOWNLOAD.
        let temp = self.settings.temp_script_path.clone();
        info!("📥  Downloading update script...");
        self.source.download_script(&temp).await?;

        // PARSE. A script without a version marker is rejected; the temp
        // file is deliberately left in place for inspection.
        let content = fs::read_to_string(&temp)?;
        let Some(remote) = extract_script_version(&content) else {
            warn!("⚠️  Downloaded script carries no version marker");
            return Err(SkiffError::ScriptInvalid);
        };

        // COMPARE.
        if !is_newer_version(&remote, &self.running_version) {
            let _ = fs::remove_file(&temp);
            info!("📋  Already up to date ({} running, {} offered)", self.running_version, remote);
            return Err(SkiffError::VersionNotNewer(remote));
        }

        // INSTALL. The rename is the point of no return: the previous
        // script at the install path is gone after this.
        info!("📦  Installing update {} -> {}", self.running_version, remote);
        fs::rename(&temp, &self.settings.install_script_path)?;

        Ok(UpdateOutcome { version: remote })
    }
}

// ============================================================================
// Scheduled execution
// ============================================================================

/// Schedule the installed script to run after the configured delay, then
/// terminate this process so the script can replace it. The delay lets
/// the HTTP success response reach the caller first.
///
/// Returns the task handle; aborting it before the delay elapses cancels
/// the restart.
pub fn schedule_restart(settings: &UpdateSettings) -> JoinHandle<()> {
    let script = settings.install_script_path.clone();
    let delay = Duration::from_millis(settings.exec_delay_ms);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match launch_script(&script) {
            Ok(()) => {
                info!("🔄  Update script launched, daemon exiting");
                std::process::exit(0);
            }
            Err(e) => {
                // Execution errors are logged only; the daemon keeps
                // running on the old version.
                error!("❌  Failed to launch update script: {e}");
            }
        }
    })
}

/// Mark the script executable and run it as a detached child. The child
/// keeps running after this process exits.
pub fn launch_script(script: &Path) -> io::Result<()> {
    let command = format!("chmod +x {0} && sh {0}", script.display());
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_is_substring_match() {
        let doc = "# devices\n1A2B3C4D5E6F7081\nFFEEDDCCBBAA0099\n";
        assert!(authorized(doc, "1A2B3C4D5E6F7081"));
        assert!(authorized(doc, "FFEEDDCCBBAA0099"));
        // Substring anywhere in the document counts.
        assert!(authorized(doc, "2B3C"));
        assert!(!authorized(doc, "0000000000000000"));
    }

    #[test]
    fn test_empty_token_never_authorizes() {
        assert!(!authorized("anything at all", ""));
        assert!(!authorized("", ""));
    }

    #[test]
    fn test_unconfigured_urls_are_rejected() {
        let settings = UpdateSettings::default();
        let err = HttpSource::from_config(&settings, None).unwrap_err();
        assert_eq!(err.code(), SkiffError::Config(String::new()).code());

        let mut settings = UpdateSettings::default();
        settings.allowlist_url = "https://updates.example.net/allow.txt".to_string();
        assert!(HttpSource::from_config(&settings, None).is_err());

        settings.script_url = "https://updates.example.net/update.sh".to_string();
        assert!(HttpSource::from_config(&settings, None).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_a_config_error() {
        let mut settings = UpdateSettings::default();
        settings.allowlist_url = "https://u.example.net/allow.txt".to_string();
        settings.script_url = "https://u.example.net/update.sh".to_string();
        let err = HttpSource::from_config(&settings, Some("::not a proxy::")).unwrap_err();
        assert!(matches!(err, SkiffError::Config(_)));
    }

    #[tokio::test]
    async fn test_scheduled_restart_is_abortable() {
        let mut settings = UpdateSettings::default();
        settings.exec_delay_ms = 60_000;

        let handle = schedule_restart(&settings);
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
