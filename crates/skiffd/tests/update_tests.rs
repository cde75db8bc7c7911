//! Self-update pipeline tests
//!
//! Drives the check/download/parse/compare/install machine with a stub
//! remote source and a temp data directory:
//!
//! 1. An allow-list miss denies before any download, touching nothing
//! 2. An empty device token is denied before any fetch at all
//! 3. A script without a version marker is rejected and kept for inspection
//! 4. A strictly newer script is installed by renaming the temp file
//! 5. A same-or-older script is discarded and reported as not newer
//! 6. Remote failures surface as network errors
//!
//! ## Running
//!
//! ```bash
//! cargo test -p skiffd --test update_tests
//! ```

use async_trait::async_trait;
use skiff_common::config::UpdateSettings;
use skiff_common::SkiffError;
use skiffd::update::{RemoteSource, Updater};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const TOKEN: &str = "1A2B3C4D5E6F7081";
const RUNNING: &str = "1.5.3";

// ============================================================================
// Fixtures
// ============================================================================

/// Remote double: canned documents plus call counters. `None` for either
/// document simulates an unreachable endpoint.
struct StubSource {
    allowlist: Option<String>,
    script: Option<String>,
    fetches: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
}

impl StubSource {
    fn new(allowlist: Option<&str>, script: Option<&str>) -> Self {
        Self {
            allowlist: allowlist.map(String::from),
            script: script.map(String::from),
            fetches: Arc::new(AtomicUsize::new(0)),
            downloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (self.fetches.clone(), self.downloads.clone())
    }
}

#[async_trait]
impl RemoteSource for StubSource {
    async fn fetch_allowlist(&self) -> Result<String, SkiffError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.allowlist {
            Some(doc) => Ok(doc.clone()),
            None => Err(SkiffError::Network("allow-list unreachable".to_string())),
        }
    }

    async fn download_script(&self, dest: &Path) -> Result<(), SkiffError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Some(body) => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(dest, body)?;
                Ok(())
            }
            None => Err(SkiffError::Network("script unreachable".to_string())),
        }
    }
}

fn settings_in(dir: &TempDir) -> UpdateSettings {
    let mut settings = UpdateSettings::default();
    settings.temp_script_path = dir.path().join("update_temp.sh");
    settings.install_script_path = dir.path().join("update.sh");
    settings
}

fn updater(dir: &TempDir, source: StubSource, token: &str) -> Updater<StubSource> {
    Updater::new(
        source,
        settings_in(dir),
        token.to_string(),
        RUNNING.to_string(),
    )
}

// ============================================================================
// Test: Authorization Gate
// ============================================================================

#[tokio::test]
async fn test_allowlist_miss_denies_before_download() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(
        Some("# devices\nFFEEDDCCBBAA0099\n"),
        Some("# VERSION = 9.9.9\n"),
    );
    let (fetches, downloads) = source.counters();

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    match err {
        SkiffError::AuthorizationDenied(token) => assert_eq!(token, TOKEN),
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(downloads.load(Ordering::SeqCst), 0);
    assert!(!settings_in(&dir).temp_script_path.exists());
    assert!(!settings_in(&dir).install_script_path.exists());
}

#[tokio::test]
async fn test_empty_token_denied_before_any_fetch() {
    let dir = TempDir::new().unwrap();
    // Even a wide-open allow-list must not admit an empty token.
    let source = StubSource::new(Some("anything"), Some("# VERSION = 9.9.9\n"));
    let (fetches, downloads) = source.counters();

    let err = updater(&dir, source, "").run().await.unwrap_err();

    assert!(matches!(err, SkiffError::AuthorizationDenied(_)));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert_eq!(downloads.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Test: Script Validation
// ============================================================================

#[tokio::test]
async fn test_markerless_script_is_rejected_and_kept() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(Some(TOKEN), Some("#!/bin/sh\necho hello\n"));

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    assert!(matches!(err, SkiffError::ScriptInvalid));
    // The rejected download stays on disk for inspection.
    assert!(settings_in(&dir).temp_script_path.exists());
    assert!(!settings_in(&dir).install_script_path.exists());
}

// ============================================================================
// Test: Version Comparison and Install
// ============================================================================

#[tokio::test]
async fn test_newer_script_installs_via_rename() {
    let dir = TempDir::new().unwrap();
    let script = "#!/bin/sh\n# VERSION = 2.0.0\necho upgrading\n";
    let source = StubSource::new(Some(TOKEN), Some(script));

    let outcome = updater(&dir, source, TOKEN).run().await.unwrap();

    assert_eq!(outcome.version, "2.0.0");
    let settings = settings_in(&dir);
    assert!(!settings.temp_script_path.exists());
    let installed = fs::read_to_string(&settings.install_script_path).unwrap();
    assert!(installed.contains("# VERSION = 2.0.0"));
}

#[tokio::test]
async fn test_install_replaces_previous_script() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir);
    fs::write(&settings.install_script_path, "# VERSION = 1.5.3\n").unwrap();

    let source = StubSource::new(Some(TOKEN), Some("# VERSION = 2.0.0\n"));
    updater(&dir, source, TOKEN).run().await.unwrap();

    let installed = fs::read_to_string(&settings.install_script_path).unwrap();
    assert!(installed.contains("2.0.0"));
    assert!(!installed.contains("1.5.3"));
}

#[tokio::test]
async fn test_same_version_is_discarded_as_not_newer() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(Some(TOKEN), Some("# VERSION = 1.5.3\n"));

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    match err {
        SkiffError::VersionNotNewer(offered) => assert_eq!(offered, RUNNING),
        other => panic!("expected not-newer, got {other:?}"),
    }
    // Nothing to inspect here; the temp copy is cleaned up.
    assert!(!settings_in(&dir).temp_script_path.exists());
    assert!(!settings_in(&dir).install_script_path.exists());
}

#[tokio::test]
async fn test_older_version_is_discarded_as_not_newer() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(Some(TOKEN), Some("# VERSION = 1.0.0\n"));

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    assert!(matches!(err, SkiffError::VersionNotNewer(v) if v == "1.0.0"));
    assert!(!settings_in(&dir).temp_script_path.exists());
}

// ============================================================================
// Test: Remote Failures
// ============================================================================

#[tokio::test]
async fn test_allowlist_fetch_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(None, Some("# VERSION = 2.0.0\n"));
    let (_, downloads) = source.counters();

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    assert!(matches!(err, SkiffError::Network(_)));
    assert_eq!(downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_script_download_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::new(Some(TOKEN), None);
    let (fetches, downloads) = source.counters();

    let err = updater(&dir, source, TOKEN).run().await.unwrap_err();

    assert!(matches!(err, SkiffError::Network(_)));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(downloads.load(Ordering::SeqCst), 1);
    assert!(!settings_in(&dir).install_script_path.exists());
}
