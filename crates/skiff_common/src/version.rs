//! Dotted-numeric version ordering and the update script version marker.
//!
//! Versions here are plain dot-delimited digit runs ("1.5.3", "2.0"), not
//! full semver. Missing trailing segments compare as zero, so "1.2" and
//! "1.2.0" are the same version.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Marker line an update script must carry, e.g. `# VERSION = 2.0.0`.
static VERSION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*VERSION\s*=\s*([0-9.]+)").unwrap());

/// Compare two dotted versions segment by segment.
///
/// Either input being empty yields `Equal`; callers must treat that as
/// "no upgrade", never as "newer". Segments the marker regex let through
/// are digits, so a failed parse falls back to zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a.is_empty() || b.is_empty() {
        return Ordering::Equal;
    }

    let parse = |v: &str| -> Vec<u64> {
        v.split('.').map(|s| s.parse().unwrap_or(0)).collect()
    };
    let pa = parse(a);
    let pb = parse(b);

    for i in 0..pa.len().max(pb.len()) {
        let na = pa.get(i).copied().unwrap_or(0);
        let nb = pb.get(i).copied().unwrap_or(0);
        match na.cmp(&nb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// True when `remote` is strictly newer than `running`.
pub fn is_newer_version(remote: &str, running: &str) -> bool {
    compare_versions(remote, running) == Ordering::Greater
}

/// Extract the declared version from update script text.
///
/// Returns the first `# VERSION = <dotted-digits>` match; a script without
/// one is invalid and must be rejected by the caller.
pub fn extract_script_version(content: &str) -> Option<String> {
    VERSION_MARKER
        .captures(content)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_with_trailing_zero() {
        assert_eq!(compare_versions("1.2.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_ordering() {
        assert_eq!(compare_versions("2.0", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.9", "2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.5.3", "1.5.2"), Ordering::Greater);
        assert_eq!(compare_versions("0.0.9", "0.0.10"), Ordering::Less);
    }

    #[test]
    fn test_empty_compares_equal() {
        assert_eq!(compare_versions("", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", ""), Ordering::Equal);
        assert_eq!(compare_versions("", ""), Ordering::Equal);
        // An empty side must never report an upgrade.
        assert!(!is_newer_version("", "1.0"));
        assert!(!is_newer_version("1.0", ""));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer_version("2.0.0", "1.5.3"));
        assert!(!is_newer_version("1.5.3", "1.5.3"));
        assert!(!is_newer_version("1.5.2", "1.5.3"));
        assert!(is_newer_version("1.10", "1.9"));
    }

    #[test]
    fn test_marker_extraction() {
        assert_eq!(
            extract_script_version("#!/bin/sh\n# VERSION = 2.0.0\necho hi\n"),
            Some("2.0.0".to_string())
        );
        assert_eq!(
            extract_script_version("#VERSION=1.8\n"),
            Some("1.8".to_string())
        );
        assert_eq!(
            extract_script_version("#  VERSION  =  3.1.4  \n"),
            Some("3.1.4".to_string())
        );
    }

    #[test]
    fn test_marker_missing() {
        assert_eq!(extract_script_version("#!/bin/sh\necho no marker\n"), None);
        assert_eq!(extract_script_version(""), None);
        // A bare "VERSION" word without the comment prefix is not a marker.
        assert_eq!(extract_script_version("VERSION 2.0.0\n"), None);
    }

    #[test]
    fn test_marker_takes_first() {
        let body = "# VERSION = 1.1\n# VERSION = 9.9\n";
        assert_eq!(extract_script_version(body), Some("1.1".to_string()));
    }
}
