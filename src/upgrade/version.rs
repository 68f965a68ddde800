//! Version ordering for release tags.
//!
//! Release tags are compared as dot-separated integer sequences. This is looser
//! than semver on purpose: tags like `1.0.0.1` or `1.1` must still order, and
//! a component that is not a number is dropped rather than rejected.

use std::cmp::Ordering;

/// Version reported when none is configured.
const FALLBACK_VERSION: &str = "0.0.0";

fn components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

/// Compare two versions component-wise, padding the shorter side with zeros.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);
    let len = a.len().max(b.len());

    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        let ordering = left.cmp(&right);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Whether `remote` is strictly newer than `current`.
///
/// Missing trailing components count as zero, so `1.0` is not newer than
/// `1.0.0` while `1.0.0.1` is.
#[must_use]
pub fn is_newer(remote: &str, current: &str) -> bool {
    compare(remote, current) == Ordering::Greater
}

/// Strip a single leading `v` from a release tag.
#[must_use]
pub fn normalize_tag(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Resolve the running version from an optional override.
///
/// Falls back to the package version, and to `0.0.0` if the override is blank.
#[must_use]
pub fn current_version(configured: Option<&str>) -> String {
    match configured {
        Some(v) if v.trim().is_empty() => FALLBACK_VERSION.to_string(),
        Some(v) => v.trim().to_string(),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}
