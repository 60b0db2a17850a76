//! Version parsing for release and image tags.
//!
//! Charts and images tag versions inconsistently (`3.27.0` vs `v3.27.0`),
//! so both forms parse to the same [`Version`].

use semver::Version;

use crate::error::ConfigError;

/// Parse a semantic version, tolerating a leading `v`.
pub fn parse_version(value: &str) -> Result<Version, ConfigError> {
    let trimmed = value.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| ConfigError::InvalidVersion {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Extract the version from a container image reference's tag.
///
/// `quay.io/calico/node:v3.27.0@sha256:...` yields `3.27.0`. Returns `None`
/// for untagged images or tags that are not semantic versions.
pub fn version_from_image(image: &str) -> Option<Version> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let name_start = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (_, tag) = without_digest[name_start..].rsplit_once(':')?;
    parse_version(tag).ok()
}
