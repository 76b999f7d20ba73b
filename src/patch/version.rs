//! Host-version gating for patch batches.
//!
//! Every patch targets a specific, versioned host routine. Batches may carry
//! a semver range like ">=1.2.0, <1.4.0"; a running host outside the range
//! skips the whole batch instead of risking a miscompile.

use semver::{Version, VersionReq};
use std::fmt;

/// Errors while parsing host versions or ranges.
#[derive(Debug, Clone)]
pub enum VersionError {
    /// Invalid host version string (e.g., "not-a-version")
    InvalidVersion { value: String, source: String },
    /// Invalid range string (e.g., ">=bad")
    InvalidRange { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid host version '{}': {}", value, source)
            }
            VersionError::InvalidRange { value, source } => {
                write!(f, "invalid host range '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Parse the running host's version.
pub fn parse_host_version(value: &str) -> Result<Version, VersionError> {
    Version::parse(value.trim()).map_err(|e| VersionError::InvalidVersion {
        value: value.to_string(),
        source: e.to_string(),
    })
}

/// Parse a batch's host range. `None` and blank strings mean "all hosts".
pub fn parse_host_range(value: Option<&str>) -> Result<Option<VersionReq>, VersionError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    VersionReq::parse(trimmed)
        .map(Some)
        .map_err(|e| VersionError::InvalidRange {
            value: trimmed.to_string(),
            source: e.to_string(),
        })
}

/// Whether a host version satisfies a parsed range. `None` matches all.
pub fn matches_host(version: &Version, range: Option<&VersionReq>) -> bool {
    range.map_or(true, |req| req.matches(version))
}
