//! # Version Resolver
//!
//! Semantic version handling for scheduled releases.
//!
//! Versions are accepted in a lenient form (`v1.2.3`, `1.2.3-rc.1`, `1.2.3.4`) but
//! always reduce to the `(major, minor, patch)` triple: the leading `v` and any
//! `-suffix` are dropped, and components past the third are ignored.
//!
//! ```rust
//! use release_core::version::{bump, resolve_first_scheduled_version, ReleaseType};
//!
//! assert_eq!(bump("1.2.3", ReleaseType::Minor).unwrap(), "1.3.0");
//! assert_eq!(
//!     resolve_first_scheduled_version("1.0.0", Some("1.2.0"), ReleaseType::Minor).unwrap(),
//!     "1.3.0"
//! );
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version format '{input}': {reason}")]
    InvalidVersionFormat { input: String, reason: String },

    #[error("Cannot bump {release_type} component of {version}: value at maximum")]
    ComponentOverflow {
        version: String,
        release_type: ReleaseType,
    },
}

impl VersionError {
    fn invalid(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidVersionFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

pub type VersionResult<T> = Result<T, VersionError>;

/// Kind of release, deciding which component gets bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseType {
    Major,
    Minor,
    Hotfix,
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Major => write!(f, "MAJOR"),
            Self::Minor => write!(f, "MINOR"),
            Self::Hotfix => write!(f, "HOTFIX"),
        }
    }
}

impl FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MAJOR" => Ok(Self::Major),
            "MINOR" => Ok(Self::Minor),
            "HOTFIX" => Ok(Self::Hotfix),
            _ => Err(format!("Invalid release type: {s}")),
        }
    }
}

/// A `(major, minor, patch)` triple. Ordering is lexicographic over the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Next version for `release_type`; fails if the bumped component is already `u64::MAX`
    pub fn bump(self, release_type: ReleaseType) -> VersionResult<Self> {
        let bumped = match release_type {
            ReleaseType::Major => self.major.checked_add(1).map(|major| Self::new(major, 0, 0)),
            ReleaseType::Minor => self
                .minor
                .checked_add(1)
                .map(|minor| Self::new(self.major, minor, 0)),
            ReleaseType::Hotfix => self
                .patch
                .checked_add(1)
                .map(|patch| Self::new(self.major, self.minor, patch)),
        };
        bumped.ok_or_else(|| VersionError::ComponentOverflow {
            version: self.to_string(),
            release_type,
        })
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let without_prefix = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = without_prefix
            .split_once('-')
            .map_or(without_prefix, |(core, _suffix)| core);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 3 {
            return Err(VersionError::invalid(
                s,
                "expected at least three dot-separated components",
            ));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::invalid(
                    s,
                    format!("component '{part}' is not numeric"),
                ));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionError::invalid(s, format!("component '{part}' overflows")))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

/// Parse a version string into its numeric triple.
pub fn parse(version: &str) -> VersionResult<(u64, u64, u64)> {
    let v: SemanticVersion = version.parse()?;
    Ok((v.major, v.minor, v.patch))
}

pub fn format(major: u64, minor: u64, patch: u64) -> String {
    SemanticVersion::new(major, minor, patch).to_string()
}

pub fn bump(version: &str, release_type: ReleaseType) -> VersionResult<String> {
    let v: SemanticVersion = version.parse()?;
    Ok(v.bump(release_type)?.to_string())
}

/// Compare two versions, returning -1, 0 or 1.
pub fn compare(v1: &str, v2: &str) -> VersionResult<i8> {
    let a: SemanticVersion = v1.parse()?;
    let b: SemanticVersion = v2.parse()?;
    Ok(match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// Resolve the version for the first release a schedule creates.
///
/// With no prior version for the tenant/platform/target the configured initial
/// version is used as-is. Otherwise the higher of the initial version and the
/// bumped latest version wins, ties going to the initial version, so released
/// versions never go backwards when a schedule's initial version is stale.
pub fn resolve_first_scheduled_version(
    initial_version: &str,
    latest_known_version: Option<&str>,
    release_type: ReleaseType,
) -> VersionResult<String> {
    let initial: SemanticVersion = initial_version.parse()?;
    let Some(latest) = latest_known_version else {
        return Ok(initial_version.to_string());
    };

    let bumped = latest.parse::<SemanticVersion>()?.bump(release_type)?;
    if initial >= bumped {
        Ok(initial_version.to_string())
    } else {
        Ok(bumped.to_string())
    }
}

/// Version for each release after the first in a schedule.
pub fn next_scheduled_version(previous: &str, release_type: ReleaseType) -> VersionResult<String> {
    bump(previous, release_type)
}
