// GitHub Releases API Client
//
// Resolves the newest stable or pre-release version of a repository from the
// release-listing endpoint. Only the first page is consulted.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Which side of the pre-release flag a lookup wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseChannel {
    Stable,
    PreRelease,
}

impl ReleaseChannel {
    pub fn from_prerelease(want_prerelease: bool) -> Self {
        if want_prerelease {
            ReleaseChannel::PreRelease
        } else {
            ReleaseChannel::Stable
        }
    }

    fn matches(&self, release: &GitHubRelease) -> bool {
        release.prerelease == (*self == ReleaseChannel::PreRelease)
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseChannel::Stable => f.write_str("stable releases"),
            ReleaseChannel::PreRelease => f.write_str("pre-releases"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("no releases found for {owner}/{name}")]
    NoReleases { owner: String, name: String },

    #[error("no {channel} available for {owner}/{name}")]
    NoMatchingReleases {
        owner: String,
        name: String,
        channel: ReleaseChannel,
    },

    #[error("error retrieving releases for {owner}/{name}: {source}")]
    Transport {
        owner: String,
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("release index for {owner}/{name} returned {status}")]
    Status {
        owner: String,
        name: String,
        status: StatusCode,
    },

    #[error("failed to parse release index for {owner}/{name}: {source}")]
    Parse {
        owner: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("release lookup for {owner}/{name} was canceled")]
    Canceled { owner: String, name: String },
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReleaseError::Canceled { .. } => ErrorKind::Canceled,
            _ => ErrorKind::Remote,
        }
    }
}

/// GitHub release information, reduced to the fields the installer reads
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
}

impl GitHubRelease {
    /// Get version from tag name (strip 'v' prefix)
    pub fn version(&self) -> &str {
        strip_version_prefix(&self.tag_name)
    }
}

pub fn strip_version_prefix(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Newest published release on the requested channel.
///
/// Releases without a publication timestamp are ignored; the channel match is
/// exact, so asking for pre-releases never yields a stable release.
pub fn select_latest(releases: &[GitHubRelease], channel: ReleaseChannel) -> Option<&GitHubRelease> {
    releases
        .iter()
        .filter(|r| r.published_at.is_some())
        .filter(|r| channel.matches(r))
        .max_by_key(|r| r.published_at)
}

/// GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    user_agent: String,
}

impl GitHubClient {
    /// Create new GitHub client against the public API
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_api_base(DEFAULT_API_BASE, timeout, default_user_agent())
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
        })
    }

    /// Get all releases on the first page (including prereleases)
    pub async fn get_releases(&self, owner: &str, name: &str) -> Result<Vec<GitHubRelease>, ReleaseError> {
        let url = format!("{}/repos/{}/{}/releases", self.api_base, owner, name);
        debug!("Fetching release index: {}", url);

        let transport = |source| ReleaseError::Transport {
            owner: owner.to_string(),
            name: name.to_string(),
            source,
        };

        let response = self
            .http
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(ReleaseError::Status {
                owner: owner.to_string(),
                name: name.to_string(),
                status: response.status(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| ReleaseError::Parse {
            owner: owner.to_string(),
            name: name.to_string(),
            source,
        })
    }

    /// Resolve the newest version on the requested channel, `v` prefix stripped.
    pub async fn latest_release(
        &self,
        owner: &str,
        name: &str,
        want_prerelease: bool,
        cancel: &CancellationToken,
    ) -> Result<String, ReleaseError> {
        let releases = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ReleaseError::Canceled {
                    owner: owner.to_string(),
                    name: name.to_string(),
                });
            }
            releases = self.get_releases(owner, name) => releases?,
        };

        if releases.is_empty() {
            return Err(ReleaseError::NoReleases {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        let channel = ReleaseChannel::from_prerelease(want_prerelease);
        let latest = select_latest(&releases, channel).ok_or_else(|| {
            ReleaseError::NoMatchingReleases {
                owner: owner.to_string(),
                name: name.to_string(),
                channel,
            }
        })?;

        let version = latest.version().to_string();
        info!(owner, name, %version, "Resolved latest release");
        Ok(version)
    }
}

fn default_user_agent() -> String {
    format!("sbx/{}", env!("CARGO_PKG_VERSION"))
}
