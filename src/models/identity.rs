use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use url::Url;

/// Externally-visible network address attributed to outbound traffic
///
/// Compared by equality only. An identity that has not been observed yet is
/// represented as `None` wherever an `Option<Identity>` is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One acquisition attempt against the rotator
#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub previous: Option<Identity>,
    pub sequence: u64,
    pub deadline: Instant,
}

impl RotationRequest {
    pub fn new(previous: Option<Identity>, sequence: u64, deadline: Instant) -> Self {
        Self {
            previous,
            sequence,
            deadline,
        }
    }

    /// Whether `observed` counts as a change from the caller's last identity
    pub fn is_fresh(&self, observed: &Identity) -> bool {
        self.previous.as_ref() != Some(observed)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn previous_display(&self) -> &str {
        self.previous
            .as_ref()
            .map(Identity::as_str)
            .unwrap_or("unknown")
    }
}

/// Unit of outbound work, consumed by exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub url: Url,
}

impl WorkItem {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}
