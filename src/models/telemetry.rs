use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use super::Identity;

/// Terminal outcome of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
    Exception,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Exception => "exception",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome record written once per work item
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub request_id: u64,
    pub status: OutcomeStatus,
    pub url: String,
    pub user_agent: Option<String>,
    pub ip: Option<Identity>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    #[serde(serialize_with = "serialize_response_time")]
    pub response_time: Option<Duration>,
}

impl TelemetryRecord {
    /// Record for an item that never got a confirmed identity
    pub fn skipped(request_id: u64, url: &Url) -> Self {
        Self {
            request_id,
            status: OutcomeStatus::Skipped,
            url: url.to_string(),
            user_agent: None,
            ip: None,
            timestamp: Utc::now(),
            status_code: None,
            response_time: None,
        }
    }

    /// Record for an item whose request was attempted
    pub fn attempted(
        request_id: u64,
        status: OutcomeStatus,
        url: &Url,
        user_agent: impl Into<String>,
        ip: Identity,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            status,
            url: url.to_string(),
            user_agent: Some(user_agent.into()),
            ip: Some(ip),
            timestamp: started_at,
            status_code: None,
            response_time: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = Some(elapsed);
        self
    }
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format("%Y-%m-%d %H:%M:%S"))
}

// Seconds, two decimals
fn serialize_response_time<S: Serializer>(
    elapsed: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match elapsed {
        Some(d) => serializer.serialize_f64((d.as_secs_f64() * 100.0).round() / 100.0),
        None => serializer.serialize_none(),
    }
}
