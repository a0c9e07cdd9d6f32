//! User agent handling for outbound requests

use rand::seq::SliceRandom;
use tracing::warn;

use crate::error::{Result, RotaError};

/// Used whenever the generator cannot produce a value
pub const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Real browser user agents.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Source of user agent strings
pub trait UserAgentSource: Send + Sync {
    fn random_user_agent(&self) -> Result<String>;
}

/// Picks uniformly from a fixed list of browser user agents
pub struct BrowserUserAgents {
    agents: Vec<String>,
}

impl BrowserUserAgents {
    pub fn new() -> Self {
        Self::with_agents(BROWSER_USER_AGENTS.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_agents(agents: Vec<String>) -> Self {
        Self { agents }
    }
}

impl Default for BrowserUserAgents {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAgentSource for BrowserUserAgents {
    fn random_user_agent(&self) -> Result<String> {
        self.agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| RotaError::InvalidConfig("user agent list is empty".to_string()))
    }
}

/// Get a user agent from `source`, falling back to a fixed value on failure
pub fn resolve_user_agent(source: &dyn UserAgentSource) -> String {
    match source.random_user_agent() {
        Ok(agent) => agent,
        Err(e) => {
            warn!("Error generating random User-Agent: {}", e);
            FALLBACK_USER_AGENT.to_string()
        }
    }
}
