//! Outbound traffic through the anonymity backend
//!
//! This module provides:
//! - SOCKS5 transport with optional TLS
//! - A connection-per-request HTTP client
//! - Identity rotation over the backend's control channel
//! - Browser user agents

pub mod client;
pub mod rotation;
pub mod transport;
pub mod user_agent;

pub use client::{HttpResponse, HttpSender, SocksHttpClient};
pub use rotation::{HttpAddressProbe, IdentityRotator, RotationPolicy, TorControlConnector};
pub use transport::ProxyTransport;
pub use user_agent::{BrowserUserAgents, UserAgentSource};
