//! Rota Nym - Identity-rotating traffic generator
//!
//! Sends HTTP requests through a Tor SOCKS proxy from a pool of concurrent
//! workers, renewing the circuit before every request.
//!
//! ## Features
//!
//! - Serialized, rate-limited NEWNYM renewals over the Tor control port
//! - Confirmation of every renewal against an address-echo service
//! - Fixed-size worker pool draining a shared request queue
//! - JSON-lines telemetry for every request outcome

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

pub use config::Config;
pub use error::{Result, RotaError};
