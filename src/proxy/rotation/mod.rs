//! Identity rotation
//!
//! This module couples the anonymity backend's control channel with an
//! address-echo oracle so that workers only ever proceed with an identity that
//! was observed to change after a renewal.

mod control;
mod probe;
mod rotator;
#[cfg(test)]
pub(crate) mod testing;

pub use control::{TorControlChannel, TorControlConnector, NEWNYM_RATE_LIMIT};
pub use probe::HttpAddressProbe;
pub use rotator::{IdentityRotator, RotationPolicy};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Identity;

/// Opens control channel sessions to the anonymity backend
///
/// Every call must return a new connection; sessions are never reused across
/// renewal attempts.
#[async_trait]
pub trait RenewalConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RenewalChannel>>;
}

/// Authenticated control session that can request a new circuit
#[async_trait]
pub trait RenewalChannel: Send {
    /// Authenticate with `credential`; an empty credential means no password
    async fn authenticate(&mut self, credential: &str) -> Result<()>;

    /// Whether the backend will accept a renewal signal right now
    async fn is_renewal_available(&mut self) -> Result<bool>;

    /// Request a new identity
    async fn signal_renewal(&mut self) -> Result<()>;

    /// How long the backend wants the caller to wait before the next renewal
    async fn minimum_wait(&mut self) -> Result<Duration>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Reports the identity currently visible to the outside world
#[async_trait]
pub trait AddressProbe: Send + Sync {
    async fn current_address(&self) -> Result<Identity>;
}
