//! In-memory collaborators for rotation and worker pool tests

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::time::{sleep, Instant};

use super::{AddressProbe, IdentityRotator, RenewalChannel, RenewalConnector, RotationPolicy};
use crate::error::{ControlStage, Result, RotaError};
use crate::models::Identity;

/// In-memory backend: the visible address changes with every accepted
/// signal unless it is pinned.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub signals: SyncMutex<Vec<Instant>>,
    pub probe_times: SyncMutex<Vec<Instant>>,
    pub connects: AtomicUsize,
    pub probes: AtomicUsize,
    open_channels: AtomicUsize,
    pub max_open_channels: AtomicUsize,
    pub refuse_connect: AtomicBool,
    pub misconfigured: AtomicBool,
    pub reject_auth: AtomicU32,
    pub unavailable: AtomicU32,
    pub probe_failures: AtomicU32,
    pub pinned_address: SyncMutex<Option<Identity>>,
    pub settle: SyncMutex<Duration>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }

    fn address(&self) -> Identity {
        if let Some(pinned) = self.pinned_address.lock().clone() {
            return pinned;
        }
        Identity::new(format!("10.0.0.{}", self.signal_count()))
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub(crate) struct FakeConnector(pub Arc<FakeBackend>);

#[async_trait]
impl RenewalConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RenewalChannel>> {
        let backend = self.0.clone();
        backend.connects.fetch_add(1, Ordering::SeqCst);
        if backend.misconfigured.load(Ordering::SeqCst) {
            return Err(RotaError::InvalidConfig("control address is not usable".to_string()));
        }
        if backend.refuse_connect.load(Ordering::SeqCst) {
            return Err(RotaError::control(ControlStage::Connect, "connection refused"));
        }
        let open = backend.open_channels.fetch_add(1, Ordering::SeqCst) + 1;
        backend.max_open_channels.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeChannel { backend }))
    }
}

struct FakeChannel {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl RenewalChannel for FakeChannel {
    async fn authenticate(&mut self, _credential: &str) -> Result<()> {
        if FakeBackend::take(&self.backend.reject_auth) {
            return Err(RotaError::control(ControlStage::Authenticate, "515 bad password"));
        }
        Ok(())
    }

    async fn is_renewal_available(&mut self) -> Result<bool> {
        Ok(!FakeBackend::take(&self.backend.unavailable))
    }

    async fn signal_renewal(&mut self) -> Result<()> {
        // simulate a round trip so overlapping cycles would be observable
        sleep(Duration::from_millis(50)).await;
        self.backend.signals.lock().push(Instant::now());
        Ok(())
    }

    async fn minimum_wait(&mut self) -> Result<Duration> {
        Ok(*self.backend.settle.lock())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.backend.open_channels.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct FakeProbe(pub Arc<FakeBackend>);

#[async_trait]
impl AddressProbe for FakeProbe {
    async fn current_address(&self) -> Result<Identity> {
        self.0.probes.fetch_add(1, Ordering::SeqCst);
        self.0.probe_times.lock().push(Instant::now());
        if FakeBackend::take(&self.0.probe_failures) {
            return Err(RotaError::Probe("oracle unreachable".to_string()));
        }
        Ok(self.0.address())
    }
}

pub(crate) fn rotator_for(backend: &Arc<FakeBackend>, policy: RotationPolicy) -> IdentityRotator {
    IdentityRotator::new(
        Arc::new(FakeConnector(backend.clone())),
        Arc::new(FakeProbe(backend.clone())),
        "password",
        policy,
    )
}
