//! Serialized renew-and-confirm coordinator
//!
//! Only one renewal cycle runs at a time across all workers. A cycle holds the
//! rotation lock from the first control connection until the new identity is
//! confirmed (or the attempt budget is spent), so concurrent callers queue on
//! the lock instead of signalling the backend on their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::{AddressProbe, RenewalChannel, RenewalConnector};
use crate::config::RotationConfig;
use crate::error::{ControlStage, ErrorCategory, Result, RotaError};
use crate::models::{Identity, RotationRequest};

/// Budget and pacing of one acquisition
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Outer renewal attempts
    pub max_attempts: u32,
    /// Minimum time between two accepted renewals
    pub min_interval: Duration,
    /// Wait after a failed control attempt
    pub retry_backoff: Duration,
    /// No new attempt starts after this much time
    pub deadline: Duration,
    /// Probes per outer attempt
    pub confirm_attempts: u32,
    /// Wait between probes
    pub confirm_backoff: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(5),
            deadline: Duration::from_secs(180),
            confirm_attempts: 3,
            confirm_backoff: Duration::from_secs(2),
        }
    }
}

impl From<&RotationConfig> for RotationPolicy {
    fn from(config: &RotationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_interval: config.min_interval,
            retry_backoff: config.retry_backoff,
            deadline: config.deadline,
            confirm_attempts: config.confirm_attempts.max(1),
            confirm_backoff: config.confirm_backoff,
        }
    }
}

#[derive(Debug, Default)]
struct RotationState {
    /// Set only when the backend accepted a signal
    last_renewal: Option<Instant>,
    confirmed: Option<Identity>,
}

enum RenewalOutcome {
    Accepted { settle: Duration },
    Deferred { wait: Duration },
}

/// Hands out confirmed fresh identities to concurrent workers
pub struct IdentityRotator {
    connector: Arc<dyn RenewalConnector>,
    probe: Arc<dyn AddressProbe>,
    credential: String,
    policy: RotationPolicy,
    state: Mutex<RotationState>,
    sequence: AtomicU64,
}

impl IdentityRotator {
    pub fn new(
        connector: Arc<dyn RenewalConnector>,
        probe: Arc<dyn AddressProbe>,
        credential: impl Into<String>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            connector,
            probe,
            credential: credential.into(),
            policy,
            state: Mutex::new(RotationState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Identity confirmed by the most recent successful cycle
    pub async fn current_identity(&self) -> Option<Identity> {
        self.state.lock().await.confirmed.clone()
    }

    /// When the backend last accepted a renewal signal
    pub async fn last_renewal(&self) -> Option<Instant> {
        self.state.lock().await.last_renewal
    }

    /// Renew the circuit and confirm that the visible address changed
    ///
    /// Returns an identity different from `previous`, or
    /// [`RotaError::RotationExhausted`] once the attempt budget or the deadline
    /// is spent. The deadline runs from the call, so time spent queued on the
    /// rotation lock counts against it. Errors that are not retryable end the
    /// acquisition at once. Callers treat any error as "skip this work item".
    #[instrument(skip(self, previous), fields(previous = previous.map(Identity::as_str).unwrap_or("unknown")))]
    pub async fn acquire_fresh_identity(&self, previous: Option<&Identity>) -> Result<Identity> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let request = RotationRequest::new(
            previous.cloned(),
            sequence,
            Instant::now() + self.policy.deadline,
        );

        let mut state = self.state.lock().await;
        debug!(sequence, "Rotation lock acquired");

        let max_attempts = self.policy.max_attempts;
        let mut attempts = 0;

        while attempts < max_attempts {
            if request.is_expired() {
                warn!(sequence, attempts, "Rotation deadline passed");
                break;
            }
            attempts += 1;
            let has_next = attempts < max_attempts;

            let outcome = timeout_at(request.deadline, self.renew(&mut state))
                .await
                .unwrap_or_else(|_| {
                    Err(RotaError::control(
                        ControlStage::Protocol,
                        "renewal did not finish before the deadline",
                    ))
                });

            match outcome {
                Ok(RenewalOutcome::Accepted { settle }) => {
                    sleep(settle).await;

                    if let Some(identity) = self.confirm(&request).await {
                        info!(
                            sequence,
                            previous = request.previous_display(),
                            "Successfully changed IP to: {}",
                            identity
                        );
                        state.confirmed = Some(identity.clone());
                        return Ok(identity);
                    }

                    warn!(
                        "Address unchanged after renewal (attempt {}/{})",
                        attempts, max_attempts
                    );
                    if has_next && !request.is_expired() {
                        sleep(self.policy.confirm_backoff).await;
                    }
                }
                Ok(RenewalOutcome::Deferred { wait }) => {
                    warn!(
                        "Waiting {} seconds for new circuit to become available",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                Err(e) if !e.is_retryable() => {
                    error!(sequence, category = ?e.category(), "Identity renewal aborted: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    match e.category() {
                        ErrorCategory::ControlChannel => error!(
                            "Identity renewal failed (attempt {}/{}): {}",
                            attempts, max_attempts, e
                        ),
                        _ => warn!(
                            "Identity renewal failed (attempt {}/{}): {}",
                            attempts, max_attempts, e
                        ),
                    }
                    if has_next && !request.is_expired() {
                        sleep(self.policy.retry_backoff).await;
                    }
                }
            }
        }

        warn!(sequence, "Failed to get new IP after {} attempts", attempts);
        Err(RotaError::RotationExhausted { attempts })
    }

    /// One outer attempt on a fresh control connection
    async fn renew(&self, state: &mut RotationState) -> Result<RenewalOutcome> {
        let mut channel = self.connector.connect().await?;
        let outcome = self.signal_on(channel.as_mut(), state).await;

        if let Err(e) = channel.close().await {
            debug!("Failed to close control channel: {}", e);
        }
        outcome
    }

    async fn signal_on(
        &self,
        channel: &mut dyn RenewalChannel,
        state: &mut RotationState,
    ) -> Result<RenewalOutcome> {
        channel.authenticate(&self.credential).await?;

        if let Some(last) = state.last_renewal {
            let elapsed = last.elapsed();
            if elapsed < self.policy.min_interval {
                let remaining = self.policy.min_interval - elapsed;
                debug!("Last renewal {:?} ago, waiting {:?}", elapsed, remaining);
                sleep(remaining).await;
            }
        }

        if !channel.is_renewal_available().await? {
            let wait = channel.minimum_wait().await?;
            return Ok(RenewalOutcome::Deferred { wait });
        }

        channel.signal_renewal().await?;
        state.last_renewal = Some(Instant::now());

        let settle = match channel.minimum_wait().await {
            Ok(wait) => wait,
            Err(e) => {
                warn!("Backend did not report a settle interval: {}", e);
                self.policy.min_interval
            }
        };
        debug!("Renewal accepted, settling for {:?}", settle);

        Ok(RenewalOutcome::Accepted { settle })
    }

    async fn confirm(&self, request: &RotationRequest) -> Option<Identity> {
        let attempts = self.policy.confirm_attempts;

        for attempt in 1..=attempts {
            match self.probe.current_address().await {
                Ok(identity) if request.is_fresh(&identity) => return Some(identity),
                Ok(identity) => warn!(
                    "IP hasn't changed (attempt {}/{}): {}",
                    attempt, attempts, identity
                ),
                Err(e) => warn!(
                    "Error verifying IP change (attempt {}/{}): {}",
                    attempt, attempts, e
                ),
            }

            if attempt < attempts {
                sleep(self.policy.confirm_backoff).await;
            }
        }

        None
    }
}
