//! Worker pool
//!
//! Drains a [`RequestQueue`] with a fixed number of tasks. Every item gets a
//! freshly confirmed identity from the shared [`IdentityRotator`] before its
//! request is sent, and every item ends in exactly one telemetry record.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::models::{Identity, OutcomeStatus, TelemetryRecord, WorkItem};
use crate::proxy::client::HttpSender;
use crate::proxy::rotation::IdentityRotator;
use crate::proxy::user_agent::{resolve_user_agent, UserAgentSource};
use crate::services::queue::RequestQueue;
use crate::services::telemetry::{RequestIdGenerator, TelemetrySink};

/// Per-status outcome counts of a pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub exception: usize,
}

impl PoolSummary {
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped + self.exception
    }

    fn count(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Exception => self.exception += 1,
        }
    }

    fn merge(mut self, other: PoolSummary) -> Self {
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.exception += other.exception;
        self
    }
}

/// Fixed-size pool of workers sharing one rotator
pub struct WorkerPool {
    config: WorkerConfig,
    rotator: Arc<IdentityRotator>,
    client: Arc<dyn HttpSender>,
    user_agents: Arc<dyn UserAgentSource>,
    sink: Arc<dyn TelemetrySink>,
    request_ids: RequestIdGenerator,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        rotator: Arc<IdentityRotator>,
        client: Arc<dyn HttpSender>,
        user_agents: Arc<dyn UserAgentSource>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            rotator,
            client,
            user_agents,
            sink,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Run until `queue` is drained
    ///
    /// Workers exit as soon as they find the queue empty; items are never
    /// added after the pool starts.
    pub async fn run(self: Arc<Self>, queue: Arc<RequestQueue>) -> PoolSummary {
        let worker_count = self.config.count.max(1);
        info!(workers = worker_count, items = queue.len(), "Starting worker pool");

        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                let queue = queue.clone();
                tokio::spawn(async move { pool.worker_loop(worker_id, queue).await })
            })
            .collect();

        let mut summary = PoolSummary::default();
        for result in join_all(handles).await {
            match result {
                Ok(worker_summary) => summary = summary.merge(worker_summary),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        info!(
            total = summary.total(),
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            exception = summary.exception,
            "Worker pool finished"
        );
        summary
    }

    #[instrument(skip(self, queue))]
    async fn worker_loop(&self, worker_id: usize, queue: Arc<RequestQueue>) -> PoolSummary {
        let mut summary = PoolSummary::default();
        let mut last_identity: Option<Identity> = None;

        while let Some(item) = queue.try_dequeue() {
            let status = self.process(item, &mut last_identity).await;
            summary.count(status);
        }

        debug!(processed = summary.total(), "Queue drained, worker exiting");
        summary
    }

    async fn process(&self, item: WorkItem, last_identity: &mut Option<Identity>) -> OutcomeStatus {
        let request_id = self.request_ids.next_id();
        let url = item.url;

        let identity = match self
            .rotator
            .acquire_fresh_identity(last_identity.as_ref())
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                warn!(request_id, error = %e, "No confirmed identity, skipping item");
                println!("[SKIPPED] {} (no confirmed identity)", url);
                self.emit(TelemetryRecord::skipped(request_id, &url)).await;
                return OutcomeStatus::Skipped;
            }
        };
        *last_identity = Some(identity.clone());

        let user_agent = resolve_user_agent(self.user_agents.as_ref());
        let started_at = Utc::now();
        let start = Instant::now();

        let result = self
            .client
            .get(&url, Some(&user_agent), self.config.request_timeout)
            .await;

        let (status, record) = match result {
            Ok(response) if response.status.is_success() => {
                println!("[SUCCESS] {} visited with IP: {}", url, identity);
                let record = TelemetryRecord::attempted(
                    request_id,
                    OutcomeStatus::Success,
                    &url,
                    user_agent,
                    identity,
                    started_at,
                )
                .with_status_code(response.status.as_u16())
                .with_response_time(response.elapsed);
                (OutcomeStatus::Success, record)
            }
            Ok(response) => {
                println!(
                    "[ERROR] Failed to visit {} (Status: {})",
                    url,
                    response.status.as_u16()
                );
                let record = TelemetryRecord::attempted(
                    request_id,
                    OutcomeStatus::Failed,
                    &url,
                    user_agent,
                    identity,
                    started_at,
                )
                .with_status_code(response.status.as_u16())
                .with_response_time(response.elapsed);
                (OutcomeStatus::Failed, record)
            }
            Err(e) => {
                println!("[EXCEPTION] {}: {}", url, e);
                let record = TelemetryRecord::attempted(
                    request_id,
                    OutcomeStatus::Exception,
                    &url,
                    user_agent,
                    identity,
                    started_at,
                )
                .with_response_time(start.elapsed());
                (OutcomeStatus::Exception, record)
            }
        };

        self.emit(record).await;
        status
    }

    async fn emit(&self, record: TelemetryRecord) {
        if let Err(e) = self.sink.record(&record).await {
            warn!(request_id = record.request_id, "Failed to write telemetry: {}", e);
        }
    }
}
