//! Telemetry output
//!
//! One JSON object per line, one line per finished work item.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::models::TelemetryRecord;

/// Destination for outcome records
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: &TelemetryRecord) -> Result<()>;
}

/// Appends records to a JSON-lines file
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesSink {
    async fn record(&self, record: &TelemetryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(request_id = record.request_id, status = %record.status, "Telemetry recorded");
        Ok(())
    }
}

/// Hands out request identifiers, starting at 1 and never reused
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutcomeStatus;
    use std::sync::Arc;
    use url::Url;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rota-nym-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends_one_object_per_line() {
        let path = temp_path("append");
        let _ = std::fs::remove_file(&path);
        let url = Url::parse("http://example.com/").unwrap();

        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.record(&TelemetryRecord::skipped(1, &url)).await.unwrap();
        sink.record(&TelemetryRecord::skipped(2, &url)).await.unwrap();
        drop(sink);

        // reopening appends instead of truncating
        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.record(&TelemetryRecord::skipped(3, &url)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                assert_eq!(value["status"], OutcomeStatus::Skipped.as_str());
                value["request_id"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_request_ids_are_unique_and_positive() {
        let ids = Arc::new(RequestIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();

        assert_eq!(all.first(), Some(&1));
        assert_eq!(all, (1..=400).collect::<Vec<_>>());
    }
}
