//! Progress tracking for table jobs
//!
//! Each table job registers a label with its expected record count, bumps the
//! counter once per record and finalizes it when the table is done. Counters
//! are isolated per label, so the three tables of a dump or verify can report
//! concurrently without mixing counts.
//!
//! # Usage
//!
//! ```ignore
//! let task = reporter.start("blocks", meta.blocks.count).await;
//! for block in blocks {
//!     task.update().await;
//! }
//! task.end().await;
//! ```
//!
//! Rendering is delegated to a [`ProgressSink`]; [`TracingProgressSink`] logs
//! through `tracing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::constants::progress::LOG_INTERVAL;

/// Receives progress events; rendering is up to the implementation
pub trait ProgressSink: Send + Sync {
    fn on_start(&self, label: &str, total: u64);
    fn on_update(&self, label: &str, current: u64, total: u64);
    fn on_end(&self, label: &str, current: u64, total: u64);
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressCounter {
    pub label: String,
    pub current: u64,
    pub total: u64,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    counters: Arc<RwLock<HashMap<String, ProgressCounter>>>, // label -> counter
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            counters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reset the counter for `label` and begin tracking it
    pub async fn start(&self, label: &str, total: u64) -> ProgressTask {
        let counter = ProgressCounter {
            label: label.to_string(),
            current: 0,
            total,
            started_at: Utc::now(),
            finished: false,
        };

        self.counters.write().await.insert(label.to_string(), counter);
        self.sink.on_start(label, total);

        ProgressTask {
            reporter: self.clone(),
            label: label.to_string(),
        }
    }

    /// Current state of a label, if it was ever started
    pub async fn status(&self, label: &str) -> Option<ProgressCounter> {
        self.counters.read().await.get(label).cloned()
    }

    /// Labels that were started and not yet finished
    pub async fn active_labels(&self) -> Vec<String> {
        let counters = self.counters.read().await;
        let mut labels: Vec<String> = counters
            .values()
            .filter(|counter| !counter.finished)
            .map(|counter| counter.label.clone())
            .collect();
        labels.sort();
        labels
    }

    async fn increment(&self, label: &str) {
        let mut counters = self.counters.write().await;
        match counters.get_mut(label) {
            Some(counter) => {
                counter.current += 1;
                self.sink.on_update(label, counter.current, counter.total);
            }
            None => warn!("Progress update for unknown label '{}'", label),
        }
    }

    async fn finish(&self, label: &str) {
        let mut counters = self.counters.write().await;
        if let Some(counter) = counters.get_mut(label) {
            counter.finished = true;
            self.sink.on_end(label, counter.current, counter.total);
        }
    }
}

impl Clone for ProgressReporter {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingProgressSink))
    }
}

/// Handle for one started label
pub struct ProgressTask {
    reporter: ProgressReporter,
    label: String,
}

impl ProgressTask {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Count one record. Also yields to the scheduler so tight loops over
    /// already-buffered records let sibling table jobs make progress.
    pub async fn update(&self) {
        self.reporter.increment(&self.label).await;
        tokio::task::consume_budget().await;
    }

    pub async fn end(self) {
        self.reporter.finish(&self.label).await;
    }
}

/// Logs progress through `tracing`, one line every [`LOG_INTERVAL`] records
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_start(&self, label: &str, total: u64) {
        info!("Processing {} ({} records)", label, total);
    }

    fn on_update(&self, label: &str, current: u64, total: u64) {
        if current % LOG_INTERVAL == 0 {
            info!("{}: {}/{} records", label, current, total);
        }
    }

    fn on_end(&self, label: &str, current: u64, total: u64) {
        if current == total {
            info!("✓ {} done ({} records)", label, current);
        } else {
            warn!(
                "{} finished with {} records, expected {}",
                label, current, total
            );
        }
    }
}
