//! Recording doubles for progress and verification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use snapshots::{Block, ChainVerifier, LinkVerifier, ProgressSink, Round, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Start { label: String, total: u64 },
    End { label: String, current: u64, total: u64 },
}

/// Keeps start/end events and the update count per label
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    updates: Mutex<Vec<(String, u64)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<(String, u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::End {
                    label,
                    current,
                    total,
                } => Some((label, current, total)),
                _ => None,
            })
            .collect()
    }

    pub fn update_count(&self, label: &str) -> usize {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == label)
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn on_start(&self, label: &str, total: u64) {
        self.events.lock().unwrap().push(ProgressEvent::Start {
            label: label.to_string(),
            total,
        });
    }

    fn on_update(&self, label: &str, current: u64, _total: u64) {
        self.updates
            .lock()
            .unwrap()
            .push((label.to_string(), current));
    }

    fn on_end(&self, label: &str, current: u64, total: u64) {
        self.events.lock().unwrap().push(ProgressEvent::End {
            label: label.to_string(),
            current,
            total,
        });
    }
}

/// Delegates to [`LinkVerifier`], records every transaction it is shown and
/// optionally rejects the transaction at a given 1-based position
#[derive(Default)]
pub struct RecordingVerifier {
    reject_transaction_at: Option<u64>,
    transactions_seen: AtomicU64,
    transaction_ids: Mutex<Vec<String>>,
    block_heights: Mutex<Vec<u64>>,
}

impl RecordingVerifier {
    pub fn rejecting_transaction(position: u64) -> Self {
        Self {
            reject_transaction_at: Some(position),
            ..Self::default()
        }
    }

    pub fn transaction_ids(&self) -> Vec<String> {
        self.transaction_ids.lock().unwrap().clone()
    }

    pub fn block_heights(&self) -> Vec<u64> {
        self.block_heights.lock().unwrap().clone()
    }
}

impl ChainVerifier for RecordingVerifier {
    fn verify_block(&self, current: &Block, previous: Option<&Block>) -> Result<(), String> {
        self.block_heights.lock().unwrap().push(current.height);
        LinkVerifier.verify_block(current, previous)
    }

    fn verify_transaction(
        &self,
        current: &Transaction,
        previous: Option<&Transaction>,
    ) -> Result<(), String> {
        let position = self.transactions_seen.fetch_add(1, Ordering::SeqCst) + 1;
        self.transaction_ids
            .lock()
            .unwrap()
            .push(current.id.clone());

        if self.reject_transaction_at == Some(position) {
            return Err(format!("transaction {} is invalid", current.id));
        }
        LinkVerifier.verify_transaction(current, previous)
    }

    fn verify_round(&self, current: &Round, previous: Option<&Round>) -> Result<(), String> {
        LinkVerifier.verify_round(current, previous)
    }
}
