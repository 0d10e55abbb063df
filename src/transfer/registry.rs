// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory registry of transfer states.
//!
//! The outer map lock is held only long enough to insert or look up an
//! entry. Each entry carries its own lock, so a transfer writing progress on
//! every chunk never blocks readers of other transfers. Exactly one
//! [`TransferHandle`] exists per entry; it is the only writer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;

use super::types::{TransferId, TransferState, TransferStatus};
use crate::locks::{resilient_read, resilient_write};

type Entry = Arc<RwLock<TransferState>>;

/// Process-lifetime store of transfer states. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: RwLock<HashMap<TransferId, Entry>>,
}

/// Per-status counts for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `pending` transfer for `url` and return its writer.
    pub fn register(&self, url: &str) -> TransferHandle {
        let id = TransferId::generate(url);
        let entry: Entry = Arc::new(RwLock::new(TransferState::new(url)));
        resilient_write(&self.entries).insert(id.clone(), Arc::clone(&entry));
        tracing::debug!("Registered transfer {} for {}", id, url);
        TransferHandle { id, entry }
    }

    /// Snapshot of one transfer.
    pub fn get(&self, id: &TransferId) -> Option<TransferState> {
        let entry = resilient_read(&self.entries).get(id).cloned()?;
        let state = resilient_read(&entry).clone();
        Some(state)
    }

    /// Snapshot of every transfer, completed ones included.
    pub fn get_all(&self) -> HashMap<TransferId, TransferState> {
        let entries: Vec<(TransferId, Entry)> = resilient_read(&self.entries)
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        entries
            .into_iter()
            .map(|(id, entry)| {
                let state = resilient_read(&entry).clone();
                (id, state)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for state in self.get_all().values() {
            match state.status {
                TransferStatus::Pending => counts.pending += 1,
                TransferStatus::Downloading | TransferStatus::Extracting => counts.active += 1,
                TransferStatus::Completed => counts.completed += 1,
                TransferStatus::Error => counts.failed += 1,
            }
        }
        counts
    }
}

/// Sole writer of one registry entry.
///
/// Not `Clone`: the transfer that owns the handle is the only code allowed
/// to mutate the state.
#[derive(Debug)]
pub struct TransferHandle {
    id: TransferId,
    entry: Entry,
}

impl TransferHandle {
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn snapshot(&self) -> TransferState {
        resilient_read(&self.entry).clone()
    }

    /// Apply `f` to the state.
    ///
    /// A status change that would move backwards or leave a terminal state
    /// is reverted and logged, as is any drop in percentage.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut TransferState),
    {
        let mut state = resilient_write(&self.entry);
        let previous_status = state.status;
        let previous_pct = state.percentage;
        f(&mut state);

        if !previous_status.can_transition_to(state.status) {
            tracing::warn!(
                "Transfer {}: refusing status change {} -> {}",
                self.id,
                previous_status,
                state.status
            );
            state.status = previous_status;
        }
        if state.percentage < previous_pct {
            state.percentage = previous_pct;
        }
        state.updated_at = Utc::now();
    }

    /// Record bytes received and return the resulting percentage.
    pub fn record_progress(&self, downloaded: u64, total: Option<u64>) -> u8 {
        let mut pct = 0;
        self.update(|s| {
            s.record_progress(downloaded, total);
            pct = s.percentage;
        });
        pct
    }

    pub fn set_status(&self, status: TransferStatus) {
        self.update(|s| s.status = status);
    }

    /// Mark the transfer finished at `path`.
    pub fn complete(&self, path: &std::path::Path) {
        self.update(|s| {
            s.status = TransferStatus::Completed;
            s.percentage = 100;
            if s.total_size.is_none() {
                s.total_size = Some(s.downloaded);
            }
            s.destination = Some(path.to_path_buf());
        });
    }

    /// Mark the transfer failed with `message`.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.status = TransferStatus::Error;
            s.error_message = Some(message);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::thread;

    #[test]
    fn test_register_and_get() {
        let registry = ProgressRegistry::new();
        assert!(registry.is_empty());

        let handle = registry.register("https://example.com/a.bin");
        let state = registry.get(handle.id()).unwrap();
        assert_eq!(state.status, TransferStatus::Pending);
        assert_eq!(state.url, "https://example.com/a.bin");
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&TransferId::from("missing")).is_none());
    }

    #[test]
    fn test_reads_see_latest_write() {
        let registry = ProgressRegistry::new();
        let handle = registry.register("u");
        handle.record_progress(30, Some(100));
        let state = registry.get(handle.id()).unwrap();
        assert_eq!(state.status, TransferStatus::Downloading);
        assert_eq!(state.percentage, 30);
    }

    #[test]
    fn test_reverse_transition_refused() {
        let registry = ProgressRegistry::new();
        let handle = registry.register("u");
        handle.complete(Path::new("/tmp/a.bin"));
        handle.set_status(TransferStatus::Downloading);
        handle.fail("late failure");

        let state = handle.snapshot();
        assert_eq!(state.status, TransferStatus::Completed);
        assert_eq!(state.percentage, 100);
    }

    #[test]
    fn test_percentage_never_decreases() {
        let registry = ProgressRegistry::new();
        let handle = registry.register("u");
        handle.record_progress(80, Some(100));
        handle.update(|s| s.percentage = 10);
        assert_eq!(handle.snapshot().percentage, 80);
    }

    #[test]
    fn test_completed_states_retained() {
        let registry = ProgressRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        a.complete(Path::new("/tmp/a"));
        b.fail("boom");

        let all = registry.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[a.id()].status, TransferStatus::Completed);
        assert_eq!(all[b.id()].error_message.as_deref(), Some("boom"));

        let counts = registry.status_counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_concurrent_readers_during_writes() {
        let registry = Arc::new(ProgressRegistry::new());
        let handle = registry.register("u");
        let id = handle.id().clone();

        let writer = thread::spawn(move || {
            for i in 1..=100u64 {
                handle.record_progress(i, Some(100));
            }
            handle.complete(Path::new("/tmp/u"));
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..200 {
                        let pct = registry.get(&id).unwrap().percentage;
                        assert!(pct >= last);
                        last = pct;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(registry.get(&id).unwrap().status, TransferStatus::Completed);
    }
}
