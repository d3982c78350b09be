// Durable Store Port (Interface)

use crate::domain::{NewRecord, StoredRecord};
use crate::error::Result;
use async_trait::async_trait;

/// Disk-backed FIFO log for one queue name
///
/// Records appended before a crash must be returned by `peek` on a later open of the
/// same name/data_dir, in append order. Consumption is destructive: the queue calls
/// `consume` once a record has been handed to its in-memory buffer.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Append a record at the tail
    async fn append(&self, record: &NewRecord) -> Result<()>;

    /// Append records at the tail atomically, preserving their order
    async fn append_all(&self, records: &[NewRecord]) -> Result<()>;

    /// Insert records ahead of the current head atomically, preserving their order
    async fn prepend_all(&self, records: &[NewRecord]) -> Result<()>;

    /// Oldest records first, at most `limit`
    async fn peek(&self, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Remove a record that has been handed off
    async fn consume(&self, seq: i64) -> Result<()>;

    /// Move an unreadable record out of the FIFO so it stops blocking the head
    async fn quarantine(&self, seq: i64, reason: &str) -> Result<()>;

    /// Number of pending records
    async fn len(&self) -> Result<u64>;

    /// Release the underlying handle; later calls fail
    async fn close(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryState {
        records: VecDeque<StoredRecord>,
        next_seq: i64,
        dead_letters: Vec<(StoredRecord, String)>,
        append_calls: usize,
    }

    /// In-memory durable store
    ///
    /// Clones share the same records, so a "reopened" store (see [`MemoryStore::reopen`])
    /// sees everything the previous instance left behind.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        state: Arc<Mutex<MemoryState>>,
        closed: Arc<AtomicBool>,
        fail_appends: Arc<AtomicBool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Same records, fresh handle (as after a process restart)
        pub fn reopen(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                closed: Arc::new(AtomicBool::new(false)),
                fail_appends: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Make every append fail with a storage error
        pub fn set_fail_appends(&self, fail: bool) {
            self.fail_appends.store(fail, Ordering::SeqCst);
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn payloads(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.records.iter().map(|r| r.payload.clone()).collect()
        }

        pub fn dead_letter_count(&self) -> usize {
            self.state.lock().unwrap().dead_letters.len()
        }

        pub fn append_calls(&self) -> usize {
            self.state.lock().unwrap().append_calls
        }

        /// Write a raw record, bypassing the codec
        pub fn insert_raw(&self, type_tag: &str, payload: &str) {
            let mut state = self.state.lock().unwrap();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.records.push_back(StoredRecord {
                seq,
                type_tag: type_tag.to_string(),
                payload: payload.to_string(),
                enqueued_at: 0,
            });
        }

        fn check_open(&self) -> Result<()> {
            if self.is_closed() {
                return Err(AppError::Storage("store is closed".to_string()));
            }
            Ok(())
        }

        fn check_writable(&self) -> Result<()> {
            self.check_open()?;
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(AppError::Storage("disk full (mock)".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableStore for MemoryStore {
        async fn append(&self, record: &NewRecord) -> Result<()> {
            self.append_all(std::slice::from_ref(record)).await
        }

        async fn append_all(&self, records: &[NewRecord]) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.append_calls += 1;
            self.check_writable()?;
            for record in records {
                state.next_seq += 1;
                let seq = state.next_seq;
                state.records.push_back(StoredRecord {
                    seq,
                    type_tag: record.type_tag.clone(),
                    payload: record.payload.clone(),
                    enqueued_at: record.enqueued_at,
                });
            }
            Ok(())
        }

        async fn prepend_all(&self, records: &[NewRecord]) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.append_calls += 1;
            self.check_writable()?;
            let head = state.records.front().map(|r| r.seq).unwrap_or(state.next_seq + 1);
            let first = head - records.len() as i64;
            for (offset, record) in records.iter().enumerate().rev() {
                state.records.push_front(StoredRecord {
                    seq: first + offset as i64,
                    type_tag: record.type_tag.clone(),
                    payload: record.payload.clone(),
                    enqueued_at: record.enqueued_at,
                });
            }
            Ok(())
        }

        async fn peek(&self, limit: usize) -> Result<Vec<StoredRecord>> {
            self.check_open()?;
            let state = self.state.lock().unwrap();
            Ok(state.records.iter().take(limit).cloned().collect())
        }

        async fn consume(&self, seq: i64) -> Result<()> {
            self.check_open()?;
            let mut state = self.state.lock().unwrap();
            state.records.retain(|r| r.seq != seq);
            Ok(())
        }

        async fn quarantine(&self, seq: i64, reason: &str) -> Result<()> {
            self.check_open()?;
            let mut state = self.state.lock().unwrap();
            if let Some(pos) = state.records.iter().position(|r| r.seq == seq) {
                if let Some(record) = state.records.remove(pos) {
                    state.dead_letters.push((record, reason.to_string()));
                }
            }
            Ok(())
        }

        async fn len(&self) -> Result<u64> {
            self.check_open()?;
            Ok(self.state.lock().unwrap().records.len() as u64)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn record(payload: &str) -> NewRecord {
            NewRecord {
                type_tag: "test".to_string(),
                payload: payload.to_string(),
                enqueued_at: 0,
            }
        }

        #[tokio::test]
        async fn test_prepend_keeps_order_ahead_of_head() {
            let store = MemoryStore::new();
            store.append(&record("C")).await.unwrap();
            store
                .prepend_all(&[record("A"), record("B")])
                .await
                .unwrap();

            let seqs: Vec<i64> = store.peek(10).await.unwrap().iter().map(|r| r.seq).collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(store.payloads(), vec!["A", "B", "C"]);
        }

        #[tokio::test]
        async fn test_reopen_shares_records() {
            let store = MemoryStore::new();
            store.append(&record("A")).await.unwrap();
            store.close().await;
            assert!(store.len().await.is_err());

            let reopened = store.reopen();
            assert_eq!(reopened.len().await.unwrap(), 1);
        }
    }
}
