//! Sequence counter allocation.
//!
//! An allocator performs one optimistic attempt: read the row for a key,
//! then conditionally add `count` when the version it witnessed is still
//! current. A lost race surfaces as [`SequenceError::UpdateConflict`];
//! [`SequenceStore`] owns the bounded backoff loop around it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tms_core::sequence::SequenceKind;
use tms_core::{Pulid, SequenceError, TmsError, TmsResult};
use tokio::sync::Mutex;

/// Counter key. A nil business unit is its own key, distinct from every
/// concrete business unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub kind: SequenceKind,
    pub organization_id: Pulid,
    pub business_unit_id: Pulid,
    pub year: i16,
    pub month: i16,
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bu = if self.business_unit_id.is_nil() {
            "-"
        } else {
            self.business_unit_id.as_str()
        };
        write!(
            f,
            "{}/{}/{}/{:04}-{:02}",
            self.kind, self.organization_id, bu, self.year, self.month
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRequest {
    pub kind: SequenceKind,
    pub organization_id: Pulid,
    pub business_unit_id: Pulid,
    pub year: i16,
    pub month: i16,
    pub count: i64,
}

impl SequenceRequest {
    pub fn key(&self) -> SequenceKey {
        SequenceKey {
            kind: self.kind,
            organization_id: self.organization_id.clone(),
            business_unit_id: self.business_unit_id.clone(),
            year: self.year,
            month: self.month,
        }
    }
}

/// One optimistic allocation attempt.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Reserve `count` consecutive counters and return the first.
    ///
    /// Creates the row at zero when the key has never been used. Returns
    /// `SequenceError::UpdateConflict` when the conditional update matched
    /// no rows; the counter is not advanced in that case.
    async fn try_allocate(&self, key: &SequenceKey, count: i64) -> TmsResult<i64>;
}

// ============================================================================
// RETRY LOOP
// ============================================================================

/// Exponential backoff for allocation conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Sequence counters with conflict retries.
#[derive(Clone)]
pub struct SequenceStore {
    allocator: Arc<dyn SequenceAllocator>,
    policy: RetryPolicy,
}

impl SequenceStore {
    pub fn new(allocator: Arc<dyn SequenceAllocator>, policy: RetryPolicy) -> Self {
        Self { allocator, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Next counter for the request's key. `count` is ignored.
    pub async fn next(&self, req: &SequenceRequest) -> TmsResult<i64> {
        self.allocate(&req.key(), 1).await
    }

    /// `count` consecutive counters; empty when `count <= 0`.
    pub async fn next_batch(&self, req: &SequenceRequest) -> TmsResult<Vec<i64>> {
        if req.count <= 0 {
            return Ok(Vec::new());
        }
        let first = self.allocate(&req.key(), req.count).await?;
        Ok((first..first + req.count).collect())
    }

    async fn allocate(&self, key: &SequenceKey, count: i64) -> TmsResult<i64> {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.allocator.try_allocate(key, count).await {
                Ok(first) => return Ok(first),
                Err(err) if is_conflict(&err) => {
                    tracing::debug!(key = %key, attempt, "sequence update conflict");
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::warn!(key = %key, attempts, "sequence allocation exhausted retries");
        Err(SequenceError::MaxRetriesExceeded { attempts }.into())
    }
}

fn is_conflict(err: &TmsError) -> bool {
    matches!(
        err.root(),
        TmsError::Sequence(SequenceError::UpdateConflict { .. })
    )
}

// ============================================================================
// IN-MEMORY ALLOCATOR
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct CounterRow {
    current: i64,
    version: i64,
}

/// Allocator backed by a process-local map.
///
/// `inject_conflicts(n)` makes the next `n` attempts fail with a conflict
/// without touching the row, which is how a lost optimistic race looks.
#[derive(Debug, Default)]
pub struct InMemorySequenceAllocator {
    rows: Mutex<HashMap<SequenceKey, CounterRow>>,
    pending_conflicts: AtomicU32,
    attempts: AtomicU32,
}

impl InMemorySequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Attempts made so far, including conflicted ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Current counter for a key, if the row exists.
    pub async fn current(&self, key: &SequenceKey) -> Option<i64> {
        self.rows.lock().await.get(key).map(|row| row.current)
    }

    /// Successful updates applied to a key's row.
    pub async fn version(&self, key: &SequenceKey) -> Option<i64> {
        self.rows.lock().await.get(key).map(|row| row.version)
    }
}

#[async_trait]
impl SequenceAllocator for InMemorySequenceAllocator {
    async fn try_allocate(&self, key: &SequenceKey, count: i64) -> TmsResult<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let conflicted = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(SequenceError::UpdateConflict {
                key: key.to_string(),
            }
            .into());
        }

        let mut rows = self.rows.lock().await;
        let row = rows.entry(key.clone()).or_default();
        let next = row.current + 1;
        row.current += count;
        row.version += 1;
        Ok(next)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn request(count: i64) -> SequenceRequest {
        SequenceRequest {
            kind: SequenceKind::ProNumber,
            organization_id: Pulid::from_uuid("org", uuid::Uuid::from_u128(1)),
            business_unit_id: Pulid::nil(),
            year: 2024,
            month: 12,
            count,
        }
    }

    fn store(allocator: Arc<InMemorySequenceAllocator>) -> SequenceStore {
        SequenceStore::new(
            allocator,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_next_is_contiguous() {
        let store = store(Arc::new(InMemorySequenceAllocator::new()));
        let req = request(1);
        assert_eq!(store.next(&req).await.unwrap(), 1);
        assert_eq!(store.next(&req).await.unwrap(), 2);
        assert_eq!(store.next_batch(&request(3)).await.unwrap(), vec![3, 4, 5]);
        assert_eq!(store.next(&req).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_version_counts_updates() {
        let allocator = Arc::new(InMemorySequenceAllocator::new());
        let store = store(allocator.clone());
        store.next(&request(1)).await.unwrap();
        store.next_batch(&request(4)).await.unwrap();
        assert_eq!(allocator.current(&request(1).key()).await, Some(5));
        assert_eq!(allocator.version(&request(1).key()).await, Some(2));
    }

    #[tokio::test]
    async fn test_batch_of_zero_is_empty_without_attempt() {
        let allocator = Arc::new(InMemorySequenceAllocator::new());
        let store = store(allocator.clone());
        assert!(store.next_batch(&request(0)).await.unwrap().is_empty());
        assert!(store.next_batch(&request(-4)).await.unwrap().is_empty());
        assert_eq!(allocator.attempts(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = store(Arc::new(InMemorySequenceAllocator::new()));
        let december = request(1);
        let mut january = request(1);
        january.year = 2025;
        january.month = 1;
        let mut with_bu = request(1);
        with_bu.business_unit_id = Pulid::from_uuid("bu", uuid::Uuid::from_u128(9));

        assert_eq!(store.next(&december).await.unwrap(), 1);
        assert_eq!(store.next(&december).await.unwrap(), 2);
        assert_eq!(store.next(&january).await.unwrap(), 1);
        assert_eq!(store.next(&with_bu).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let allocator = Arc::new(InMemorySequenceAllocator::new());
        let store = store(allocator.clone());
        allocator.inject_conflicts(2);

        assert_eq!(store.next(&request(1)).await.unwrap(), 1);
        assert_eq!(allocator.attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_do_not_advance_counter() {
        let allocator = Arc::new(InMemorySequenceAllocator::new());
        let store = store(allocator.clone());
        allocator.inject_conflicts(3);

        let err = store.next(&request(1)).await.unwrap_err();
        assert!(matches!(
            err,
            TmsError::Sequence(SequenceError::MaxRetriesExceeded { attempts: 3 })
        ));
        assert_eq!(allocator.current(&request(1).key()).await, None);
        assert_eq!(store.next(&request(1)).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_are_disjoint() {
        let store = store(Arc::new(InMemorySequenceAllocator::new()));

        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                async move { store.next_batch(&request(5)).await }
            },
            {
                let store = store.clone();
                async move { store.next_batch(&request(5)).await }
            }
        );

        let all: HashSet<i64> = a.unwrap().into_iter().chain(b.unwrap()).collect();
        assert_eq!(all.len(), 10);
        assert_eq!(all, (1..=10).collect());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_next_never_repeats() {
        let store = store(Arc::new(InMemorySequenceAllocator::new()));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.next(&request(1)).await }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let n = handle.await.unwrap().unwrap();
            assert!(seen.insert(n), "duplicate counter {}", n);
        }
        assert_eq!(seen.len(), 50);
    }
}
