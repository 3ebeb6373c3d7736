//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Per route filter named lock registry."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::model::FilterKey;

/// Named locks keyed by route filter.
///
/// The remote API rejects concurrent writes to sibling rules of one filter, so every
/// write holds the filter's lock from submission until the operation is terminal.
/// Entries are created on demand and pruned once nobody holds or waits on them.
/// Waiters are served in FIFO order.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<FilterKey, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then take it.
    ///
    /// The lock is released when the returned guard is dropped, which covers error
    /// returns, panics and cancellation of the owning future alike.
    pub async fn acquire(&self, key: &FilterKey) -> FilterLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_default().clone()
        };
        trace!(group = %key.resource_group, route_filter = %key.route_filter, "waiting for route filter lock");
        let guard = Waiting {
            registry: self,
            key,
            pending: Some(Box::pin(lock.lock_owned())),
        }
        .await;
        trace!(group = %key.resource_group, route_filter = %key.route_filter, "route filter lock acquired");
        FilterLockGuard {
            registry: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Whether `key` is currently held.
    pub fn is_locked(&self, key: &FilterKey) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of filters with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &FilterKey) {
        let mut locks = self.locks.lock();
        // Clones are only taken under this map lock, so a count of one means the
        // map holds the last reference and nobody is waiting.
        if locks
            .get(key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false)
        {
            locks.remove(key);
        }
    }
}

/// A queued acquisition. Dropped before the lock is granted, it gives up its
/// reference and prunes the entry if that was the last one.
struct Waiting<'a, F> {
    registry: &'a LockRegistry,
    key: &'a FilterKey,
    pending: Option<Pin<Box<F>>>,
}

impl<F: Future<Output = OwnedMutexGuard<()>>> Future for Waiting<'_, F> {
    type Output = OwnedMutexGuard<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(pending) = self.pending.as_mut() else {
            return Poll::Pending;
        };
        let guard = ready!(pending.as_mut().poll(cx));
        self.pending = None;
        Poll::Ready(guard)
    }
}

impl<F> Drop for Waiting<'_, F> {
    fn drop(&mut self) {
        if self.pending.take().is_some() {
            self.registry.release(self.key);
        }
    }
}

/// Proof of holding a route filter lock.
#[derive(Debug)]
pub struct FilterLockGuard<'a> {
    registry: &'a LockRegistry,
    key: FilterKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FilterLockGuard<'_> {
    pub fn key(&self) -> &FilterKey {
        &self.key
    }
}

impl Drop for FilterLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry.release(&self.key);
        trace!(group = %self.key.resource_group, route_filter = %self.key.route_filter, "route filter lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(filter: &str) -> FilterKey {
        FilterKey::new("rg1", filter).unwrap()
    }

    #[tokio::test]
    async fn entries_are_pruned_after_release() {
        let registry = LockRegistry::new();
        {
            let guard = registry.acquire(&key("rf1")).await;
            assert_eq!(guard.key(), &key("rf1"));
            assert!(registry.is_locked(&key("rf1")));
            assert_eq!(registry.len(), 1);
        }
        assert!(!registry.is_locked(&key("rf1")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn distinct_filters_do_not_block_each_other() {
        let registry = LockRegistry::new();
        let first = registry.acquire(&key("rf1")).await;
        let second = tokio::time::timeout(Duration::from_millis(100), registry.acquire(&key("rf2")))
            .await
            .expect("a different filter must not wait");
        assert_eq!(registry.len(), 2);
        drop(first);
        drop(second);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_filter_is_mutually_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire(&key("rf1")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_the_entry() {
        let registry = LockRegistry::new();
        let held = registry.acquire(&key("rf1")).await;
        let waited =
            tokio::time::timeout(Duration::from_millis(20), registry.acquire(&key("rf1"))).await;
        assert!(waited.is_err());
        drop(held);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn waiter_cancelled_after_handover_does_not_leak_the_entry() {
        let registry = LockRegistry::new();
        let held = registry.acquire(&key("rf1")).await;
        let waiter_key = key("rf1");
        let mut waiter = Box::pin(registry.acquire(&waiter_key));
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        // The holder leaves while the waiter is still queued.
        drop(held);
        assert_eq!(registry.len(), 1);

        drop(waiter);
        assert!(registry.is_empty());
        let _again = tokio::time::timeout(Duration::from_millis(100), registry.acquire(&key("rf1")))
            .await
            .expect("lock must be free again");
    }
}
