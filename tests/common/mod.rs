//! Common test utilities for controller integration tests
//!
//! In-memory caches and scripted sync handlers standing in for the watch layer
//! and the reconciliation logic.

#![allow(dead_code)]

use async_trait::async_trait;
use clusterissuer_controller::controller::queue::ItemExponentialRateLimiter;
use clusterissuer_controller::controller::{
    CacheError, CacheSynced, ObjectCache, ObjectKey, SyncError, SyncHandler, WorkQueue,
};
use kube::Resource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Work queue with a 5ms..1s per-key backoff
pub fn test_queue(name: &str) -> WorkQueue {
    WorkQueue::new(
        name,
        ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1)),
    )
}

/// Map-backed cache with a controllable sync flag
pub struct FakeCache<K> {
    objects: Mutex<HashMap<ObjectKey, Arc<K>>>,
    synced: AtomicBool,
}

impl<K: Resource> FakeCache<K> {
    pub fn new(synced: bool) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            synced: AtomicBool::new(synced),
        }
    }

    pub fn insert(&self, obj: K) -> ObjectKey {
        let key = ObjectKey::for_resource(&obj).expect("test object has a name");
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), Arc::new(obj));
        key
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.lock().unwrap().remove(key)
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }
}

impl<K: Send + Sync> CacheSynced for FakeCache<K> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl<K: Send + Sync> ObjectCache<K> for FakeCache<K> {
    fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<K>>, CacheError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.objects.lock().unwrap().values().cloned().collect()
    }
}

/// Sync handler that records every call and fails the first `failures` of them
pub struct ScriptedSync {
    failures: AtomicUsize,
    delay: Duration,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSync {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls were made
    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl<K: Resource + Send + Sync + 'static> SyncHandler<K> for ScriptedSync {
    async fn sync(&self, _ctx: CancellationToken, obj: Arc<K>) -> Result<(), SyncError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.calls.lock().unwrap().push((name.clone(), Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow::anyhow!("scripted failure for {name}").into());
        }
        Ok(())
    }
}
