//! # Informer
//!
//! Watches one resource type, mirrors it into a reflector store and fans each
//! change out to the registered [`ResourceEventHandler`]s.
//!
//! The store is always updated before handlers run, so a key enqueued by a handler
//! resolves to the new state (or to nothing, after a delete) when a worker picks
//! it up.

use crate::controller::{CacheError, CacheSynced, ObjectCache, ObjectKey, ResourceEventHandler};
use futures::StreamExt;
use kube::api::Api;
use kube::Resource;
use kube_runtime::reflector::{store::Writer, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounds shared by every watched resource type
///
/// Covers built-in and derived custom resources, whose dynamic type is `()`.
pub trait Watched:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> Watched for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Read side of an informer: the reflector store plus its sync flag
pub struct ReflectorCache<K: Watched> {
    kind: &'static str,
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K: Watched> std::fmt::Debug for ReflectorCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectorCache")
            .field("kind", &self.kind)
            .field("synced", &self.has_synced())
            .finish_non_exhaustive()
    }
}

impl<K: Watched> CacheSynced for ReflectorCache<K> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl<K: Watched> ObjectCache<K> for ReflectorCache<K> {
    fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<K>>, CacheError> {
        if !self.has_synced() {
            return Err(CacheError::Unavailable {
                kind: self.kind,
                reason: "initial listing has not completed".to_string(),
            });
        }
        let mut obj_ref = ObjectRef::<K>::new(key.name());
        if let Some(namespace) = key.namespace() {
            obj_ref = obj_ref.within(namespace);
        }
        Ok(self.store.get(&obj_ref))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }
}

/// A change to deliver to handlers
#[derive(Debug, Clone)]
pub(crate) enum Notification<K> {
    Add(Arc<K>),
    Update(Arc<K>, Arc<K>),
    Delete(Arc<K>),
}

impl<K> Notification<K> {
    fn deliver(&self, handler: &dyn ResourceEventHandler<K>) {
        match self {
            Self::Add(obj) => handler.on_add(obj),
            Self::Update(old, new) => handler.on_update(old, new),
            Self::Delete(obj) => handler.on_delete(obj),
        }
    }
}

/// Applies watch events to the store and derives the notifications they imply
pub(crate) struct EventState<K: Watched> {
    writer: Writer<K>,
    reader: Store<K>,
    relist: Vec<K>,
    synced: Arc<AtomicBool>,
}

impl<K: Watched> EventState<K> {
    pub(crate) fn new() -> Self {
        let writer = Writer::default();
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            relist: Vec::new(),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn handle_event(&mut self, event: watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(&obj));
                self.writer.apply_watcher_event(&watcher::Event::Apply(obj.clone()));
                let new = Arc::new(obj);
                vec![match old {
                    Some(old) => Notification::Update(old, new),
                    None => Notification::Add(new),
                }]
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&watcher::Event::Delete(obj.clone()));
                vec![Notification::Delete(Arc::new(obj))]
            }
            watcher::Event::Init => {
                self.relist.clear();
                self.writer.apply_watcher_event(&watcher::Event::Init);
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.writer.apply_watcher_event(&watcher::Event::InitApply(obj.clone()));
                self.relist.push(obj);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let mut before: HashMap<ObjectRef<K>, Arc<K>> = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.writer.apply_watcher_event(&watcher::Event::InitDone);

                let mut notifications = Vec::with_capacity(self.relist.len());
                for obj in self.relist.drain(..) {
                    let new = Arc::new(obj);
                    notifications.push(match before.remove(&ObjectRef::from_obj(new.as_ref())) {
                        Some(old) => Notification::Update(old, new),
                        None => Notification::Add(new),
                    });
                }
                notifications.extend(before.into_values().map(Notification::Delete));

                if !self.synced.swap(true, Ordering::AcqRel) {
                    debug!(objects = self.reader.state().len(), "informer.synced");
                }
                notifications
            }
        }
    }
}

/// Watches `K` and feeds registered handlers
pub struct Informer<K: Watched> {
    api: Api<K>,
    config: watcher::Config,
    state: EventState<K>,
    cache: Arc<ReflectorCache<K>>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
}

impl<K: Watched> std::fmt::Debug for Informer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &self.cache.kind)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl<K: Watched> Informer<K> {
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        let state = EventState::new();
        let cache = Arc::new(ReflectorCache {
            kind: short_type_name::<K>(),
            store: state.reader.clone(),
            synced: Arc::clone(&state.synced),
        });
        Self {
            api,
            config,
            state,
            cache,
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> Arc<ReflectorCache<K>> {
        Arc::clone(&self.cache)
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.push(handler);
    }

    /// Watch until `stop` fires
    ///
    /// Watch errors are logged; the stream reconnects with backoff on its own.
    pub async fn run(mut self, stop: CancellationToken) {
        let kind = self.cache.kind;
        info!(kind, "Starting informer");
        let stream = watcher(self.api.clone(), self.config.clone()).default_backoff();
        futures::pin_mut!(stream);

        loop {
            let next = tokio::select! {
                () = stop.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    let notifications = self.state.handle_event(event);
                    self.notify(notifications).await;
                }
                Some(Err(e)) => warn!(kind, error = %e, "informer.watch_error"),
                None => {
                    error!(kind, "watch stream ended");
                    break;
                }
            }
        }
        info!(kind, "Informer stopped");
    }

    async fn notify(&self, notifications: Vec<Notification<K>>) {
        if notifications.is_empty() {
            return;
        }
        for handler in &self.handlers {
            if handler.may_block() {
                let handler = Arc::clone(handler);
                let batch = notifications.clone();
                let delivered = tokio::task::spawn_blocking(move || {
                    for notification in &batch {
                        notification.deliver(handler.as_ref());
                    }
                })
                .await;
                if let Err(e) = delivered {
                    error!(kind = self.cache.kind, error = %e, "blocking handler failed");
                }
            } else {
                for notification in &notifications {
                    notification.deliver(handler.as_ref());
                }
            }
        }
    }
}

fn short_type_name<K>() -> &'static str {
    let full = std::any::type_name::<K>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("v".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    fn value(obj: &ConfigMap) -> &str {
        obj.data
            .as_ref()
            .and_then(|d| d.get("v"))
            .map_or("", String::as_str)
    }

    fn cache(state: &EventState<ConfigMap>) -> ReflectorCache<ConfigMap> {
        ReflectorCache {
            kind: "ConfigMap",
            store: state.reader.clone(),
            synced: Arc::clone(&state.synced),
        }
    }

    fn describe(notifications: &[Notification<ConfigMap>]) -> Vec<String> {
        notifications
            .iter()
            .map(|n| match n {
                Notification::Add(o) => format!("add {}", value(o)),
                Notification::Update(old, new) => format!("update {}->{}", value(old), value(new)),
                Notification::Delete(o) => format!("delete {}", value(o)),
            })
            .collect()
    }

    #[test]
    fn test_initial_listing_syncs_and_adds() {
        let mut state = EventState::new();
        let cache = cache(&state);
        assert!(!cache.has_synced());
        assert!(cache.get_by_key(&ObjectKey::namespaced("ns", "a")).is_err());

        assert!(state.handle_event(watcher::Event::Init).is_empty());
        assert!(state
            .handle_event(watcher::Event::InitApply(config_map("a", "1")))
            .is_empty());
        assert!(!cache.has_synced());

        let notifications = state.handle_event(watcher::Event::InitDone);
        assert_eq!(describe(&notifications), vec!["add 1"]);
        assert!(cache.has_synced());
        let cached = cache
            .get_by_key(&ObjectKey::namespaced("ns", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(value(&cached), "1");
    }

    #[test]
    fn test_apply_and_delete_update_store_before_notifying() {
        let mut state = EventState::new();
        state.handle_event(watcher::Event::Init);
        state.handle_event(watcher::Event::InitDone);
        let cache = cache(&state);
        let key = ObjectKey::namespaced("ns", "a");

        let added = state.handle_event(watcher::Event::Apply(config_map("a", "1")));
        assert_eq!(describe(&added), vec!["add 1"]);

        let updated = state.handle_event(watcher::Event::Apply(config_map("a", "2")));
        assert_eq!(describe(&updated), vec!["update 1->2"]);
        assert_eq!(value(&cache.get_by_key(&key).unwrap().unwrap()), "2");

        let deleted = state.handle_event(watcher::Event::Delete(config_map("a", "2")));
        assert_eq!(describe(&deleted), vec!["delete 2"]);
        assert!(cache.get_by_key(&key).unwrap().is_none());
    }

    #[test]
    fn test_relist_reports_vanished_objects_as_deleted() {
        let mut state = EventState::new();
        state.handle_event(watcher::Event::Init);
        state.handle_event(watcher::Event::InitApply(config_map("a", "1")));
        state.handle_event(watcher::Event::InitApply(config_map("b", "1")));
        state.handle_event(watcher::Event::InitDone);

        state.handle_event(watcher::Event::Init);
        state.handle_event(watcher::Event::InitApply(config_map("a", "2")));
        let mut notifications = describe(&state.handle_event(watcher::Event::InitDone));
        notifications.sort();

        assert_eq!(notifications, vec!["delete 1", "update 1->2"]);
        assert_eq!(cache(&state).list().len(), 1);
    }
}
