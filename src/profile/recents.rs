//! Recent connections
//!
//! Newest first, bounded, and deduplicated by wrapper: connecting again to a
//! target that is already listed moves it to the front.

use super::model::Profile;
use super::store::{load_json, store_json, KeyValueStore};
use super::ProfileError;
use crate::monitor::{ConnectionState, VpnStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RECENTS_KEY: &str = "recents";

pub const DEFAULT_RECENTS_CAPACITY: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentConnection {
    pub profile: Profile,
    pub last_used: DateTime<Utc>,
}

pub struct RecentsManager {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    // Serializes read-modify-write; the watch holds the published list
    write_lock: Mutex<()>,
    tx: watch::Sender<Vec<RecentConnection>>,
}

impl RecentsManager {
    pub fn load(store: Arc<dyn KeyValueStore>, capacity: usize) -> Result<Self, ProfileError> {
        let capacity = capacity.max(1);
        let mut entries: Vec<RecentConnection> =
            load_json(store.as_ref(), RECENTS_KEY)?.unwrap_or_default();
        entries.truncate(capacity);
        let (tx, _rx) = watch::channel(entries);
        Ok(Self {
            store,
            capacity,
            write_lock: Mutex::new(()),
            tx,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current list, newest first
    pub fn recent_connections(&self) -> Vec<RecentConnection> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<RecentConnection>> {
        self.tx.subscribe()
    }

    /// Move `profile` to the front (or insert it) and evict beyond capacity
    pub fn record_connection(&self, profile: &Profile) -> Result<(), ProfileError> {
        self.record_connection_at(profile, Utc::now())
    }

    pub fn record_connection_at(
        &self,
        profile: &Profile,
        at: DateTime<Utc>,
    ) -> Result<(), ProfileError> {
        self.update(|entries| {
            entries.retain(|e| !e.profile.same_target(profile));
            entries.insert(
                0,
                RecentConnection {
                    profile: profile.clone(),
                    last_used: at,
                },
            );
        })?;
        debug!("Recorded recent connection: {}", profile.wrapper);
        Ok(())
    }

    /// Drop the entry with the same target as `profile`
    pub fn remove(&self, profile: &Profile) -> Result<(), ProfileError> {
        self.update(|entries| entries.retain(|e| !e.profile.same_target(profile)))
    }

    pub fn clear(&self) -> Result<(), ProfileError> {
        self.update(|entries| entries.clear())
    }

    fn update<F>(&self, mutate: F) -> Result<(), ProfileError>
    where
        F: FnOnce(&mut Vec<RecentConnection>),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.tx.borrow().clone();
        mutate(&mut entries);
        entries.truncate(self.capacity);
        store_json(self.store.as_ref(), RECENTS_KEY, &entries)?;
        self.tx.send_replace(entries);
        Ok(())
    }

    /// Record every transition into `Connected` received on `changes`
    ///
    /// Feed it from `ConnectionMonitor::transitions` so no connection is
    /// missed.
    pub fn track(
        self: Arc<Self>,
        mut changes: mpsc::UnboundedReceiver<VpnStatus>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(status) = changes.recv().await {
                if let ConnectionState::Connected { profile, .. } = status.state {
                    if let Err(e) = self.record_connection(&profile) {
                        warn!("Failed to record recent connection: {}", e);
                    }
                }
            }
            debug!("Recents tracker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::ServerWrapper;
    use super::super::store::MemoryStore;
    use super::*;
    use crate::catalog::model::tests::server;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use std::time::Duration;

    fn recents(capacity: usize) -> RecentsManager {
        RecentsManager::load(Arc::new(MemoryStore::new()), capacity).unwrap()
    }

    fn names(manager: &RecentsManager) -> Vec<String> {
        manager
            .recent_connections()
            .into_iter()
            .map(|e| e.profile.name)
            .collect()
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let manager = recents(3);
        for name in ["P1", "P2", "P3", "P4"] {
            manager
                .record_connection(&Profile::new(name, ServerWrapper::server(name)))
                .unwrap();
        }
        assert_eq!(names(&manager), vec!["P4", "P3", "P2"]);
    }

    #[test]
    fn test_equal_wrappers_collapse_to_front() {
        let manager = recents(3);
        let first = Profile::new("France", ServerWrapper::fastest_in("FR"));
        let other = Profile::new("Sweden", ServerWrapper::fastest_in("SE"));
        let second = Profile::new("Fastest FR", ServerWrapper::fastest_in("FR"));

        manager.record_connection(&first).unwrap();
        manager.record_connection(&other).unwrap();
        manager.record_connection(&second).unwrap();

        let entries = manager.recent_connections();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].profile.id, second.id);
        assert_eq!(entries[1].profile.name, "Sweden");
    }

    #[test]
    fn test_record_twice_single_entry_with_latest_timestamp() {
        let manager = recents(3);
        let profile = Profile::new("US", ServerWrapper::fastest_in("US"));
        let earlier = Utc::now() - ChronoDuration::minutes(5);

        manager.record_connection_at(&profile, earlier).unwrap();
        manager.record_connection(&profile).unwrap();

        let entries = manager.recent_connections();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_used > earlier);
    }

    #[test]
    fn test_temp_profiles_for_same_server_collapse() {
        let manager = recents(3);
        let ch = server("CH#1", "CH", 1.0, 0);
        manager.record_connection(&Profile::temporary(&ch)).unwrap();
        manager.record_connection(&Profile::temporary(&ch)).unwrap();
        assert_eq!(manager.recent_connections().len(), 1);
    }

    #[test]
    fn test_persisted_and_reloaded() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager = RecentsManager::load(store.clone(), 3).unwrap();
        manager
            .record_connection(&Profile::new("A", ServerWrapper::Fastest))
            .unwrap();
        manager
            .record_connection(&Profile::new("B", ServerWrapper::Random))
            .unwrap();

        let reloaded = RecentsManager::load(store.clone(), 1).unwrap();
        assert_eq!(names(&reloaded), vec!["B"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let manager = recents(3);
        let a = Profile::new("A", ServerWrapper::fastest_in("DE"));
        let b = Profile::new("B", ServerWrapper::fastest_in("NL"));
        manager.record_connection(&a).unwrap();
        manager.record_connection(&b).unwrap();

        manager
            .remove(&Profile::new("other name", ServerWrapper::fastest_in("DE")))
            .unwrap();
        assert_eq!(names(&manager), vec!["B"]);

        manager.clear().unwrap();
        assert!(manager.recent_connections().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_notified() {
        let manager = recents(3);
        let mut rx = manager.subscribe();
        manager
            .record_connection(&Profile::new("A", ServerWrapper::Fastest))
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_tracker_records_connected_transitions() {
        let manager = Arc::new(recents(3));
        let mut rx = manager.subscribe();
        let (tx, changes) = mpsc::unbounded_channel();
        let _task = manager.clone().track(changes);

        let profile = Profile::new("Swiss", ServerWrapper::fastest_in("CH"));
        let server = Arc::new(server("CH#1", "CH", 1.0, 0));
        tx.send(VpnStatus::new(ConnectionState::Connecting {
            profile: profile.clone(),
            server: server.clone(),
        }))
        .unwrap();
        tx.send(VpnStatus::new(ConnectionState::Connected {
            profile: profile.clone(),
            server,
        }))
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.recent_connections()[0].profile.id, profile.id);
    }

    #[tokio::test]
    async fn test_tracker_records_bursts_of_connections() {
        let manager = Arc::new(recents(200));
        let (tx, changes) = mpsc::unbounded_channel();

        for i in 0..150 {
            let id = format!("DE#{}", i);
            tx.send(VpnStatus::new(ConnectionState::Connected {
                profile: Profile::temporary(&server(&id, "DE", 1.0, 0)),
                server: Arc::new(server(&id, "DE", 1.0, 0)),
            }))
            .unwrap();
        }
        drop(tx);

        let task = manager.clone().track(changes);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        let entries = manager.recent_connections();
        assert_eq!(entries.len(), 150);
        assert_eq!(entries[0].profile.wrapper, ServerWrapper::server("DE#149"));
    }
}
