//! Server catalog
//!
//! The catalog is a sequence of immutable [`Snapshot`]s. The current one is
//! held in a watch channel: publishing a new snapshot swaps the `Arc` in one
//! step, and readers that already hold the previous `Arc` keep using it until
//! they read again.

pub mod model;
pub mod source;
pub mod updater;

pub use model::{Feature, Server, Snapshot, StreamingService, StreamingServices, Tier, VpnCountry};
pub use source::{CatalogSource, JsonFileSource};
pub use updater::{CatalogUpdater, UpdaterHandle};

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Failed to parse catalog: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Shared handle to the current catalog snapshot
#[derive(Clone)]
pub struct ServerCatalog {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl ServerCatalog {
    pub fn new(initial: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn empty() -> Self {
        Self::new(Snapshot::empty())
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Replace the current snapshot and notify subscribers
    pub fn replace(&self, snapshot: Snapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// Receive a notification each time a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}

impl Default for ServerCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::model::tests::server;
    use super::*;

    #[test]
    fn test_catalog_error_display() {
        let err = CatalogError::SourceUnavailable("timeout".to_string());
        assert_eq!(err.to_string(), "Catalog source unavailable: timeout");
    }

    #[test]
    fn test_replace_keeps_old_snapshot_alive() {
        let catalog =
            ServerCatalog::new(Snapshot::from_servers(vec![server("US#1", "US", 1.0, 0)]));
        let old = catalog.snapshot();

        catalog.replace(Snapshot::from_servers(vec![server("FR#1", "FR", 1.0, 0)]));

        assert!(old.server("US#1").is_some());
        assert!(catalog.snapshot().server("US#1").is_none());
        assert!(catalog.snapshot().server("FR#1").is_some());
    }

    #[tokio::test]
    async fn test_subscribers_see_replacement() {
        let catalog = ServerCatalog::empty();
        let mut rx = catalog.subscribe();

        catalog.replace(Snapshot::from_servers(vec![server("SE#1", "SE", 1.0, 0)]));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().server_count(), 1);
    }
}
