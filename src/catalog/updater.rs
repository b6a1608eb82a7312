//! Background catalog refresh
//!
//! Runs until every [`UpdaterHandle`] is dropped or [`UpdaterHandle::shutdown`]
//! is called. It handles two inputs with `tokio::select!`:
//! - the periodic refresh timer
//! - on-demand refresh requests (optionally with a reply channel)
//!
//! A failed refresh is logged and leaves the current snapshot in place.

use super::model::Tier;
use super::source::CatalogSource;
use super::{CatalogError, ServerCatalog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

type RefreshReply = Option<oneshot::Sender<Result<(), CatalogError>>>;

pub struct CatalogUpdater {
    source: Arc<dyn CatalogSource>,
    catalog: ServerCatalog,
    refresh_interval: Duration,
    tier_hint: Option<Tier>,
}

impl CatalogUpdater {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        catalog: ServerCatalog,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            catalog,
            refresh_interval,
            tier_hint: None,
        }
    }

    pub fn with_tier_hint(mut self, tier: Tier) -> Self {
        self.tier_hint = Some(tier);
        self
    }

    /// Fetch once and publish on success
    pub async fn refresh(&self) -> Result<(), CatalogError> {
        let snapshot = self.source.refresh_catalog(self.tier_hint).await?;
        info!(
            "Catalog refreshed: {} countries, {} servers",
            snapshot.countries().len(),
            snapshot.server_count()
        );
        self.catalog.replace(snapshot);
        Ok(())
    }

    /// Start the refresh loop; the first tick fires immediately
    pub fn spawn(self) -> UpdaterHandle {
        // One queued request at most; further requests coalesce into it
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(rx));
        UpdaterHandle {
            requests: tx,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    async fn run(self, mut requests: mpsc::Receiver<RefreshReply>) {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Periodic catalog refresh");
                    if let Err(e) = self.refresh().await {
                        warn!("Catalog refresh failed, keeping previous snapshot: {}", e);
                    }
                }
                request = requests.recv() => {
                    let Some(reply) = request else {
                        debug!("All updater handles dropped, stopping");
                        break;
                    };
                    let result = self.refresh().await;
                    if let Err(ref e) = result {
                        warn!("Catalog refresh failed, keeping previous snapshot: {}", e);
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                    // Avoid an immediate second fetch when a tick was due
                    ticker.reset();
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct UpdaterHandle {
    requests: mpsc::Sender<RefreshReply>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl UpdaterHandle {
    /// Refresh now and wait for the outcome
    pub async fn refresh_now(&self) -> Result<(), CatalogError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Some(tx))
            .await
            .map_err(|_| CatalogError::SourceUnavailable("catalog updater stopped".to_string()))?;
        rx.await
            .map_err(|_| CatalogError::SourceUnavailable("catalog updater stopped".to_string()))?
    }

    /// Queue a refresh without waiting; dropped if one is already queued
    pub fn request_refresh(&self) {
        if self.requests.try_send(None).is_err() {
            debug!("Catalog refresh already queued");
        }
    }

    /// Queue a refresh whenever `events` yields a value matching `trigger`
    pub fn refresh_on<T, F>(&self, mut events: broadcast::Receiver<T>, trigger: F) -> JoinHandle<()>
    where
        T: Clone + Send + 'static,
        F: Fn(&T) -> bool + Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if trigger(&event) => handle.request_refresh(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Refresh trigger lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn shutdown(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::tests::server;
    use super::super::model::Snapshot;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSource {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl CatalogSource for FakeSource {
        async fn refresh_catalog(
            &self,
            _tier_hint: Option<Tier>,
        ) -> Result<Snapshot, CatalogError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(CatalogError::SourceUnavailable("offline".to_string()));
            }
            let servers = (0..n)
                .map(|i| server(&format!("US#{}", i), "US", i as f64, 0))
                .collect();
            Ok(Snapshot::from_servers(servers))
        }
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let source = FakeSource::new();
        let catalog = ServerCatalog::empty();
        let updater =
            CatalogUpdater::new(source.clone(), catalog.clone(), Duration::from_secs(3600));

        updater.refresh().await.unwrap();
        assert_eq!(catalog.snapshot().server_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = FakeSource::new();
        let catalog = ServerCatalog::empty();
        let updater =
            CatalogUpdater::new(source.clone(), catalog.clone(), Duration::from_secs(3600));
        updater.refresh().await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        assert!(updater.refresh().await.is_err());
        assert_eq!(catalog.snapshot().server_count(), 1);
    }

    #[tokio::test]
    async fn test_spawned_updater_refreshes_on_demand() {
        let source = FakeSource::new();
        let catalog = ServerCatalog::empty();
        let handle = CatalogUpdater::new(source.clone(), catalog.clone(), Duration::from_secs(3600))
            .with_tier_hint(Tier::PLUS)
            .spawn();

        handle.refresh_now().await.unwrap();
        // Initial tick plus the explicit request
        assert!(source.calls.load(Ordering::SeqCst) >= 1);
        assert!(catalog.snapshot().server_count() >= 1);

        source.fail.store(true, Ordering::SeqCst);
        let before = catalog.snapshot().server_count();
        assert!(handle.refresh_now().await.is_err());
        assert_eq!(catalog.snapshot().server_count(), before);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_refresh_on_trigger() {
        let source = FakeSource::new();
        let catalog = ServerCatalog::empty();
        let mut snapshots = catalog.subscribe();
        let handle = CatalogUpdater::new(source.clone(), catalog.clone(), Duration::from_secs(3600))
            .spawn();
        handle.refresh_now().await.unwrap();
        let calls_before = source.calls.load(Ordering::SeqCst);
        snapshots.borrow_and_update();

        let (tx, rx) = broadcast::channel::<bool>(4);
        let _trigger = handle.refresh_on(rx, |connected| *connected);
        tx.send(false).unwrap();
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_before + 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_queued_refresh_requests_coalesce() {
        let source = FakeSource::new();
        let catalog = ServerCatalog::empty();
        let handle =
            CatalogUpdater::new(source.clone(), catalog, Duration::from_secs(3600)).spawn();
        handle.refresh_now().await.unwrap();
        let calls_before = source.calls.load(Ordering::SeqCst);

        // The updater cannot run until this task yields
        for _ in 0..10 {
            handle.request_refresh();
        }
        handle.refresh_now().await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), calls_before + 2);
        handle.shutdown();
    }
}
