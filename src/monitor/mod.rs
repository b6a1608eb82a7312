//! Connection state monitor
//!
//! The monitor is the single owner of the connection state. Callers hold a
//! cheap, cloneable [`ConnectionMonitor`] handle:
//!
//! - `connect`/`disconnect` resolve synchronously, queue a request and return;
//!   the outcome is observed through `subscribe` (latest status),
//!   `state_changes` (every transition, bounded) or `transitions` (every
//!   transition, unbounded).
//! - The tunnel driver reports through a [`TunnelEventSink`] obtained from the
//!   [`MonitorBuilder`] before the driver is constructed.
//!
//! # Example
//!
//! ```rust,ignore
//! let builder = MonitorBuilder::new(catalog.clone(), ConnectionPolicy::default());
//! let driver = Arc::new(SimulatedDriver::new(builder.event_sink()));
//! let monitor = builder.spawn(driver);
//!
//! monitor.connect(Profile::new("France", ServerWrapper::fastest_in("FR")))?;
//! ```

pub(crate) mod actor;
pub mod state;

pub use state::{ConnectionError, ConnectionState, VpnStatus};

use crate::catalog::{Server, ServerCatalog, Tier};
use crate::profile::{Profile, ServerWrapper};
use crate::selection::{select_server, FeatureFlags};
use crate::tunnel::{TunnelDriver, TunnelEventSink};
use actor::{Actor, Input, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

const STATE_CHANGES_CAPACITY: usize = 64;

pub(crate) type TransitionSubscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<VpnStatus>>>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No server available for {0}")]
    NoServerAvailable(ServerWrapper),
    #[error("Connection monitor is not running")]
    MonitorStopped,
}

/// What a connect request points at
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    Profile(Profile),
    Server(Arc<Server>),
}

impl From<Profile> for ConnectTarget {
    fn from(profile: Profile) -> Self {
        ConnectTarget::Profile(profile)
    }
}

impl From<Arc<Server>> for ConnectTarget {
    fn from(server: Arc<Server>) -> Self {
        ConnectTarget::Server(server)
    }
}

impl From<Server> for ConnectTarget {
    fn from(server: Server) -> Self {
        ConnectTarget::Server(Arc::new(server))
    }
}

impl ConnectTarget {
    fn into_profile(self) -> Profile {
        match self {
            ConnectTarget::Profile(profile) => profile,
            ConnectTarget::Server(server) => Profile::temporary(&server),
        }
    }
}

/// Account constraints applied when resolving profiles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPolicy {
    pub tier: Tier,
    pub features: FeatureFlags,
}

/// Diagnostic counters
#[derive(Debug, Default)]
pub struct MonitorStats {
    pub(crate) stale_events: AtomicU64,
    pub(crate) superseded_requests: AtomicU64,
}

impl MonitorStats {
    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }

    pub fn superseded_requests(&self) -> u64 {
        self.superseded_requests.load(Ordering::Relaxed)
    }
}

/// Wires the monitor queue before the driver exists
pub struct MonitorBuilder {
    tx: mpsc::UnboundedSender<Input>,
    rx: mpsc::UnboundedReceiver<Input>,
    catalog: ServerCatalog,
    policy: ConnectionPolicy,
}

impl MonitorBuilder {
    pub fn new(catalog: ServerCatalog, policy: ConnectionPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            catalog,
            policy,
        }
    }

    /// Sink to hand to the tunnel driver
    pub fn event_sink(&self) -> TunnelEventSink {
        TunnelEventSink::new(self.tx.clone())
    }

    /// Start the monitor task
    pub fn spawn(self, driver: Arc<dyn TunnelDriver>) -> ConnectionMonitor {
        let (status_tx, status_rx) = watch::channel(VpnStatus::default());
        let (changes_tx, _) = broadcast::channel(STATE_CHANGES_CAPACITY);
        let stats = Arc::new(MonitorStats::default());
        let transitions = TransitionSubscribers::default();

        let actor = Actor::new(
            driver,
            status_tx,
            changes_tx.clone(),
            transitions.clone(),
            stats.clone(),
        );
        let task = tokio::spawn(actor.run(self.rx));

        ConnectionMonitor {
            tx: self.tx,
            status_rx,
            changes_tx,
            transitions,
            catalog: self.catalog,
            policy: Arc::new(RwLock::new(self.policy)),
            stats,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Handle to the running monitor
#[derive(Clone)]
pub struct ConnectionMonitor {
    tx: mpsc::UnboundedSender<Input>,
    status_rx: watch::Receiver<VpnStatus>,
    changes_tx: broadcast::Sender<VpnStatus>,
    transitions: TransitionSubscribers,
    catalog: ServerCatalog,
    policy: Arc<RwLock<ConnectionPolicy>>,
    stats: Arc<MonitorStats>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionMonitor {
    /// Resolve `target` and queue a connect
    ///
    /// Returns the server the request resolved to. Fails with
    /// `NoServerAvailable` before any state change when nothing is eligible.
    pub fn connect(&self, target: impl Into<ConnectTarget>) -> Result<Arc<Server>, ConnectError> {
        let profile = target.into().into_profile();
        let server = self.resolve(&profile)?;
        debug!("Queueing connect to {} ({})", server.id, profile.wrapper);
        self.send(Input::Request(Request::Connect {
            profile,
            server: server.clone(),
        }))?;
        Ok(server)
    }

    /// Queue a disconnect; a no-op once applied if already disabled
    pub fn disconnect(&self) -> Result<(), ConnectError> {
        debug!("Queueing disconnect");
        self.send(Input::Request(Request::Disconnect))
    }

    /// Resolve a profile against the current catalog and policy
    pub fn resolve(&self, profile: &Profile) -> Result<Arc<Server>, ConnectError> {
        let snapshot = self.catalog.snapshot();
        let policy = self.policy();
        select_server(&profile.wrapper, &snapshot, policy.tier, &policy.features)
            .ok_or_else(|| ConnectError::NoServerAvailable(profile.wrapper.clone()))
    }

    fn send(&self, input: Input) -> Result<(), ConnectError> {
        self.tx.send(input).map_err(|_| ConnectError::MonitorStopped)
    }

    pub fn status(&self) -> VpnStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state.clone()
    }

    /// Latest status; intermediate values may be skipped
    pub fn subscribe(&self) -> watch::Receiver<VpnStatus> {
        self.status_rx.clone()
    }

    /// Every transition, in order; slow receivers see `Lagged`
    pub fn state_changes(&self) -> broadcast::Receiver<VpnStatus> {
        self.changes_tx.subscribe()
    }

    /// Every transition, in order, queued without bound for receivers that
    /// must not miss any
    pub fn transitions(&self) -> mpsc::UnboundedReceiver<VpnStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().state.is_connected()
    }

    pub fn connecting_to_server(&self) -> Option<Arc<Server>> {
        self.status_rx.borrow().state.server().cloned()
    }

    /// Connecting or connected to a server of `country`
    pub fn is_connecting_to_country(&self, country: &str) -> bool {
        self.status_rx
            .borrow()
            .state
            .server()
            .is_some_and(|s| s.country == country)
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Constraints for future resolutions; the current connection is kept
    pub fn set_policy(&self, policy: ConnectionPolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn stale_events(&self) -> u64 {
        self.stats.stale_events()
    }

    /// Wait until everything queued before this call has been applied
    pub async fn settled(&self) -> Result<(), ConnectError> {
        let (tx, rx) = oneshot::channel();
        self.send(Input::Barrier(tx))?;
        rx.await.map_err(|_| ConnectError::MonitorStopped)
    }

    /// Tear down any tunnel and stop the monitor task
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Input::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
