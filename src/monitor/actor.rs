//! Monitor task
//!
//! Owns the connection state. Requests, tunnel events and barriers arrive on
//! one unbounded queue and are applied one at a time, each fully (state
//! published, driver instructed) before the next is read.
//!
//! At most one driver command is outstanding. A teardown retires an
//! in-flight establish; while a teardown is outstanding, incoming requests
//! wait in a single pending slot where the latest one wins.

use super::state::{ConnectionError, ConnectionState, VpnStatus};
use super::{MonitorStats, TransitionSubscribers};
use crate::catalog::Server;
use crate::profile::Profile;
use crate::tunnel::{AttemptId, TunnelDriver, TunnelEvent, TunnelEventKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub(crate) enum Input {
    Request(Request),
    Event(TunnelEvent),
    Barrier(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub(crate) enum Request {
    Connect {
        profile: Profile,
        server: Arc<Server>,
    },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Establish,
    Teardown,
}

pub(crate) struct Actor {
    driver: Arc<dyn TunnelDriver>,
    state: ConnectionState,
    /// Attempt behind the current Connecting/Connected/Disconnecting state
    attempt: Option<AttemptId>,
    outstanding: Option<Command>,
    pending: Option<Request>,
    next_attempt: u64,
    status_tx: watch::Sender<VpnStatus>,
    changes_tx: broadcast::Sender<VpnStatus>,
    transitions: TransitionSubscribers,
    stats: Arc<MonitorStats>,
}

impl Actor {
    pub(crate) fn new(
        driver: Arc<dyn TunnelDriver>,
        status_tx: watch::Sender<VpnStatus>,
        changes_tx: broadcast::Sender<VpnStatus>,
        transitions: TransitionSubscribers,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            driver,
            state: ConnectionState::Disabled,
            attempt: None,
            outstanding: None,
            pending: None,
            next_attempt: 0,
            status_tx,
            changes_tx,
            transitions,
            stats,
        }
    }

    pub(crate) async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        debug!("Connection monitor started");
        while let Some(input) = inputs.recv().await {
            match input {
                Input::Request(request) => self.handle_request(request).await,
                Input::Event(event) => self.handle_event(event),
                Input::Barrier(done) => {
                    let _ = done.send(());
                }
                Input::Shutdown(done) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    break;
                }
            }

            // A teardown that completed (or failed to start) frees the pending slot
            while self.outstanding != Some(Command::Teardown) {
                let Some(request) = self.pending.take() else {
                    break;
                };
                debug!("Applying pending request {:?}", request_kind(&request));
                self.handle_request(request).await;
            }
        }
        debug!("Connection monitor stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        if self.outstanding == Some(Command::Teardown) {
            if let Some(previous) = self.pending.replace(request) {
                self.stats.superseded_requests.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Dropping superseded {} request",
                    request_kind(&previous)
                );
            }
            return;
        }

        match request {
            Request::Disconnect => {
                if self.state.is_disabled() {
                    debug!("Disconnect while disabled, nothing to do");
                    return;
                }
                self.start_teardown().await;
            }
            Request::Connect { profile, server } => {
                if self.state.targets(&profile, &server) {
                    debug!(
                        "Already {} equivalent target {}, ignoring connect",
                        self.state.as_str(),
                        server.id
                    );
                    return;
                }
                if self.state.is_disabled() {
                    self.start_establish(profile, server).await;
                } else {
                    info!("Switching target to {}, disconnecting first", server.id);
                    self.pending = Some(Request::Connect { profile, server });
                    self.start_teardown().await;
                }
            }
        }
    }

    async fn start_establish(&mut self, profile: Profile, server: Arc<Server>) {
        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        self.attempt = Some(attempt);
        self.outstanding = Some(Command::Establish);
        self.transition(VpnStatus::new(ConnectionState::Connecting {
            profile,
            server: server.clone(),
        }));

        info!("Establishing tunnel {} to {}", attempt, server.id);
        if let Err(e) = self.driver.establish(attempt, &server).await {
            warn!("Tunnel driver refused establish {}: {}", attempt, e);
            self.attempt = None;
            self.outstanding = None;
            self.transition(VpnStatus::failed(ConnectionError::TunnelFailed(
                e.to_string(),
            )));
        }
    }

    async fn start_teardown(&mut self) {
        let Some(attempt) = self.attempt else {
            self.outstanding = None;
            self.transition(VpnStatus::new(ConnectionState::Disabled));
            return;
        };

        if self.outstanding == Some(Command::Establish) {
            debug!("Teardown retires in-flight establish {}", attempt);
        }
        self.outstanding = Some(Command::Teardown);
        self.transition(VpnStatus::new(ConnectionState::Disconnecting));

        info!("Tearing down tunnel {}", attempt);
        if let Err(e) = self.driver.teardown(attempt).await {
            warn!("Tunnel driver refused teardown {}: {}", attempt, e);
            self.finish_teardown();
        }
    }

    fn finish_teardown(&mut self) {
        self.attempt = None;
        self.outstanding = None;
        self.transition(VpnStatus::new(ConnectionState::Disabled));
    }

    fn handle_event(&mut self, event: TunnelEvent) {
        let current = self.attempt == Some(event.attempt);
        let outstanding = self.outstanding;

        match event.kind {
            TunnelEventKind::Established
                if current
                    && outstanding == Some(Command::Establish)
                    && self.state.is_establishing_connection() =>
            {
                self.outstanding = None;
                if let ConnectionState::Connecting { profile, server } = self.state.clone() {
                    info!("Tunnel {} established to {}", event.attempt, server.id);
                    self.transition(VpnStatus::new(ConnectionState::Connected { profile, server }));
                }
            }
            TunnelEventKind::Failed(reason) if current && self.is_live(outstanding) => {
                warn!("Tunnel {} failed: {}", event.attempt, reason);
                self.attempt = None;
                self.outstanding = None;
                self.transition(VpnStatus::failed(ConnectionError::TunnelFailed(reason)));
            }
            TunnelEventKind::Lost if current && self.is_live(outstanding) => {
                warn!("Tunnel {} lost", event.attempt);
                self.attempt = None;
                self.outstanding = None;
                self.transition(VpnStatus::failed(ConnectionError::TunnelLost));
            }
            TunnelEventKind::TornDown
                if current
                    && outstanding == Some(Command::Teardown)
                    && matches!(self.state, ConnectionState::Disconnecting) =>
            {
                info!("Tunnel {} torn down", event.attempt);
                self.finish_teardown();
            }
            kind => {
                let total = self.stats.stale_events.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Ignoring stale {:?} for attempt {} while {} ({} stale so far)",
                    kind,
                    event.attempt,
                    self.state.as_str(),
                    total
                );
            }
        }
    }

    /// Connecting with establish outstanding, or Connected with nothing outstanding
    fn is_live(&self, outstanding: Option<Command>) -> bool {
        match self.state {
            ConnectionState::Connecting { .. } => outstanding == Some(Command::Establish),
            ConnectionState::Connected { .. } => outstanding.is_none(),
            _ => false,
        }
    }

    fn transition(&mut self, status: VpnStatus) {
        self.state = status.state.clone();
        match &status.error {
            Some(error) => info!("Connection state: {} ({})", self.state, error),
            None => info!("Connection state: {}", self.state),
        }
        self.status_tx.send_replace(status.clone());
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(status.clone()).is_ok());
        // No subscribers is fine
        let _ = self.changes_tx.send(status);
    }

    async fn shutdown(&mut self) {
        self.pending = None;
        if let Some(attempt) = self.attempt.take() {
            info!("Monitor shutting down, tearing down tunnel {}", attempt);
            if let Err(e) = self.driver.teardown(attempt).await {
                warn!("Teardown during shutdown failed: {}", e);
            }
        }
        self.outstanding = None;
        if !self.state.is_disabled() {
            self.transition(VpnStatus::new(ConnectionState::Disabled));
        }
    }
}

fn request_kind(request: &Request) -> &'static str {
    match request {
        Request::Connect { .. } => "connect",
        Request::Disconnect => "disconnect",
    }
}
