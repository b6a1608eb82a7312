//! Tunnel driver boundary
//!
//! The driver performs the actual tunnel work. The monitor calls
//! [`TunnelDriver::establish`] and [`TunnelDriver::teardown`]; both return as
//! soon as the work has started, and the outcome arrives later as a
//! [`TunnelEvent`] pushed into a [`TunnelEventSink`].
//!
//! # Driver contract
//!
//! - Every event echoes the [`AttemptId`] of the command it answers.
//! - `establish` answers with `Established` or `Failed`; an established tunnel
//!   may later report `Lost`.
//! - `teardown` aborts an in-flight establish for the same attempt and is
//!   always answered with `TornDown`.
//! - Events may be emitted from any thread or task.

pub mod simulated;

pub use simulated::SimulatedDriver;

use crate::catalog::Server;
use crate::monitor::actor::Input;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Tunnel driver rejected command: {0}")]
    Rejected(String),
    #[error("Tunnel driver unavailable")]
    Unavailable,
}

/// Identifies one establish/teardown cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEventKind {
    Established,
    Failed(String),
    Lost,
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEvent {
    pub attempt: AttemptId,
    pub kind: TunnelEventKind,
}

#[async_trait]
pub trait TunnelDriver: Send + Sync {
    /// Start establishing a tunnel to `server`
    async fn establish(&self, attempt: AttemptId, server: &Server) -> Result<(), TunnelError>;

    /// Start tearing down the tunnel of `attempt`
    async fn teardown(&self, attempt: AttemptId) -> Result<(), TunnelError>;
}

/// Where a driver reports tunnel events
///
/// Events share the monitor's input queue with user requests, so they are
/// applied in arrival order relative to commands.
#[derive(Clone)]
pub struct TunnelEventSink {
    tx: mpsc::UnboundedSender<Input>,
}

impl TunnelEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, attempt: AttemptId, kind: TunnelEventKind) {
        let event = TunnelEvent { attempt, kind };
        if self.tx.send(Input::Event(event)).is_err() {
            debug!("Monitor stopped, dropping tunnel event for attempt {}", attempt);
        }
    }

    pub fn established(&self, attempt: AttemptId) {
        self.emit(attempt, TunnelEventKind::Established);
    }

    pub fn failed(&self, attempt: AttemptId, reason: impl Into<String>) {
        self.emit(attempt, TunnelEventKind::Failed(reason.into()));
    }

    pub fn lost(&self, attempt: AttemptId) {
        self.emit(attempt, TunnelEventKind::Lost);
    }

    pub fn torn_down(&self, attempt: AttemptId) {
        self.emit(attempt, TunnelEventKind::TornDown);
    }
}
