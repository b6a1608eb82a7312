//! In-process tunnel driver for interactive sessions
//!
//! Reports `Established` after a fixed delay, fails for servers that were
//! marked unreachable, and can simulate a dropped tunnel.

use super::{AttemptId, TunnelDriver, TunnelError, TunnelEventSink};
use crate::catalog::Server;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_millis(800);
const TEARDOWN_DELAY: Duration = Duration::from_millis(100);

pub struct SimulatedDriver {
    sink: TunnelEventSink,
    connect_delay: Duration,
    unreachable: Mutex<HashSet<String>>,
    active: Mutex<Option<(AttemptId, JoinHandle<()>)>>,
}

impl SimulatedDriver {
    pub fn new(sink: TunnelEventSink) -> Self {
        Self::with_delay(sink, DEFAULT_CONNECT_DELAY)
    }

    pub fn with_delay(sink: TunnelEventSink, connect_delay: Duration) -> Self {
        Self {
            sink,
            connect_delay,
            unreachable: Mutex::new(HashSet::new()),
            active: Mutex::new(None),
        }
    }

    /// Future establish attempts to `server_id` fail
    pub fn mark_unreachable(&self, server_id: &str) {
        if let Ok(mut set) = self.unreachable.lock() {
            set.insert(server_id.to_string());
        }
    }

    /// Report the current tunnel as lost
    pub fn drop_connection(&self) {
        let attempt = self
            .active
            .lock()
            .ok()
            .and_then(|mut active| active.take())
            .map(|(attempt, task)| {
                task.abort();
                attempt
            });
        if let Some(attempt) = attempt {
            info!("Simulating lost tunnel for attempt {}", attempt);
            self.sink.lost(attempt);
        }
    }
}

#[async_trait]
impl TunnelDriver for SimulatedDriver {
    async fn establish(&self, attempt: AttemptId, server: &Server) -> Result<(), TunnelError> {
        let unreachable = self
            .unreachable
            .lock()
            .map(|set| set.contains(&server.id))
            .unwrap_or(false);

        debug!("Establishing simulated tunnel {} to {}", attempt, server.id);
        let sink = self.sink.clone();
        let delay = self.connect_delay;
        let server_id = server.id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if unreachable {
                sink.failed(attempt, format!("{} did not respond", server_id));
            } else {
                sink.established(attempt);
            }
        });

        let mut active = self.active.lock().map_err(|_| TunnelError::Unavailable)?;
        if let Some((_, previous)) = active.replace((attempt, task)) {
            previous.abort();
        }
        Ok(())
    }

    async fn teardown(&self, attempt: AttemptId) -> Result<(), TunnelError> {
        let previous = self
            .active
            .lock()
            .map_err(|_| TunnelError::Unavailable)?
            .take();
        if let Some((_, task)) = previous {
            task.abort();
        }

        debug!("Tearing down simulated tunnel {}", attempt);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TEARDOWN_DELAY).await;
            sink.torn_down(attempt);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::tests::server;
    use crate::monitor::actor::Input;
    use crate::tunnel::TunnelEventKind;
    use tokio::sync::mpsc;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Input>) -> (AttemptId, TunnelEventKind) {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Input::Event(e))) => (e.attempt, e.kind),
            _ => panic!("Expected tunnel event"),
        }
    }

    #[tokio::test]
    async fn test_establish_then_teardown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver =
            SimulatedDriver::with_delay(TunnelEventSink::new(tx), Duration::from_millis(10));

        driver.establish(AttemptId(1), &server("US#1", "US", 1.0, 0)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, (AttemptId(1), TunnelEventKind::Established));

        driver.teardown(AttemptId(1)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, (AttemptId(1), TunnelEventKind::TornDown));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver =
            SimulatedDriver::with_delay(TunnelEventSink::new(tx), Duration::from_millis(10));
        driver.mark_unreachable("US#1");

        driver.establish(AttemptId(4), &server("US#1", "US", 1.0, 0)).await.unwrap();
        let (attempt, kind) = next_event(&mut rx).await;
        assert_eq!(attempt, AttemptId(4));
        assert!(matches!(kind, TunnelEventKind::Failed(_)));
    }

    #[tokio::test]
    async fn test_teardown_aborts_pending_establish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver =
            SimulatedDriver::with_delay(TunnelEventSink::new(tx), Duration::from_millis(300));

        driver.establish(AttemptId(2), &server("US#1", "US", 1.0, 0)).await.unwrap();
        driver.teardown(AttemptId(2)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, (AttemptId(2), TunnelEventKind::TornDown));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_connection_reports_lost() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver =
            SimulatedDriver::with_delay(TunnelEventSink::new(tx), Duration::from_millis(10));

        driver.establish(AttemptId(5), &server("US#1", "US", 1.0, 0)).await.unwrap();
        next_event(&mut rx).await;
        driver.drop_connection();
        assert_eq!(next_event(&mut rx).await, (AttemptId(5), TunnelEventKind::Lost));
    }
}
