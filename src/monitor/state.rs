//! Published connection state

use crate::catalog::Server;
use crate::profile::Profile;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Connection state machine
///
/// `Disabled` is the rest state every error path returns to.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    /// No tunnel and no attempt in progress
    #[default]
    Disabled,
    /// Tunnel requested for `profile`, resolved to `server`
    Connecting {
        profile: Profile,
        server: Arc<Server>,
    },
    /// Tunnel up
    Connected {
        profile: Profile,
        server: Arc<Server>,
    },
    /// Teardown requested, waiting for the driver to confirm
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disabled => "disabled",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_establishing_connection(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ConnectionState::Disabled)
    }

    /// Server being connected to, or connected to
    pub fn server(&self) -> Option<&Arc<Server>> {
        match self {
            ConnectionState::Connecting { server, .. }
            | ConnectionState::Connected { server, .. } => Some(server),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ConnectionState::Connecting { profile, .. }
            | ConnectionState::Connected { profile, .. } => Some(profile),
            _ => None,
        }
    }

    /// Whether a connect to (`profile`, `server`) would reach the current target
    ///
    /// Equivalent means the same resolved server or the same wrapper, so a
    /// repeated "random in X" request does not hop servers.
    pub fn targets(&self, profile: &Profile, server: &Server) -> bool {
        match (self.profile(), self.server()) {
            (Some(p), Some(s)) => s.id == server.id || p.same_target(profile),
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting { profile, server } => {
                write!(f, "connecting to {} ({})", server.name, profile.wrapper)
            }
            ConnectionState::Connected { profile, server } => {
                write!(f, "connected to {} ({})", server.name, profile.wrapper)
            }
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Why the last connection ended in `Disabled`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Tunnel failed: {0}")]
    TunnelFailed(String),
    #[error("Tunnel lost")]
    TunnelLost,
}

/// What observers receive on every transition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VpnStatus {
    pub state: ConnectionState,
    /// Set only on the `Disabled` transition caused by a failure
    pub error: Option<ConnectionError>,
}

impl VpnStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self { state, error: None }
    }

    pub fn failed(error: ConnectionError) -> Self {
        Self {
            state: ConnectionState::Disabled,
            error: Some(error),
        }
    }
}
