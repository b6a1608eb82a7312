//! Home actions
//!
//! The operations a client's home screen drives: quick connect, connecting to
//! a country, default-country policy and streaming-service listings. Nothing
//! here renders anything; it only combines the monitor, catalog and profile
//! components.

use crate::catalog::{Server, VpnCountry};
use crate::monitor::{ConnectError, ConnectionMonitor};
use crate::profile::{
    Profile, ProfileError, ProfileManager, RecentConnection, RecentsManager, ServerWrapper,
};
use crate::selection::best_score_server;
use std::sync::Arc;
use tracing::info;

/// What quick connect ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum QuickConnectAction {
    Connecting(Arc<Server>),
    Disconnecting,
}

/// Label for the button that stops a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    Cancel,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingServiceInfo {
    pub name: String,
    pub icon_url: String,
}

pub struct HomeController {
    monitor: ConnectionMonitor,
    profiles: Arc<ProfileManager>,
    recents: Arc<RecentsManager>,
    display_streaming_logos: bool,
}

impl HomeController {
    pub fn new(
        monitor: ConnectionMonitor,
        profiles: Arc<ProfileManager>,
        recents: Arc<RecentsManager>,
    ) -> Self {
        Self {
            monitor,
            profiles,
            recents,
            display_streaming_logos: true,
        }
    }

    pub fn with_streaming_logos(mut self, enabled: bool) -> Self {
        self.display_streaming_logos = enabled;
        self
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Disconnect when connected, otherwise connect to the default connection
    pub fn quick_connect(&self) -> Result<QuickConnectAction, ConnectError> {
        if self.monitor.is_connected() {
            self.monitor.disconnect()?;
            return Ok(QuickConnectAction::Disconnecting);
        }
        let profile = self.profiles.quick_connect_profile();
        info!("Quick connect to {}", profile.wrapper);
        let server = self.monitor.connect(profile)?;
        Ok(QuickConnectAction::Connecting(server))
    }

    /// Connect to the best server of `country`, or the default connection
    pub fn connect_country(&self, country: Option<&str>) -> Result<Arc<Server>, ConnectError> {
        let Some(code) = country else {
            return self.monitor.connect(self.profiles.quick_connect_profile());
        };

        let snapshot = self.monitor.catalog().snapshot();
        let policy = self.monitor.policy();
        let server = snapshot
            .country(code)
            .and_then(|c| best_score_server(c, policy.tier, &policy.features))
            .ok_or_else(|| ConnectError::NoServerAvailable(ServerWrapper::fastest_in(code)))?;

        let profile = self.profiles.get_or_create_temp_profile(&server);
        self.monitor.connect(profile)
    }

    pub fn connect_profile(&self, profile: Profile) -> Result<Arc<Server>, ConnectError> {
        self.monitor.connect(profile)
    }

    pub fn disconnect(&self) -> Result<(), ConnectError> {
        self.monitor.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Connect buttons are hidden for the country being connected to
    pub fn show_connect_buttons(&self, country: &str) -> bool {
        !self.monitor.is_connecting_to_country(country)
    }

    pub fn disconnect_action(&self, country: &str) -> DisconnectAction {
        if !self.show_connect_buttons(country)
            && self.monitor.state().is_establishing_connection()
        {
            DisconnectAction::Cancel
        } else {
            DisconnectAction::Disconnect
        }
    }

    /// Country code of the connected server
    pub fn connected_country(&self) -> Option<String> {
        let state = self.monitor.state();
        if state.is_connected() {
            state.server().map(|s| s.country.clone())
        } else {
            None
        }
    }

    /// Server quick connect currently stands for
    pub fn quick_connect_server(&self) -> Option<Arc<Server>> {
        if self.monitor.is_connected() {
            self.monitor.connecting_to_server()
        } else {
            self.monitor
                .resolve(&self.profiles.quick_connect_profile())
                .ok()
        }
    }

    pub fn recent_connections(&self) -> Vec<RecentConnection> {
        self.recents.recent_connections()
    }

    pub fn is_default_country(&self, country: &VpnCountry) -> bool {
        let snapshot = self.monitor.catalog().snapshot();
        self.profiles
            .default_connection()
            .is_some_and(|p| p.wrapper.country(&snapshot) == Some(country.code.as_str()))
    }

    /// Make "fastest in `country`" the default, or clear the default
    pub fn set_default_country(
        &self,
        checked: bool,
        country: &VpnCountry,
    ) -> Result<(), ProfileError> {
        let profile = checked
            .then(|| Profile::new(&country.name, ServerWrapper::fastest_in(&country.code)));
        self.profiles.set_default_connection(profile)
    }

    pub fn have_access_to_streaming(&self) -> bool {
        self.monitor.policy().tier.is_plus_or_above()
    }

    /// Streaming services of `country` usable at the account tier
    ///
    /// `None` when logos are disabled or the country lists no services.
    pub fn streaming_services(&self, country: &str) -> Option<Vec<StreamingServiceInfo>> {
        if !self.display_streaming_logos {
            return None;
        }
        let snapshot = self.monitor.catalog().snapshot();
        let streaming = snapshot.streaming();
        let services = streaming.filter(self.monitor.policy().tier, country)?;
        Some(
            services
                .into_iter()
                .map(|s| StreamingServiceInfo {
                    name: s.name.clone(),
                    icon_url: streaming.icon_url(s),
                })
                .collect(),
        )
    }
}
