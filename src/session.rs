//! Interactive session
//!
//! Wires the components together and drives them from stdin. The tunnel is
//! simulated, so a session exercises the full connect/disconnect lifecycle
//! without touching the network.
//!
//! Commands:
//! - `connect <profile|country|server-id|wrapper>`
//! - `quick`, `disconnect`, `status`, `refresh`
//! - `drop` (simulate a lost tunnel), `help`, `quit`

use crate::catalog::{
    CatalogError, CatalogSource, CatalogUpdater, JsonFileSource, Server, ServerCatalog,
    UpdaterHandle,
};
use crate::config::{Config, ConfigError};
use crate::home::{HomeController, QuickConnectAction};
use crate::monitor::{ConnectError, ConnectionMonitor, ConnectionPolicy, MonitorBuilder, VpnStatus};
use crate::profile::{
    FileStore, KeyValueStore, Profile, ProfileError, ProfileManager, RecentsManager, ServerWrapper,
    StoreError,
};
use crate::selection::FeatureFlags;
use crate::tunnel::simulated::DEFAULT_CONNECT_DELAY;
use crate::tunnel::SimulatedDriver;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Storage error: {0}")]
    StoreError(#[from] StoreError),
    #[error("{0}")]
    ProfileError(#[from] ProfileError),
    #[error("{0}")]
    ConnectError(#[from] ConnectError),
    #[error("{0}")]
    CatalogError(#[from] CatalogError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unknown command '{0}', type 'help' for a list")]
    UnknownCommand(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("No profile, country or server matches '{0}'")]
    UnknownTarget(String),
}

/// One line of session input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Quick,
    Disconnect,
    Status,
    Refresh,
    Drop,
    Help,
    Quit,
}

impl Command {
    /// Parse a line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Command>, SessionError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "connect" | "c" => {
                if rest.is_empty() {
                    return Err(SessionError::MissingArgument("connect"));
                }
                Command::Connect(rest.to_string())
            }
            "quick" | "q" => Command::Quick,
            "disconnect" | "d" => Command::Disconnect,
            "status" | "s" => Command::Status,
            "refresh" => Command::Refresh,
            "drop" => Command::Drop,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(SessionError::UnknownCommand(word.to_string())),
        };
        Ok(Some(command))
    }
}

const HELP: &str = "\
Commands:
  connect <target>  connect to a profile name, country code, server id or
                    wrapper (fastest, random, fastest:CC, random:CC, server:ID)
  quick             quick connect, or disconnect when connected
  disconnect        disconnect or cancel a connection attempt
  status            show connection state and recent connections
  refresh           reload the server catalog
  drop              simulate a lost tunnel
  quit              disconnect and exit";

/// Composition root for a running client
pub struct Conductor {
    home: HomeController,
    profiles: Arc<ProfileManager>,
    driver: Arc<SimulatedDriver>,
    updater: UpdaterHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Conductor {
    /// Build from config: file-backed profiles and the JSON catalog file
    pub async fn from_config(config: &Config) -> Result<Self, SessionError> {
        let dir = config.storage.resolve_dir();
        info!("Using storage directory {}", dir.display());
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir)?);
        let source = Arc::new(JsonFileSource::new(&config.catalog.path));
        Self::start(config, store, source, DEFAULT_CONNECT_DELAY).await
    }

    pub async fn start(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn CatalogSource>,
        connect_delay: Duration,
    ) -> Result<Self, SessionError> {
        let profiles = Arc::new(ProfileManager::load(store.clone())?);
        let recents = Arc::new(RecentsManager::load(store, config.recents.capacity)?);

        let catalog = ServerCatalog::empty();
        let updater =
            CatalogUpdater::new(source, catalog.clone(), config.catalog.refresh_interval())
                .with_tier_hint(config.account.tier)
                .spawn();
        if let Err(e) = updater.refresh_now().await {
            warn!("Initial catalog load failed: {}", e);
        }

        let policy = ConnectionPolicy {
            tier: config.account.tier,
            features: FeatureFlags::secure_core(config.features.secure_core),
        };
        let builder = MonitorBuilder::new(catalog, policy);
        let driver = Arc::new(SimulatedDriver::with_delay(builder.event_sink(), connect_delay));
        let monitor = builder.spawn(driver.clone());

        let tasks = vec![
            recents.clone().track(monitor.transitions()),
            updater.refresh_on(monitor.state_changes(), |status: &VpnStatus| {
                status.state.is_connected()
            }),
        ];

        let home = HomeController::new(monitor, profiles.clone(), recents)
            .with_streaming_logos(config.features.display_streaming_logos);

        Ok(Self {
            home,
            profiles,
            driver,
            updater,
            tasks,
        })
    }

    pub fn home(&self) -> &HomeController {
        &self.home
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        self.home.monitor()
    }

    /// Run one command and return what to print
    pub async fn execute(&self, command: Command) -> Result<String, SessionError> {
        match command {
            Command::Connect(target) => {
                let server = self.connect(&target)?;
                Ok(format!("Connecting to {} ({})", server.name, server.country))
            }
            Command::Quick => match self.home.quick_connect()? {
                QuickConnectAction::Connecting(server) => {
                    Ok(format!("Connecting to {} ({})", server.name, server.country))
                }
                QuickConnectAction::Disconnecting => Ok("Disconnecting".to_string()),
            },
            Command::Disconnect => {
                let label = if self.monitor().state().is_establishing_connection() {
                    "Cancelling"
                } else {
                    "Disconnecting"
                };
                self.home.disconnect()?;
                Ok(label.to_string())
            }
            Command::Status => Ok(self.status_report()),
            Command::Refresh => {
                self.updater.refresh_now().await?;
                let snapshot = self.monitor().catalog().snapshot();
                Ok(format!(
                    "Catalog: {} countries, {} servers",
                    snapshot.countries().len(),
                    snapshot.server_count()
                ))
            }
            Command::Drop => {
                self.driver.drop_connection();
                Ok("Dropping tunnel".to_string())
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
        }
    }

    /// Resolve a free-form target: saved profile, country, server, then wrapper
    fn connect(&self, target: &str) -> Result<Arc<Server>, SessionError> {
        if let Some(profile) = self.profiles.find_by_name(target) {
            return Ok(self.home.connect_profile(profile)?);
        }

        let snapshot = self.monitor().catalog().snapshot();
        let code = target.to_ascii_uppercase();
        if snapshot.country(&code).is_some() {
            return Ok(self.home.connect_country(Some(&code))?);
        }
        if let Some(server) = snapshot.server(target) {
            return Ok(self.monitor().connect(server.clone())?);
        }

        let wrapper: ServerWrapper = target
            .parse()
            .map_err(|_| SessionError::UnknownTarget(target.to_string()))?;
        let mut profile = Profile::new(wrapper.to_string(), wrapper);
        profile.temporary = true;
        Ok(self.home.connect_profile(profile)?)
    }

    pub fn status_report(&self) -> String {
        let status = self.monitor().status();
        let mut out = format!("Status: {}", status.state);
        if let Some(error) = &status.error {
            let _ = write!(out, "\nLast error: {}", error);
        }
        if let Some(country) = self.home.connected_country() {
            if let Some(services) = self.home.streaming_services(&country) {
                let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
                if !names.is_empty() {
                    let _ = write!(out, "\nStreaming: {}", names.join(", "));
                }
            }
        }

        let recents = self.home.recent_connections();
        if !recents.is_empty() {
            out.push_str("\nRecent:");
            for recent in recents {
                let _ = write!(
                    out,
                    "\n  {} ({}) {}",
                    recent.profile.name,
                    recent.profile.wrapper,
                    recent.last_used.format("%Y-%m-%d %H:%M")
                );
            }
        }

        let stats = self.monitor().stats();
        if stats.stale_events() > 0 || stats.superseded_requests() > 0 {
            let _ = write!(
                out,
                "\nIgnored {} stale events, {} superseded requests",
                stats.stale_events(),
                stats.superseded_requests()
            );
        }
        out
    }

    /// Disconnect and stop every background task
    pub async fn shutdown(self) {
        self.monitor().shutdown().await;
        self.updater.shutdown();
        for task in self.tasks {
            task.abort();
        }
        debug!("Session stopped");
    }
}

fn describe(status: &VpnStatus) -> String {
    match &status.error {
        Some(error) => format!("[{}] {}", status.state, error),
        None => format!("[{}]", status.state),
    }
}

/// Run the interactive session until `quit`, end of input or Ctrl+C
pub async fn run(config: &Config) -> Result<(), SessionError> {
    let conductor = Conductor::from_config(config).await?;

    let mut changes = conductor.monitor().state_changes();
    let printer = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(status) => println!("{}", describe(&status)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => match conductor.execute(command).await {
                        Ok(output) => println!("{}", output),
                        Err(e) => println!("Error: {}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    conductor.shutdown().await;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::tests::server;
    use crate::catalog::{Snapshot, Tier};
    use crate::profile::MemoryStore;
    use async_trait::async_trait;

    struct StaticSource;

    #[async_trait]
    impl CatalogSource for StaticSource {
        async fn refresh_catalog(
            &self,
            _tier_hint: Option<Tier>,
        ) -> Result<Snapshot, CatalogError> {
            Ok(Snapshot::from_servers(vec![
                server("US#1", "US", 10.0, 0),
                server("US#2", "US", 5.0, 2),
                server("FR#1", "FR", 3.0, 0),
            ]))
        }
    }

    async fn conductor() -> Conductor {
        Conductor::start(
            &Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticSource),
            Duration::from_millis(10),
        )
        .await
        .unwrap()
    }

    async fn wait_for(conductor: &Conductor, f: impl Fn(&VpnStatus) -> bool) {
        let mut rx = conductor.monitor().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| f(s)))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(
            Command::parse("connect Home Office").unwrap(),
            Some(Command::Connect("Home Office".to_string()))
        );
        assert_eq!(Command::parse("QUICK").unwrap(), Some(Command::Quick));
        assert_eq!(Command::parse("d").unwrap(), Some(Command::Disconnect));
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Command::parse("connect"),
            Err(SessionError::MissingArgument("connect"))
        ));
        let err = Command::parse("teleport US").unwrap_err();
        assert_eq!(err.to_string(), "Unknown command 'teleport', type 'help' for a list");
    }

    #[tokio::test]
    async fn test_startup_loads_catalog() {
        let c = conductor().await;
        assert_eq!(c.monitor().catalog().snapshot().server_count(), 3);
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_country_then_disconnect() {
        let c = conductor().await;

        let output = c.execute(Command::Connect("us".to_string())).await.unwrap();
        assert_eq!(output, "Connecting to US#1 (US)");
        wait_for(&c, |s| s.state.is_connected()).await;
        assert!(c.status_report().starts_with("Status: connected to US#1"));

        c.execute(Command::Disconnect).await.unwrap();
        wait_for(&c, |s| s.state.is_disabled()).await;
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_by_profile_and_wrapper() {
        let c = conductor().await;
        c.profiles
            .save_profile(Profile::new("Paris", ServerWrapper::fastest_in("FR")))
            .unwrap();

        c.execute(Command::Connect("paris".to_string())).await.unwrap();
        wait_for(&c, |s| s.state.is_connected()).await;
        assert_eq!(c.monitor().state().profile().unwrap().name, "Paris");

        let output = c.execute(Command::Connect("fastest".to_string())).await.unwrap();
        assert_eq!(output, "Connecting to FR#1 (FR)");
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let c = conductor().await;
        let err = c.execute(Command::Connect("atlantis".to_string())).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownTarget(_)));

        let err = c.execute(Command::Connect("random:DE".to_string())).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ConnectError(ConnectError::NoServerAvailable(_))
        ));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_reports_lost_tunnel() {
        let c = conductor().await;
        c.execute(Command::Quick).await.unwrap();
        wait_for(&c, |s| s.state.is_connected()).await;

        c.execute(Command::Drop).await.unwrap();
        wait_for(&c, |s| s.error.is_some()).await;
        assert!(c.status_report().contains("Last error: Tunnel lost"));
        c.shutdown().await;
    }
}
