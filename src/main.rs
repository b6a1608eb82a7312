use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vpn_conductor::catalog::{CatalogSource, JsonFileSource};
use vpn_conductor::profile::{
    FileStore, KeyValueStore, ProfileError, ProfileManager, RecentsManager,
};
use vpn_conductor::selection::{is_eligible, select_server, FeatureFlags};
use vpn_conductor::{Config, Profile, ServerWrapper, Snapshot};

#[derive(Parser)]
#[command(name = "vpn-conductor")]
#[command(about = "Connection orchestration for a VPN client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./vpn-conductor.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default config file
    Init,
    /// List catalog countries and servers
    Servers {
        /// Only show this country
        #[arg(long)]
        country: Option<String>,
    },
    /// Show which server a selection resolves to
    ///
    /// Forms: fastest, random, fastest:CC, random:CC, server:ID
    Select { wrapper: ServerWrapper },
    /// Manage saved profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Show recent connections
    Recents,
    /// Interactive session with a simulated tunnel
    Run,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List saved profiles
    List,
    /// Save a new profile
    Add { name: String, wrapper: ServerWrapper },
    /// Rename a profile
    Rename { name: String, new_name: String },
    /// Delete a profile
    Delete { name: String },
    /// Use a profile for quick connect
    SetDefault { name: String },
    /// Quick connect to the fastest server again
    ClearDefault,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so session output stays readable; RUST_LOG overrides
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover()?,
    };

    match cli.command {
        Commands::Init => {
            info!("Generating default config...");
            let path = Config::local_path();
            Config::default().save(&path)?;
            println!("Created default config: {}", path.display());
        }
        Commands::Servers { country } => {
            let snapshot = load_catalog(&config).await?;
            print_servers(&snapshot, &config, country.as_deref());
        }
        Commands::Select { wrapper } => {
            let snapshot = load_catalog(&config).await?;
            let flags = FeatureFlags::secure_core(config.features.secure_core);
            match select_server(&wrapper, &snapshot, config.account.tier, &flags) {
                Some(server) => println!(
                    "{} -> {} ({}, score {:.2}, load {}%)",
                    wrapper, server.name, server.country, server.score, server.load
                ),
                None => println!("{} -> no server available", wrapper),
            }
        }
        Commands::Profiles { action } => {
            let profiles = ProfileManager::load(open_store(&config)?)?;
            manage_profiles(&profiles, action)?;
        }
        Commands::Recents => {
            let recents = RecentsManager::load(open_store(&config)?, config.recents.capacity)?;
            let entries = recents.recent_connections();
            if entries.is_empty() {
                println!("No recent connections");
            }
            for entry in entries {
                println!(
                    "{}  {} ({})",
                    entry.last_used.format("%Y-%m-%d %H:%M"),
                    entry.profile.name,
                    entry.profile.wrapper
                );
            }
        }
        Commands::Run => {
            vpn_conductor::session::run(&config).await?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(FileStore::new(config.storage.resolve_dir())?))
}

async fn load_catalog(config: &Config) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let source = JsonFileSource::new(&config.catalog.path);
    Ok(source.refresh_catalog(Some(config.account.tier)).await?)
}

fn print_servers(snapshot: &Snapshot, config: &Config, country: Option<&str>) {
    let flags = FeatureFlags::secure_core(config.features.secure_core);
    let tier = config.account.tier;
    let country = country.map(|c| c.to_ascii_uppercase());

    for entry in snapshot.countries() {
        if country.as_deref().is_some_and(|c| c != entry.code) {
            continue;
        }
        let access = if entry.has_accessible_server(tier) {
            ""
        } else {
            " [upgrade required]"
        };
        println!("{} - {}{}", entry.code, entry.name, access);
        for server in &entry.servers {
            let marker = if is_eligible(server, tier, &flags) {
                " "
            } else {
                "x"
            };
            println!(
                "  {} {:<12} score {:>6.2}  load {:>3}%  tier {}",
                marker, server.name, server.score, server.load, server.min_tier
            );
        }
    }
}

fn find_profile(profiles: &ProfileManager, name: &str) -> Result<Profile, ProfileError> {
    profiles
        .find_by_name(name)
        .ok_or_else(|| ProfileError::NotFoundByName(name.to_string()))
}

fn manage_profiles(profiles: &ProfileManager, action: ProfileAction) -> Result<(), ProfileError> {
    match action {
        ProfileAction::List => {
            let default = profiles.default_connection();
            let all = profiles.profiles();
            if all.is_empty() {
                println!("No saved profiles");
            }
            for profile in all {
                let marker = if default.as_ref().is_some_and(|d| d.id == profile.id) {
                    "*"
                } else {
                    " "
                };
                println!("{} {} ({})", marker, profile.name, profile.wrapper);
            }
        }
        ProfileAction::Add { name, wrapper } => {
            let profile = profiles.save_profile(Profile::new(name, wrapper))?;
            println!("Saved profile '{}' ({})", profile.name, profile.wrapper);
        }
        ProfileAction::Rename { name, new_name } => {
            let profile = find_profile(profiles, &name)?;
            let renamed = profiles.rename_profile(profile.id, &new_name)?;
            println!("Renamed '{}' to '{}'", name, renamed.name);
        }
        ProfileAction::Delete { name } => {
            let profile = find_profile(profiles, &name)?;
            profiles.delete_profile(profile.id)?;
            println!("Deleted profile '{}'", profile.name);
        }
        ProfileAction::SetDefault { name } => {
            let profile = find_profile(profiles, &name)?;
            profiles.set_default_connection(Some(profile.clone()))?;
            println!("Quick connect now uses '{}'", profile.name);
        }
        ProfileAction::ClearDefault => {
            profiles.set_default_connection(None)?;
            println!("Quick connect now uses the fastest server");
        }
    }
    Ok(())
}
