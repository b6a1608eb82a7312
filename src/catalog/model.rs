//! Server catalog data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Account entitlement level
///
/// Servers carry a minimum tier; a user may only use servers whose
/// requirement does not exceed their own tier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tier(pub u8);

impl Tier {
    pub const FREE: Tier = Tier(0);
    pub const BASIC: Tier = Tier(1);
    pub const PLUS: Tier = Tier(2);
    pub const VISIONARY: Tier = Tier(3);

    pub fn is_plus_or_above(self) -> bool {
        self >= Tier::PLUS
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Tier::FREE => write!(f, "free"),
            Tier::BASIC => write!(f, "basic"),
            Tier::PLUS => write!(f, "plus"),
            Tier::VISIONARY => write!(f, "visionary"),
            Tier(other) => write!(f, "tier-{}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    SecureCore,
    Streaming,
    P2p,
    Tor,
}

/// A single VPN server as published in a catalog snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    /// Exit country code (e.g. "US")
    pub country: String,
    /// Entry country; differs from `country` for secure-core servers
    #[serde(default)]
    pub entry_country: Option<String>,
    /// Lower is better
    pub score: f64,
    #[serde(default)]
    pub load: u8,
    #[serde(default)]
    pub min_tier: Tier,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub domain: String,
}

fn default_online() -> bool {
    true
}

impl Server {
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn is_secure_core(&self) -> bool {
        self.has_feature(Feature::SecureCore)
    }

    pub fn entry_country(&self) -> &str {
        self.entry_country.as_deref().unwrap_or(&self.country)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VpnCountry {
    pub code: String,
    pub name: String,
    pub servers: Vec<Arc<Server>>,
}

impl VpnCountry {
    /// Lowest score among online servers, ignoring tier
    pub fn best_score(&self) -> Option<f64> {
        self.servers
            .iter()
            .filter(|s| s.online)
            .map(|s| s.score)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn has_accessible_server(&self, tier: Tier) -> bool {
        self.servers.iter().any(|s| s.online && s.min_tier <= tier)
    }
}

/// A streaming service available through servers of a country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingService {
    pub name: String,
    pub icon: String,
    #[serde(default)]
    pub min_tier: Tier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingServices {
    #[serde(default)]
    pub resource_base_url: String,
    #[serde(default)]
    pub countries: HashMap<String, Vec<StreamingService>>,
}

impl StreamingServices {
    /// Services of `country` usable at `tier`, or `None` if the country has none listed
    pub fn filter(&self, tier: Tier, country: &str) -> Option<Vec<&StreamingService>> {
        let services = self.countries.get(country)?;
        Some(services.iter().filter(|s| s.min_tier <= tier).collect())
    }

    pub fn icon_url(&self, service: &StreamingService) -> String {
        format!(
            "{}/{}",
            self.resource_base_url.trim_end_matches('/'),
            service.icon.trim_start_matches('/')
        )
    }
}

/// Immutable point-in-time view of the server catalog
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    countries: Vec<VpnCountry>,
    index: HashMap<String, (usize, usize)>,
    streaming: StreamingServices,
    updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from a flat server list
    ///
    /// Servers are grouped by exit country, so every server lands in exactly
    /// one country. Duplicate ids keep the first occurrence.
    pub fn new(
        servers: Vec<Server>,
        country_names: &BTreeMap<String, String>,
        streaming: StreamingServices,
    ) -> Self {
        let mut grouped: BTreeMap<String, Vec<Arc<Server>>> = BTreeMap::new();
        let mut seen = std::collections::HashSet::new();
        for server in servers {
            if !seen.insert(server.id.clone()) {
                continue;
            }
            grouped
                .entry(server.country.clone())
                .or_default()
                .push(Arc::new(server));
        }

        let mut countries = Vec::with_capacity(grouped.len());
        let mut index = HashMap::new();
        for (ci, (code, servers)) in grouped.into_iter().enumerate() {
            for (si, server) in servers.iter().enumerate() {
                index.insert(server.id.clone(), (ci, si));
            }
            let name = country_names
                .get(&code)
                .cloned()
                .unwrap_or_else(|| code.clone());
            countries.push(VpnCountry {
                code,
                name,
                servers,
            });
        }

        Self {
            countries,
            index,
            streaming,
            updated_at: Utc::now(),
        }
    }

    pub fn from_servers(servers: Vec<Server>) -> Self {
        Self::new(servers, &BTreeMap::new(), StreamingServices::default())
    }

    pub fn empty() -> Self {
        Self::from_servers(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    pub fn countries(&self) -> &[VpnCountry] {
        &self.countries
    }

    pub fn country(&self, code: &str) -> Option<&VpnCountry> {
        self.countries.iter().find(|c| c.code == code)
    }

    pub fn server(&self, id: &str) -> Option<&Arc<Server>> {
        let &(ci, si) = self.index.get(id)?;
        self.countries.get(ci)?.servers.get(si)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Arc<Server>> {
        self.countries.iter().flat_map(|c| c.servers.iter())
    }

    pub fn server_count(&self) -> usize {
        self.index.len()
    }

    pub fn streaming(&self) -> &StreamingServices {
        &self.streaming
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
