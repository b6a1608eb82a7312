//! Server scoring and selection
//!
//! Pure functions over a catalog [`Snapshot`]: they never mutate anything, so
//! any number of callers may run them concurrently against a shared snapshot.

use crate::catalog::{Feature, Server, Snapshot, Tier, VpnCountry};
use crate::profile::ServerWrapper;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Feature constraints applied on top of the tier check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Only secure-core servers when on, never secure-core servers when off
    pub secure_core: bool,
    /// Every listed feature must be supported
    #[serde(default)]
    pub required: Vec<Feature>,
    /// Server ids that must not be picked
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl FeatureFlags {
    pub fn secure_core(enabled: bool) -> Self {
        Self {
            secure_core: enabled,
            ..Default::default()
        }
    }
}

/// Whether `server` may be selected at `tier` under `flags`
pub fn is_eligible(server: &Server, tier: Tier, flags: &FeatureFlags) -> bool {
    server.online
        && server.min_tier <= tier
        && server.is_secure_core() == flags.secure_core
        && flags.required.iter().all(|f| server.has_feature(*f))
        && !flags.excluded.iter().any(|id| *id == server.id)
}

/// Score order with server id as the tie-breaker
fn by_score(a: &Arc<Server>, b: &Arc<Server>) -> Ordering {
    a.score.total_cmp(&b.score).then_with(|| a.id.cmp(&b.id))
}

fn fastest<'a>(servers: impl Iterator<Item = &'a Arc<Server>>) -> Option<Arc<Server>> {
    servers.min_by(|a, b| by_score(a, b)).cloned()
}

fn eligible<'a>(
    servers: impl Iterator<Item = &'a Arc<Server>> + 'a,
    tier: Tier,
    flags: &'a FeatureFlags,
) -> impl Iterator<Item = &'a Arc<Server>> + 'a {
    servers.filter(move |s| is_eligible(s, tier, flags))
}

/// Resolve `wrapper` to a concrete server using the process-wide RNG
pub fn select_server(
    wrapper: &ServerWrapper,
    snapshot: &Snapshot,
    tier: Tier,
    flags: &FeatureFlags,
) -> Option<Arc<Server>> {
    select_server_with_rng(wrapper, snapshot, tier, flags, &mut rand::rng())
}

/// Resolve `wrapper` with an explicit random source
pub fn select_server_with_rng<R: Rng + ?Sized>(
    wrapper: &ServerWrapper,
    snapshot: &Snapshot,
    tier: Tier,
    flags: &FeatureFlags,
    rng: &mut R,
) -> Option<Arc<Server>> {
    match wrapper {
        ServerWrapper::Server { id } => snapshot
            .server(id)
            .filter(|s| is_eligible(s, tier, flags))
            .cloned(),
        ServerWrapper::FastestInCountry { country } => {
            best_score_server(snapshot.country(country)?, tier, flags)
        }
        ServerWrapper::RandomInCountry { country } => {
            let country = snapshot.country(country)?;
            let candidates: Vec<_> = eligible(country.servers.iter(), tier, flags).collect();
            candidates.choose(rng).map(|s| Arc::clone(s))
        }
        ServerWrapper::Fastest => fastest(eligible(snapshot.servers(), tier, flags)),
        ServerWrapper::Random => {
            let candidates: Vec<_> = eligible(snapshot.servers(), tier, flags).collect();
            candidates.choose(rng).map(|s| Arc::clone(s))
        }
    }
}

/// Lowest-score eligible server of a country
pub fn best_score_server(
    country: &VpnCountry,
    tier: Tier,
    flags: &FeatureFlags,
) -> Option<Arc<Server>> {
    fastest(eligible(country.servers.iter(), tier, flags))
}
