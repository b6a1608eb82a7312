//! Profile and server-wrapper types

use crate::catalog::{Server, Snapshot};
use super::ProfileError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a profile resolves to a concrete server
///
/// Equality is the identity used for recents: two independently created
/// "fastest in FR" wrappers are the same target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWrapper {
    Server { id: String },
    FastestInCountry { country: String },
    RandomInCountry { country: String },
    Fastest,
    Random,
}

impl ServerWrapper {
    pub fn server(id: impl Into<String>) -> Self {
        ServerWrapper::Server { id: id.into() }
    }

    pub fn fastest_in(country: impl Into<String>) -> Self {
        ServerWrapper::FastestInCountry {
            country: country.into(),
        }
    }

    pub fn random_in(country: impl Into<String>) -> Self {
        ServerWrapper::RandomInCountry {
            country: country.into(),
        }
    }

    /// Country this wrapper targets; exact servers are looked up in `snapshot`
    pub fn country<'a>(&'a self, snapshot: &'a Snapshot) -> Option<&'a str> {
        match self {
            ServerWrapper::Server { id } => snapshot.server(id).map(|s| s.country.as_str()),
            ServerWrapper::FastestInCountry { country }
            | ServerWrapper::RandomInCountry { country } => Some(country.as_str()),
            ServerWrapper::Fastest | ServerWrapper::Random => None,
        }
    }
}

impl fmt::Display for ServerWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerWrapper::Server { id } => write!(f, "server {}", id),
            ServerWrapper::FastestInCountry { country } => write!(f, "fastest in {}", country),
            ServerWrapper::RandomInCountry { country } => write!(f, "random in {}", country),
            ServerWrapper::Fastest => write!(f, "fastest"),
            ServerWrapper::Random => write!(f, "random"),
        }
    }
}

/// Command-line form: `fastest`, `random`, `fastest:FR`, `random:FR`, `server:FR#3`
impl FromStr for ServerWrapper {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let wrapper = match s.split_once(':') {
            None if s.eq_ignore_ascii_case("fastest") => ServerWrapper::Fastest,
            None if s.eq_ignore_ascii_case("random") => ServerWrapper::Random,
            Some((kind, arg)) if !arg.trim().is_empty() => {
                let arg = arg.trim();
                match kind.to_ascii_lowercase().as_str() {
                    "fastest" => ServerWrapper::fastest_in(arg.to_ascii_uppercase()),
                    "random" => ServerWrapper::random_in(arg.to_ascii_uppercase()),
                    "server" => ServerWrapper::server(arg),
                    _ => return Err(ProfileError::InvalidWrapper(s.to_string())),
                }
            }
            _ => return Err(ProfileError::InvalidWrapper(s.to_string())),
        };
        Ok(wrapper)
    }
}

/// A named, resolvable connection target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub wrapper: ServerWrapper,
    /// Created for a one-off connection and never written to the saved list
    #[serde(default)]
    pub temporary: bool,
}

impl Profile {
    pub fn new(name: impl Into<String>, wrapper: ServerWrapper) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            wrapper,
            temporary: false,
        }
    }

    /// Ephemeral profile pinned to one server
    pub fn temporary(server: &Server) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: server.name.clone(),
            wrapper: ServerWrapper::server(&server.id),
            temporary: true,
        }
    }

    /// Profile used when no default connection is set
    pub fn fastest() -> Self {
        Self {
            id: Uuid::nil(),
            name: "Fastest".to_string(),
            wrapper: ServerWrapper::Fastest,
            temporary: true,
        }
    }

    /// Same target, ignoring id and name
    pub fn same_target(&self, other: &Profile) -> bool {
        self.wrapper == other.wrapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::tests::server;

    #[test]
    fn test_wrapper_serde_tagged() {
        let wrapper = ServerWrapper::fastest_in("FR");
        let json = serde_json::to_string(&wrapper).unwrap();
        assert_eq!(json, r#"{"type":"fastest_in_country","country":"FR"}"#);

        let back: ServerWrapper = serde_json::from_str(r#"{"type":"fastest"}"#).unwrap();
        assert_eq!(back, ServerWrapper::Fastest);
    }

    #[test]
    fn test_independent_profiles_share_target() {
        let a = Profile::new("France", ServerWrapper::fastest_in("FR"));
        let b = Profile::new("FR fast", ServerWrapper::fastest_in("FR"));
        assert_ne!(a.id, b.id);
        assert!(a.same_target(&b));
        assert!(!a.same_target(&Profile::new("FR random", ServerWrapper::random_in("FR"))));
    }

    #[test]
    fn test_temporary_profile_wraps_server() {
        let server = server("CH#4", "CH", 1.0, 0);
        let profile = Profile::temporary(&server);
        assert!(profile.temporary);
        assert_eq!(profile.name, "CH#4");
        assert_eq!(profile.wrapper, ServerWrapper::server("CH#4"));
    }

    #[test]
    fn test_wrapper_country() {
        let snapshot = Snapshot::from_servers(vec![server("CH#4", "CH", 1.0, 0)]);
        assert_eq!(ServerWrapper::server("CH#4").country(&snapshot), Some("CH"));
        assert_eq!(ServerWrapper::server("XX#1").country(&snapshot), None);
        assert_eq!(ServerWrapper::random_in("SE").country(&snapshot), Some("SE"));
        assert_eq!(ServerWrapper::Fastest.country(&snapshot), None);
    }

    #[test]
    fn test_wrapper_display() {
        assert_eq!(ServerWrapper::server("US#1").to_string(), "server US#1");
        assert_eq!(ServerWrapper::random_in("DE").to_string(), "random in DE");
        assert_eq!(ServerWrapper::Random.to_string(), "random");
    }

    #[test]
    fn test_wrapper_from_str() {
        assert_eq!("fastest".parse::<ServerWrapper>().unwrap(), ServerWrapper::Fastest);
        assert_eq!("Random".parse::<ServerWrapper>().unwrap(), ServerWrapper::Random);
        assert_eq!(
            "fastest:fr".parse::<ServerWrapper>().unwrap(),
            ServerWrapper::fastest_in("FR")
        );
        assert_eq!(
            "server:CH#4".parse::<ServerWrapper>().unwrap(),
            ServerWrapper::server("CH#4")
        );
        assert!("server:".parse::<ServerWrapper>().is_err());
        assert!("nearest:FR".parse::<ServerWrapper>().is_err());
        assert!("FR".parse::<ServerWrapper>().is_err());
    }
}
