//! Catalog sources
//!
//! A source produces a fresh [`Snapshot`] on request. The bundled
//! [`JsonFileSource`] reads a JSON server list from disk:
//!
//! ```json
//! {
//!   "countries": { "US": "United States" },
//!   "servers": [
//!     { "id": "US#1", "name": "US#1", "country": "US", "score": 1.2, "min_tier": 0 }
//!   ],
//!   "streaming": { "resource_base_url": "https://...", "countries": { "US": [] } }
//! }
//! ```

use super::model::{Server, Snapshot, StreamingServices, Tier};
use super::CatalogError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch a new snapshot; `tier_hint` lets a source trim servers the
    /// account can never use
    async fn refresh_catalog(&self, tier_hint: Option<Tier>) -> Result<Snapshot, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    countries: BTreeMap<String, String>,
    servers: Vec<Server>,
    #[serde(default)]
    streaming: StreamingServices,
}

/// Reads the catalog from a JSON file on every refresh
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Result<Snapshot, CatalogError> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Ok(Snapshot::new(file.servers, &file.countries, file.streaming))
    }
}

#[async_trait]
impl CatalogSource for JsonFileSource {
    async fn refresh_catalog(&self, tier_hint: Option<Tier>) -> Result<Snapshot, CatalogError> {
        debug!(
            "Reading catalog from {} (tier hint {:?})",
            self.path.display(),
            tier_hint
        );
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| {
                CatalogError::SourceUnavailable(format!("{}: {}", self.path.display(), e))
            })?;
        Self::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{
        "countries": { "US": "United States", "FR": "France" },
        "servers": [
            { "id": "US#1", "name": "US#1", "country": "US", "score": 10.0, "min_tier": 0 },
            { "id": "US#2", "name": "US#2", "country": "US", "score": 5.0, "min_tier": 2,
              "features": ["streaming"] },
            { "id": "CH-FR#1", "name": "CH-FR#1", "country": "FR", "entry_country": "CH",
              "score": 3.0, "features": ["secure_core"] }
        ],
        "streaming": {
            "resource_base_url": "https://cdn.example.net",
            "countries": { "US": [ { "name": "Flix", "icon": "flix.png", "min_tier": 2 } ] }
        }
    }"#;

    #[test]
    fn test_parse_catalog() {
        let snapshot = JsonFileSource::parse(CATALOG).unwrap();
        assert_eq!(snapshot.server_count(), 3);
        assert_eq!(snapshot.country("US").unwrap().name, "United States");

        let sc = snapshot.server("CH-FR#1").unwrap();
        assert!(sc.is_secure_core());
        assert_eq!(sc.entry_country(), "CH");
        assert!(snapshot.streaming().filter(Tier::PLUS, "US").is_some());
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = JsonFileSource::parse("{ not json");
        assert!(matches!(result, Err(CatalogError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_refresh_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, CATALOG).unwrap();

        let source = JsonFileSource::new(&path);
        let snapshot = source.refresh_catalog(Some(Tier::FREE)).await.unwrap();
        assert_eq!(snapshot.countries().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_missing_file() {
        let source = JsonFileSource::new("/nonexistent/servers.json");
        let result = source.refresh_catalog(None).await;
        assert!(matches!(result, Err(CatalogError::SourceUnavailable(_))));
    }
}
