//! Profiles, the default connection and recent connections

pub mod manager;
pub mod model;
pub mod recents;
pub mod store;

pub use manager::ProfileManager;
pub use model::{Profile, ServerWrapper};
pub use recents::{RecentConnection, RecentsManager, DEFAULT_RECENTS_CAPACITY};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Storage error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Profile not found: {0}")]
    NotFound(Uuid),
    #[error("No profile named '{0}'")]
    NotFoundByName(String),
    #[error("A profile named '{0}' already exists")]
    DuplicateName(String),
    #[error("Profile name must not be empty")]
    EmptyName,
    #[error("Invalid selection '{0}' (use fastest, random, fastest:CC, random:CC or server:ID)")]
    InvalidWrapper(String),
}
