//! Saved profiles and the default connection

use super::model::{Profile, ServerWrapper};
use super::store::{load_json, store_json, KeyValueStore};
use super::ProfileError;
use crate::catalog::Server;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

const PROFILES_KEY: &str = "profiles";
const DEFAULT_CONNECTION_KEY: &str = "default_connection";

#[derive(Debug, Default)]
struct ProfileData {
    profiles: Vec<Profile>,
    default_connection: Option<Profile>,
}

/// Owns the saved profile list and the default connection
///
/// Every mutation is written to the store before it becomes visible, so a
/// failed write leaves both the store and the in-memory view unchanged.
pub struct ProfileManager {
    store: Arc<dyn KeyValueStore>,
    data: Mutex<ProfileData>,
}

impl ProfileManager {
    /// Read profiles and default connection from `store`
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, ProfileError> {
        let profiles: Vec<Profile> = load_json(store.as_ref(), PROFILES_KEY)?.unwrap_or_default();
        let default_connection: Option<Profile> =
            load_json(store.as_ref(), DEFAULT_CONNECTION_KEY)?;
        debug!(
            "Loaded {} profiles, default connection: {:?}",
            profiles.len(),
            default_connection.as_ref().map(|p| &p.name)
        );
        Ok(Self {
            store,
            data: Mutex::new(ProfileData {
                profiles,
                default_connection,
            }),
        })
    }

    fn data(&self) -> MutexGuard<'_, ProfileData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.data().profiles.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Profile> {
        self.data().profiles.iter().find(|p| p.id == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Profile> {
        self.data()
            .profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Save a new profile or overwrite the one with the same id
    pub fn save_profile(&self, mut profile: Profile) -> Result<Profile, ProfileError> {
        let name = profile.name.trim();
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        profile.name = name.to_string();
        profile.temporary = false;

        let mut data = self.data();
        if data
            .profiles
            .iter()
            .any(|p| p.id != profile.id && p.name.eq_ignore_ascii_case(&profile.name))
        {
            return Err(ProfileError::DuplicateName(profile.name));
        }

        let mut profiles = data.profiles.clone();
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile.clone(),
            None => profiles.push(profile.clone()),
        }
        store_json(self.store.as_ref(), PROFILES_KEY, &profiles)?;
        data.profiles = profiles;

        // The default connection follows edits of the profile it points at
        if data.default_connection.as_ref().is_some_and(|d| d.id == profile.id) {
            store_json(self.store.as_ref(), DEFAULT_CONNECTION_KEY, &profile)?;
            data.default_connection = Some(profile.clone());
            debug!("Default connection updated to {}", profile.wrapper);
        }

        info!("Saved profile '{}' ({})", profile.name, profile.wrapper);
        Ok(profile)
    }

    pub fn rename_profile(&self, id: Uuid, name: &str) -> Result<Profile, ProfileError> {
        let mut profile = self.get(id).ok_or(ProfileError::NotFound(id))?;
        profile.name = name.to_string();
        self.save_profile(profile)
    }

    /// Delete a saved profile; clears the default connection if it was this profile
    pub fn delete_profile(&self, id: Uuid) -> Result<Profile, ProfileError> {
        let mut data = self.data();
        let position = data
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or(ProfileError::NotFound(id))?;

        let mut profiles = data.profiles.clone();
        let removed = profiles.remove(position);
        store_json(self.store.as_ref(), PROFILES_KEY, &profiles)?;
        data.profiles = profiles;

        if data.default_connection.as_ref().is_some_and(|d| d.id == id) {
            self.store.remove(DEFAULT_CONNECTION_KEY)?;
            data.default_connection = None;
            info!("Deleted profile was the default connection, default cleared");
        }

        info!("Deleted profile '{}'", removed.name);
        Ok(removed)
    }

    /// Explicitly configured default, if any
    pub fn default_connection(&self) -> Option<Profile> {
        self.data().default_connection.clone()
    }

    /// Target for quick connect: the default, or "fastest" when none is set
    pub fn quick_connect_profile(&self) -> Profile {
        self.default_connection().unwrap_or_else(Profile::fastest)
    }

    /// Replace the default connection in one step
    pub fn set_default_connection(&self, profile: Option<Profile>) -> Result<(), ProfileError> {
        let mut data = self.data();
        match &profile {
            Some(p) => store_json(self.store.as_ref(), DEFAULT_CONNECTION_KEY, p)?,
            None => self.store.remove(DEFAULT_CONNECTION_KEY)?,
        }
        info!(
            "Default connection set to {}",
            profile
                .as_ref()
                .map(|p| p.wrapper.to_string())
                .unwrap_or_else(|| "fastest".to_string())
        );
        data.default_connection = profile;
        Ok(())
    }

    /// Saved profile pinned to `server`, or a new temporary one
    pub fn get_or_create_temp_profile(&self, server: &Server) -> Profile {
        let wrapper = ServerWrapper::server(&server.id);
        self.data()
            .profiles
            .iter()
            .find(|p| p.wrapper == wrapper)
            .cloned()
            .unwrap_or_else(|| Profile::temporary(server))
    }
}
