//! Flat JSON persistence: last-used preferences and named SSH server
//! profiles. Both stores have an explicit load/save lifecycle and are passed
//! into whatever needs them; there are no ambient singletons.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::job::{MediaKind, RemoteTarget};
use crate::{CourierError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Settings {
    #[serde(default)]
    last_local_folder: Option<PathBuf>,
    #[serde(default)]
    last_remote_folder: Option<String>,
    #[serde(default)]
    default_format: Option<MediaKind>,
}

/// Key/value preference store backed by a small JSON file. Reads tolerate a
/// missing or corrupt file by falling back to defaults; writes persist
/// immediately.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<Settings>,
}

impl SettingsStore {
    /// Open the store at `path`, loading what is there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_json::<Settings>(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Default location under the platform config directory.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CourierError::Io("could not determine config directory".into()))?;
        Ok(config_dir.join("media-courier").join("settings.json"))
    }

    pub fn last_local_folder(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().last_local_folder.clone()
    }

    pub fn last_remote_folder(&self) -> Option<String> {
        self.state.lock().unwrap().last_remote_folder.clone()
    }

    pub fn default_format(&self) -> Option<MediaKind> {
        self.state.lock().unwrap().default_format
    }

    pub fn set_last_local_folder(&self, folder: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.last_local_folder = Some(folder.to_path_buf());
        save_json(&self.path, &*state)
    }

    pub fn set_last_remote_folder(&self, folder: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.last_remote_folder = Some(folder.to_string());
        save_json(&self.path, &*state)
    }

    pub fn set_default_format(&self, format: MediaKind) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.default_format = Some(format);
        save_json(&self.path, &*state)
    }
}

/// One saved SSH destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub remote_folder: String,
    #[serde(default)]
    pub description: String,
}

impl ServerProfile {
    pub fn to_target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            key_file: self.key_file.clone(),
            remote_folder: self.remote_folder.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    servers: Vec<ServerProfile>,
}

/// Named SSH server profiles, one JSON file with a `servers` list.
#[derive(Debug)]
pub struct ServerProfiles {
    path: PathBuf,
    servers: Vec<ServerProfile>,
}

impl ServerProfiles {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let servers = load_json::<ProfileFile>(&path)
            .map(|f| f.servers)
            .unwrap_or_default();
        Self { path, servers }
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CourierError::Io("could not determine config directory".into()))?;
        Ok(config_dir.join("media-courier").join("servers.json"))
    }

    pub fn list(&self) -> &[ServerProfile] {
        &self.servers
    }

    pub fn get(&self, name: &str) -> Option<&ServerProfile> {
        self.servers.iter().find(|p| p.name == name)
    }

    /// Add a profile, replacing any existing one with the same name.
    pub fn add(&mut self, profile: ServerProfile) -> Result<()> {
        self.servers.retain(|p| p.name != profile.name);
        self.servers.push(profile);
        self.save()
    }

    /// Remove a profile by name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let before = self.servers.len();
        self.servers.retain(|p| p.name != name);
        let removed = self.servers.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        save_json(
            &self.path,
            &ProfileFile {
                servers: self.servers.clone(),
            },
        )
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let content = fs_err::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| CourierError::Io(format!("failed to serialize {}: {}", path.display(), e)))?;
    fs_err::write(path, content)?;
    Ok(())
}
