//! Persisted updater settings and the stores that keep them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use updater_core::{ScheduleSnapshot, DEFAULT_WALK_PERIOD_HOURS};
use updater_logging::{walk_debug, walk_warn};

use crate::handler::Credentials;
use crate::persist::{AtomicFileWriter, PersistError};
use crate::session::CookieMap;
use crate::ItemId;

pub const SETTINGS_FILE_NAME: &str = "updater_state.ron";

/// Per-site settings: whether the site needs a login, the credentials, and
/// the cookies exported after the last sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerDescriptor {
    pub requires_login: bool,
    pub login: Option<String>,
    pub password: Option<String>,
    pub cookies: Option<CookieMap>,
}

impl HandlerDescriptor {
    pub fn new(requires_login: bool) -> Self {
        Self {
            requires_login,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(password.into());
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterSettings {
    pub last_walk: i64,
    pub walk_period_hours: u32,
    pub site_settings: BTreeMap<String, HandlerDescriptor>,
    pub tracked_item_ids: Vec<ItemId>,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            last_walk: 0,
            walk_period_hours: DEFAULT_WALK_PERIOD_HOURS,
            site_settings: BTreeMap::new(),
            tracked_item_ids: Vec::new(),
        }
    }
}

impl UpdaterSettings {
    pub fn schedule(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            last_walk: self.last_walk,
            walk_period_hours: self.walk_period_hours,
            tracked: self.tracked_item_ids.clone(),
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleSnapshot) -> Self {
        self.last_walk = schedule.last_walk;
        self.walk_period_hours = schedule.walk_period_hours;
        self.tracked_item_ids = schedule.tracked;
        self
    }
}

/// The user-editable part of the settings. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsUpdate {
    pub walk_period_hours: Option<u32>,
    pub site_settings: Option<BTreeMap<String, HandlerDescriptor>>,
}

/// Gives every registered site a descriptor and refreshes `requires_login`
/// on the ones that exist. Descriptors of unregistered sites are kept.
pub fn sync_site_settings(
    site_settings: &mut BTreeMap<String, HandlerDescriptor>,
    sites: &[(String, bool)],
) {
    for (site_id, requires_login) in sites {
        site_settings
            .entry(site_id.clone())
            .and_modify(|descriptor| descriptor.requires_login = *requires_login)
            .or_insert_with(|| HandlerDescriptor::new(*requires_login));
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> UpdaterSettings;
    fn save(&self, settings: &UpdaterSettings) -> Result<(), PersistError>;
}

/// Keeps settings in memory; for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<UpdaterSettings>,
    saves: Mutex<usize>,
}

impl MemorySettingsStore {
    pub fn new(settings: UpdaterSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> UpdaterSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> UpdaterSettings {
        self.current()
    }

    fn save(&self, settings: &UpdaterSettings) -> Result<(), PersistError> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// RON file in a directory, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct RonSettingsStore {
    writer: AtomicFileWriter,
}

impl RonSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.into()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.writer.dir().join(SETTINGS_FILE_NAME)
    }

    fn read(path: &Path) -> Result<Option<UpdaterSettings>, String> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.to_string()),
        };
        ron::from_str(&text).map(Some).map_err(|err| err.to_string())
    }
}

impl SettingsStore for RonSettingsStore {
    fn load(&self) -> UpdaterSettings {
        let path = self.path();
        match Self::read(&path) {
            Ok(Some(settings)) => {
                walk_debug!("Loaded settings from {}", path.display());
                settings
            }
            Ok(None) => UpdaterSettings::default(),
            Err(err) => {
                walk_warn!(
                    "Ignoring unreadable settings file {}: {}",
                    path.display(),
                    err
                );
                UpdaterSettings::default()
            }
        }
    }

    fn save(&self, settings: &UpdaterSettings) -> Result<(), PersistError> {
        let text = ron::ser::to_string_pretty(settings, ron::ser::PrettyConfig::default())
            .map_err(|err| PersistError::Encode(err.to_string()))?;
        self.writer.write(SETTINGS_FILE_NAME, &text)?;
        Ok(())
    }
}
