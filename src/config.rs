//! # Configuration
//!
//! Two JSON files live in the config directory:
//!
//! - `settings.json`: the hook path, Discord presence options and launch timing.
//! - `games.json`: the game profiles.
//!
//! Fields are read leniently: a `null` or a value of the wrong type falls back
//! to that field's default instead of failing the file. A file that is missing
//! is replaced with seeded defaults and written back, so a first run leaves a
//! ready-to-edit config behind. A file that is not JSON at all is first moved
//! aside to `<name>.bak`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::hook::SettingsProvider;
use crate::presence::{DEFAULT_DETAILS_TEMPLATE, DEFAULT_STATE_TEMPLATE, PresenceTemplates};

pub const SETTINGS_FILE: &str = "settings.json";
pub const GAMES_FILE: &str = "games.json";

pub const DISCORD_CLIENT_ID_DEFAULT: &str = "1434331516422455296";
const DISCORD_CLIENT_ID_ENV: &str = "DISCORD_CLIENT_ID";

/// Where `settings.json` and `games.json` are kept.
pub fn config_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => ProjectDirs::from("", "", "uwplaunch")
            .context("could not determine a config directory")?
            .config_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("could not create {}", dir.display()))?;
    Ok(dir)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("could not write {}", path.display()))
}

/// `None` when the file does not exist yet.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("could not read {}", path.display())),
    }
}

/// Moves an unparsable file to `<name>.bak` so seeding does not destroy it.
fn back_up(path: &Path, reason: &serde_json::Error) -> Result<()> {
    let mut backup = path.as_os_str().to_os_string();
    backup.push(".bak");
    let backup = PathBuf::from(backup);
    std::fs::rename(path, &backup)
        .with_context(|| format!("could not move {} aside", path.display()))?;
    warn!(
        "Could not parse {} ({}). Moved it to {} and wrote defaults.",
        path.display(),
        reason,
        backup.display()
    );
    Ok(())
}

/// Null, or a value of the wrong type, reads as absent.
fn lenient<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(d)?;
    Ok(T::deserialize(value).ok())
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SettingsFile")]
pub struct Settings {
    #[serde(rename = "uwphook_path")]
    pub hook_path: String,
    pub discord_enabled: bool,
    pub discord_client_id: String,
    pub discord_details_tpl: String,
    pub discord_state_tpl: String,
    pub launch_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hook_path: String::new(),
            discord_enabled: true,
            discord_client_id: DISCORD_CLIENT_ID_DEFAULT.to_string(),
            discord_details_tpl: DEFAULT_DETAILS_TEMPLATE.to_string(),
            discord_state_tpl: DEFAULT_STATE_TEMPLATE.to_string(),
            launch_timeout_secs: 45,
            poll_interval_ms: 500,
        }
    }
}

/// `settings.json` as written on disk, every key optional.
#[derive(Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    #[serde(deserialize_with = "lenient")]
    uwphook_path: Option<String>,
    #[serde(deserialize_with = "lenient")]
    discord_enabled: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    discord_client_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    discord_details_tpl: Option<String>,
    #[serde(deserialize_with = "lenient")]
    discord_state_tpl: Option<String>,
    #[serde(deserialize_with = "lenient")]
    launch_timeout_secs: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    poll_interval_ms: Option<u64>,
}

impl From<SettingsFile> for Settings {
    fn from(file: SettingsFile) -> Self {
        let defaults = Settings::default();
        Self {
            hook_path: file.uwphook_path.unwrap_or(defaults.hook_path),
            discord_enabled: file.discord_enabled.unwrap_or(defaults.discord_enabled),
            discord_client_id: file.discord_client_id.unwrap_or(defaults.discord_client_id),
            discord_details_tpl: file.discord_details_tpl.unwrap_or(defaults.discord_details_tpl),
            discord_state_tpl: file.discord_state_tpl.unwrap_or(defaults.discord_state_tpl),
            launch_timeout_secs: file.launch_timeout_secs.unwrap_or(defaults.launch_timeout_secs),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        }
    }
}

impl Settings {
    /// Load `settings.json`, seeding it if absent or not JSON.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        let parsed = match read_optional(&path)? {
            Some(text) => match serde_json::from_str::<Settings>(&text) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    back_up(&path, &e)?;
                    None
                }
            },
            None => None,
        };
        let mut settings = match parsed {
            Some(s) => s,
            None => {
                debug!("Seeding {}", path.display());
                let seeded = Settings::default();
                seeded.save(dir)?;
                seeded
            }
        };
        settings.apply_client_id_fallbacks(std::env::var(DISCORD_CLIENT_ID_ENV).ok().as_deref());
        Ok(settings)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(SETTINGS_FILE), self)
    }

    /// Environment first, then the file, then the built-in id.
    fn apply_client_id_fallbacks(&mut self, env_id: Option<&str>) {
        if let Some(id) = env_id.map(str::trim).filter(|id| !id.is_empty()) {
            self.discord_client_id = id.to_string();
        }
        if self.discord_client_id.trim().is_empty() {
            self.discord_client_id = DISCORD_CLIENT_ID_DEFAULT.to_string();
        }
    }

    pub fn presence_templates(&self) -> PresenceTemplates {
        PresenceTemplates {
            details: self.discord_details_tpl.clone(),
            state: self.discord_state_tpl.clone(),
        }
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn stored_hook_path(&self) -> Option<PathBuf> {
        let trimmed = self.hook_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// `settings.json` as seen by the hook locator. Each write re-reads the file so
/// edits made since startup are kept (last writer wins).
pub struct JsonSettings {
    dir: PathBuf,
    hook_path: Option<PathBuf>,
}

impl JsonSettings {
    pub fn new(dir: &Path, settings: &Settings) -> Self {
        Self {
            dir: dir.to_path_buf(),
            hook_path: settings.stored_hook_path(),
        }
    }
}

impl SettingsProvider for JsonSettings {
    fn hook_path(&self) -> Option<PathBuf> {
        self.hook_path.clone()
    }

    fn remember_hook_path(&self, path: &Path) -> Result<()> {
        let mut current = Settings::load(&self.dir)?;
        current.hook_path = path.to_string_lossy().into_owned();
        current.save(&self.dir)
    }
}

// ---------------------------------------------------------------------------
// Game profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileFile")]
pub struct GameProfile {
    pub name: String,
    /// Application user model id handed to the hook.
    #[serde(rename = "aumid")]
    pub launch_target: String,
    #[serde(rename = "exe_name")]
    pub process_name: String,
    pub flags: Vec<String>,
    /// Blank means "all CPUs except CPU0".
    #[serde(rename = "mask_hex")]
    pub affinity_mask_hex: String,
    pub use_flags: bool,
    #[serde(rename = "high_priority")]
    pub apply_high_priority: bool,
    pub apply_affinity: bool,
}

/// One `games.json` entry as written on disk. The toggles default to on.
#[derive(Default, Deserialize)]
#[serde(default)]
struct ProfileFile {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    aumid: Option<String>,
    #[serde(deserialize_with = "lenient")]
    exe_name: Option<String>,
    flags: Value,
    #[serde(deserialize_with = "lenient")]
    mask_hex: Option<String>,
    #[serde(deserialize_with = "lenient")]
    use_flags: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    high_priority: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    apply_affinity: Option<bool>,
}

impl From<ProfileFile> for GameProfile {
    fn from(file: ProfileFile) -> Self {
        Self {
            name: file.name.unwrap_or_default(),
            launch_target: file.aumid.unwrap_or_default(),
            process_name: file.exe_name.unwrap_or_default(),
            flags: flags_from_list_or_string(file.flags),
            affinity_mask_hex: file.mask_hex.unwrap_or_default(),
            use_flags: file.use_flags.unwrap_or(true),
            apply_high_priority: file.high_priority.unwrap_or(true),
            apply_affinity: file.apply_affinity.unwrap_or(true),
        }
    }
}

/// Older files store flags as one whitespace-separated string.
fn flags_from_list_or_string(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(flag) => Some(flag),
                _ => None,
            })
            .collect(),
        Value::String(line) => line.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

impl GameProfile {
    pub fn new(name: &str, launch_target: &str, process_name: &str) -> Self {
        Self {
            name: name.to_string(),
            launch_target: launch_target.to_string(),
            process_name: process_name.to_string(),
            flags: Vec::new(),
            affinity_mask_hex: String::new(),
            use_flags: true,
            apply_high_priority: true,
            apply_affinity: true,
        }
    }
}

fn seed_profiles() -> Vec<GameProfile> {
    vec![
        GameProfile::new(
            "Gears of War Reloaded",
            "Microsoft.Pender_8wekyb3d8bbwe!Launch.GOWDE",
            "Launch_GOWDE.exe",
        ),
        GameProfile::new(
            "Gears 5",
            "Microsoft.HalifaxBaseGame_8wekyb3d8bbwe!GearGameShippingInternal",
            "Gears5_EAC.exe",
        ),
    ]
}

fn profiles_from(entries: Vec<Value>) -> Vec<GameProfile> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match GameProfile::deserialize(entry) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Skipping game entry #{}: {}", i + 1, e);
                None
            }
        })
        .collect()
}

pub struct ProfileStore {
    path: PathBuf,
    pub profiles: Vec<GameProfile>,
}

impl ProfileStore {
    /// Load `games.json`, seeding it if absent or not a JSON array.
    /// Entries that are not objects are skipped.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(GAMES_FILE);
        let loaded = match read_optional(&path)? {
            Some(text) => match serde_json::from_str::<Vec<Value>>(&text) {
                Ok(entries) => Some(profiles_from(entries)),
                Err(e) => {
                    back_up(&path, &e)?;
                    None
                }
            },
            None => None,
        };

        let store = match loaded {
            Some(profiles) => Self { path, profiles },
            None => {
                let store = Self {
                    path,
                    profiles: seed_profiles(),
                };
                store.save()?;
                store
            }
        };
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.path, &self.profiles)
    }

    pub fn find(&self, name: &str) -> Option<&GameProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Add or replace the profile with the same name.
    pub fn upsert(&mut self, profile: GameProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.name != name);
        self.profiles.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.launch_timeout(), Duration::from_secs(45));
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert!(dir.path().join(SETTINGS_FILE).exists());
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"uwphook_path": "C:\\Tools\\UWPHook.exe", "launch_timeout_secs": 10}"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.stored_hook_path(), Some(PathBuf::from(r"C:\Tools\UWPHook.exe")));
        assert_eq!(settings.launch_timeout_secs, 10);
        assert_eq!(settings.discord_state_tpl, DEFAULT_STATE_TEMPLATE);
    }

    #[test]
    fn client_id_fallbacks() {
        let mut settings = Settings {
            discord_client_id: "  ".into(),
            discord_enabled: false,
            ..Default::default()
        };
        settings.apply_client_id_fallbacks(None);
        assert_eq!(settings.discord_client_id, DISCORD_CLIENT_ID_DEFAULT);
        assert!(!settings.discord_enabled);

        settings.apply_client_id_fallbacks(Some(" 123 "));
        assert_eq!(settings.discord_client_id, "123");
    }

    #[test]
    fn remembered_hook_path_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        let provider = JsonSettings::new(dir.path(), &settings);

        provider.remember_hook_path(Path::new("D:/hook/UWPHook.exe")).unwrap();

        let reloaded = Settings::load(dir.path()).unwrap();
        assert_eq!(reloaded.stored_hook_path(), Some(PathBuf::from("D:/hook/UWPHook.exe")));
    }

    #[test]
    fn missing_games_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path()).unwrap();

        assert_eq!(store.profiles.len(), 2);
        assert_eq!(store.find("Gears 5").unwrap().process_name, "Gears5_EAC.exe");
        assert!(dir.path().join(GAMES_FILE).exists());
    }

    #[test]
    fn flags_string_is_split() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GAMES_FILE),
            r#"[{"name": "G", "aumid": "A!B", "exe_name": "g.exe", "flags": " -a  -b "}]"#,
        )
        .unwrap();

        let store = ProfileStore::load(dir.path()).unwrap();
        let game = store.find("G").unwrap();

        assert_eq!(game.flags, vec!["-a", "-b"]);
        assert!(game.use_flags && game.apply_affinity && game.apply_high_priority);
        assert_eq!(game.affinity_mask_hex, "");
    }

    #[test]
    fn null_fields_keep_the_rest_of_the_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"uwphook_path": null, "discord_client_id": "999", "discord_state_tpl": "custom",
                "launch_timeout_secs": "ten"}"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.stored_hook_path(), None);
        assert_eq!(settings.discord_client_id, "999");
        assert_eq!(settings.discord_state_tpl, "custom");
        assert_eq!(settings.launch_timeout_secs, 45);
        assert!(!dir.path().join("settings.json.bak").exists());
    }

    #[test]
    fn unparsable_settings_are_moved_aside_and_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{not json").unwrap();

        let settings = Settings::load(dir.path()).unwrap();

        assert_eq!(settings.discord_details_tpl, DEFAULT_DETAILS_TEMPLATE);
        let backup = std::fs::read_to_string(dir.path().join("settings.json.bak")).unwrap();
        assert_eq!(backup, "{not json");
        let rewritten = std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
        assert!(serde_json::from_str::<Value>(&rewritten).is_ok());
    }

    #[test]
    fn null_mask_keeps_the_profile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GAMES_FILE),
            r#"[{"name": "Mine", "aumid": "A!B", "exe_name": "mine.exe", "mask_hex": null,
                 "flags": null, "high_priority": null, "apply_affinity": false}]"#,
        )
        .unwrap();

        let store = ProfileStore::load(dir.path()).unwrap();

        assert_eq!(store.profiles.len(), 1);
        let game = store.find("Mine").unwrap();
        assert_eq!(game.affinity_mask_hex, "");
        assert!(game.flags.is_empty());
        assert!(game.apply_high_priority);
        assert!(!game.apply_affinity);
        assert!(!dir.path().join("games.json.bak").exists());
    }

    #[test]
    fn entries_that_are_not_objects_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GAMES_FILE),
            r#"["junk", 3, {"name": "Mine", "exe_name": "mine.exe", "flags": ["-a", 1]}]"#,
        )
        .unwrap();

        let store = ProfileStore::load(dir.path()).unwrap();

        assert_eq!(store.profiles.len(), 1);
        assert_eq!(store.profiles[0].flags, vec!["-a"]);
    }

    #[test]
    fn unparsable_games_are_moved_aside_and_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        let original = r#"{"name": "Mine", "aumid": "A!B", "exe_name": "mine.exe"}"#;
        std::fs::write(dir.path().join(GAMES_FILE), original).unwrap();

        let store = ProfileStore::load(dir.path()).unwrap();

        assert_eq!(store.profiles.len(), 2);
        assert!(store.find("Gears 5").is_some());
        let backup = std::fs::read_to_string(dir.path().join("games.json.bak")).unwrap();
        assert_eq!(backup, original);
        let reloaded = ProfileStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.profiles, store.profiles);
    }

    #[test]
    fn upsert_replaces_by_name_and_remove_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::load(dir.path()).unwrap();

        let mut edited = GameProfile::new("Gears 5", "X!Y", "g5.exe");
        edited.affinity_mask_hex = "F0".into();
        store.upsert(edited);
        store.save().unwrap();

        let reloaded = ProfileStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.profiles.len(), 2);
        assert_eq!(reloaded.find("Gears 5").unwrap().affinity_mask_hex, "F0");

        let mut store = reloaded;
        assert!(store.remove("Gears 5"));
        assert!(!store.remove("Gears 5"));
    }
}
