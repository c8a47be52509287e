use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use updater_engine::{
    CookieRecord, HandlerDescriptor, RonSettingsStore, SettingsStore, UpdaterSettings,
    SETTINGS_FILE_NAME,
};

fn sample_settings() -> UpdaterSettings {
    let mut descriptor = HandlerDescriptor::new(true).with_credentials("alice", "secret");
    descriptor.cookies = Some(
        [(
            "bb_session".to_string(),
            CookieRecord {
                value: "0-123".to_string(),
                domain: Some("rutracker.org".to_string()),
                path: Some("/forum/".to_string()),
                expires: Some("Wed, 21 Oct 2037 07:28:00 GMT".to_string()),
            },
        )]
        .into_iter()
        .collect(),
    );

    let mut settings = UpdaterSettings {
        last_walk: 1_700_000_000,
        walk_period_hours: 6,
        tracked_item_ids: vec!["abc".to_string(), "def".to_string()],
        ..UpdaterSettings::default()
    };
    settings
        .site_settings
        .insert("rutracker.org".to_string(), descriptor);
    settings
        .site_settings
        .insert("rutor.org".to_string(), HandlerDescriptor::new(false));
    settings
}

#[test]
fn missing_file_loads_defaults() {
    let temp = TempDir::new().unwrap();
    let store = RonSettingsStore::new(temp.path().join("state"));

    assert_eq!(store.load(), UpdaterSettings::default());
}

#[test]
fn saved_settings_load_back() {
    let temp = TempDir::new().unwrap();
    let store = RonSettingsStore::new(temp.path().join("state"));
    let settings = sample_settings();

    store.save(&settings).unwrap();

    assert!(store.path().ends_with(SETTINGS_FILE_NAME));
    assert_eq!(store.load(), settings);
    assert_eq!(RonSettingsStore::new(temp.path().join("state")).load(), settings);
}

#[test]
fn corrupt_file_falls_back_to_defaults() {
    let temp = TempDir::new().unwrap();
    let store = RonSettingsStore::new(temp.path());
    fs::write(store.path(), "(last_walk: \"yesterday\"").unwrap();

    assert_eq!(store.load(), UpdaterSettings::default());
}

#[test]
fn save_into_a_file_path_fails() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, "x").unwrap();

    let store = RonSettingsStore::new(&blocker);
    assert!(store.save(&sample_settings()).is_err());
}
