#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use updater_engine::{
    extract_identity, ChannelEventSink, CookieMap, DownloadMarker, DownloadMethod,
    DownloadStrategy, FormLogin, HandlerDescriptor, Host, HostError, ItemId, ItemStatus,
    LoginMarker, LoginStrategy, MarkerDiscovery, PreferenceMigration, SiteSpec, WalkContext,
    WalkEvent,
};

/// Site id every mock server resolves to.
pub const MOCK_SITE: &str = "127.0.0.1";

fn bstr(text: &str) -> String {
    format!("{}:{}", text.len(), text)
}

/// Single-file `.torrent`; `tag` lands in `pieces` so different tags give different identities.
pub fn single_file_torrent(name: &str, length: u64, tag: &str) -> Vec<u8> {
    format!(
        "d8:announce{}4:infod6:lengthi{length}e4:name{}12:piece lengthi16384e6:pieces{}ee",
        bstr("http://tracker.example/announce"),
        bstr(name),
        bstr(tag),
    )
    .into_bytes()
}

pub fn multi_file_torrent(name: &str, files: &[(&str, u64)], tag: &str) -> Vec<u8> {
    let entries: String = files
        .iter()
        .map(|(path, length)| format!("d6:lengthi{length}e4:pathl{}ee", bstr(path)))
        .collect();
    format!(
        "d8:announce{}4:infod5:filesl{entries}e4:name{}12:piece lengthi16384e6:pieces{}ee",
        bstr("http://tracker.example/announce"),
        bstr(name),
        bstr(tag),
    )
    .into_bytes()
}

/// Host status for an item created from `torrent`, every file at normal priority.
pub fn item_status(item_id: &str, reference: Option<&str>, torrent: &[u8]) -> ItemStatus {
    let identity = extract_identity(torrent).expect("test torrent parses");
    ItemStatus {
        item_id: item_id.to_string(),
        name: identity.name,
        source_reference: reference.map(str::to_string),
        identity: identity.content_hash,
        file_priorities: vec![1; identity.files.len()],
        files: identity.files,
        options: serde_json::Map::new(),
    }
}

#[derive(Default)]
pub struct FakeHost {
    items: Mutex<BTreeMap<ItemId, ItemStatus>>,
    created: Mutex<Vec<(ItemId, PreferenceMigration)>>,
    removed: Mutex<Vec<(ItemId, bool)>>,
    fail_create: AtomicBool,
    ids_from_identity: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeHost {
    pub fn with_items(items: Vec<ItemStatus>) -> Self {
        let host = Self::default();
        {
            let mut map = host.items.lock().unwrap();
            for item in items {
                map.insert(item.item_id.clone(), item);
            }
        }
        host
    }

    pub fn fail_creation(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Item ids become the artifact's info-hash, as real torrent hosts do.
    pub fn use_identity_ids(&self) {
        self.ids_from_identity.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<(ItemId, PreferenceMigration)> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(ItemId, bool)> {
        self.removed.lock().unwrap().clone()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.lock().unwrap().contains_key(item_id)
    }
}

impl Host for FakeHost {
    fn item_status(&self, item_id: &str) -> Option<ItemStatus> {
        self.items.lock().unwrap().get(item_id).cloned()
    }

    fn create_item(
        &self,
        artifact: &[u8],
        preferences: &PreferenceMigration,
    ) -> Result<ItemId, HostError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HostError("not enough disk space".to_string()));
        }
        let item_id = if self.ids_from_identity.load(Ordering::SeqCst) {
            extract_identity(artifact)
                .map_err(|err| HostError(err.to_string()))?
                .content_hash
                .to_string()
        } else {
            format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        };
        let mut status = item_status(&item_id, None, artifact);
        status.file_priorities = preferences.file_priorities.clone();
        self.items.lock().unwrap().insert(item_id.clone(), status);
        self.created
            .lock()
            .unwrap()
            .push((item_id.clone(), preferences.clone()));
        Ok(item_id)
    }

    fn remove_item(&self, item_id: &str, purge_data: bool) {
        self.items.lock().unwrap().remove(item_id);
        self.removed
            .lock()
            .unwrap()
            .push((item_id.to_string(), purge_data));
    }

    fn enumerate_items(&self) -> Vec<ItemId> {
        self.items.lock().unwrap().keys().cloned().collect()
    }
}

/// Walk context that records what the walker reports back.
#[derive(Default)]
pub struct RecordingContext {
    pub sites: Mutex<BTreeMap<String, HandlerDescriptor>>,
    pub cookies: Mutex<Vec<(String, CookieMap)>>,
    pub replaced: Mutex<Vec<(String, String)>>,
}

impl WalkContext for RecordingContext {
    fn site_settings(&self, site_id: &str) -> Option<HandlerDescriptor> {
        self.sites.lock().unwrap().get(site_id).cloned()
    }

    fn store_site_cookies(&self, site_id: &str, cookies: CookieMap) {
        self.cookies
            .lock()
            .unwrap()
            .push((site_id.to_string(), cookies));
    }

    fn item_replaced(&self, old_item_id: &str, new_item_id: &str) {
        self.replaced
            .lock()
            .unwrap()
            .push((old_item_id.to_string(), new_item_id.to_string()));
    }
}

pub fn event_channel() -> (Arc<ChannelEventSink>, mpsc::Receiver<WalkEvent>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelEventSink::new(tx)), rx)
}

/// Collects events up to and including the next `SweepFinished`.
pub fn events_until_finished(rx: &mpsc::Receiver<WalkEvent>) -> Vec<WalkEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(20))
            .expect("sweep finishes in time");
        let finished = matches!(event, WalkEvent::SweepFinished(_));
        events.push(event);
        if finished {
            return events;
        }
    }
}

/// Public site on the mock server: links under `/download/` are artifacts.
pub fn public_site() -> SiteSpec {
    SiteSpec {
        site_id: MOCK_SITE.to_string(),
        login: LoginStrategy::NotRequired,
        discovery: Arc::new(MarkerDiscovery {
            download: DownloadMarker::Contains("/download/".to_string()),
            guest_marker: None,
            login_wall_marker: None,
        }),
        download: DownloadStrategy {
            method: DownloadMethod::Get,
            sentinel_cookie: None,
        },
    }
}

/// Login-only site on the mock server: `/dl/` links are artifacts, `/dl/guest` is the wall.
pub fn private_site(server_uri: &str, success: LoginMarker) -> SiteSpec {
    SiteSpec {
        site_id: MOCK_SITE.to_string(),
        login: LoginStrategy::Form(FormLogin {
            url: format!("{server_uri}/login"),
            username_field: "user".to_string(),
            password_field: "pass".to_string(),
            extra_fields: vec![("login".to_string(), "pushed".to_string())],
            success,
        }),
        discovery: Arc::new(MarkerDiscovery {
            download: DownloadMarker::Contains("/dl/".to_string()),
            guest_marker: Some("guest".to_string()),
            login_wall_marker: None,
        }),
        download: DownloadStrategy {
            method: DownloadMethod::Get,
            sentinel_cookie: None,
        },
    }
}

pub fn page_with_link(href: &str) -> String {
    format!(
        r#"<html><body><h1>Release</h1><a href="/forum">Forum</a> <a href="{href}">Download</a></body></html>"#
    )
}
