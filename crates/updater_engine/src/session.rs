//! Per-site cookie sessions.
//!
//! A [`SessionStore`] keeps exactly one live cookie set per site id. Every
//! [`SessionHandle`] obtained for the same site points at that set, so cookies
//! a login stores are visible to the download that follows it, and to the
//! next item of the sweep on the same site. Nothing here touches the network
//! or disk; the store is seeded from persisted settings at startup and
//! exported back when settings are saved.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored cookie. Attributes are kept verbatim for the persistence round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieRecord {
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<String>,
}

impl CookieRecord {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// True when `expires` parses and lies before `now`. Unparsable dates never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
            .is_some_and(|at| at < now)
    }
}

/// Cookie name to record.
pub type CookieMap = BTreeMap<String, CookieRecord>;

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sites: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `site_id`, creating an empty one if absent.
    pub fn get(&self, site_id: &str) -> SessionHandle {
        use std::collections::hash_map::Entry;

        if let Some(handle) = self
            .sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(site_id)
        {
            return handle.clone();
        }
        let mut sites = self.sites.write().unwrap_or_else(PoisonError::into_inner);
        match sites.entry(site_id.to_string()) {
            Entry::Occupied(o) => o.get().clone(),
            Entry::Vacant(v) => v.insert(SessionHandle::default()).clone(),
        }
    }

    pub fn set(&self, site_id: &str, name: &str, value: &str) {
        self.get(site_id).set(name, value);
    }

    /// Replaces the whole cookie set of `site_id`; handles already given out see the change.
    pub fn replace_all(&self, site_id: &str, mapping: CookieMap) {
        self.get(site_id).replace_all(mapping);
    }

    pub fn export(&self, site_id: &str) -> CookieMap {
        self.get(site_id).snapshot()
    }

    pub fn site_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Shared view of one site's cookie set.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    cookies: Arc<Mutex<CookieMap>>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, CookieMap> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).map(|record| record.value.clone())
    }

    /// Sets a bare cookie, keeping the attributes of an existing one with that name.
    pub fn set(&self, name: &str, value: &str) {
        self.lock()
            .entry(name.to_string())
            .and_modify(|record| record.value = value.to_string())
            .or_insert_with(|| CookieRecord::new(value));
    }

    pub fn set_record(&self, name: &str, record: CookieRecord) {
        self.lock().insert(name.to_string(), record);
    }

    /// Updates with `mapping` without dropping cookies it does not name.
    pub fn merge(&self, mapping: &CookieMap) {
        let mut cookies = self.lock();
        for (name, record) in mapping {
            cookies.insert(name.clone(), record.clone());
        }
    }

    pub fn replace_all(&self, mapping: CookieMap) {
        *self.lock() = mapping;
    }

    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn snapshot(&self) -> CookieMap {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `Cookie` request header value with every unexpired cookie, if any.
    pub fn cookie_header(&self, now: DateTime<Utc>) -> Option<String> {
        let cookies = self.lock();
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .map(|(name, record)| format!("{name}={}", record.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Applies one `Set-Cookie` header. Returns the cookie name when a cookie was stored.
    pub fn apply_set_cookie(&self, raw: &str) -> Option<String> {
        match parse_set_cookie(raw)? {
            SetCookie::Store { name, record } => {
                self.set_record(&name, record);
                Some(name)
            }
            SetCookie::Delete { name } => {
                self.remove(&name);
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetCookie {
    Store { name: String, record: CookieRecord },
    Delete { name: String },
}

/// Parses a `Set-Cookie` header value: the first `name=value` pair is the
/// cookie, the rest are attributes. `Max-Age=0` or a negative max-age deletes.
pub fn parse_set_cookie(raw: &str) -> Option<SetCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut record = CookieRecord::new(value.trim().trim_matches('"'));
    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => record.domain = Some(val.trim_start_matches('.').to_string()),
            "path" => record.path = Some(val.to_string()),
            "expires" => record.expires = Some(val.to_string()),
            "max-age" => {
                if val.parse::<i64>().is_ok_and(|secs| secs <= 0) {
                    return Some(SetCookie::Delete {
                        name: name.to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    Some(SetCookie::Store {
        name: name.to_string(),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_returns_same_cookie_set() {
        let store = SessionStore::new();
        let a = store.get("rutracker.org");
        let b = store.get("rutracker.org");

        a.set("bb_session", "1");
        assert_eq!(b.get("bb_session").as_deref(), Some("1"));
    }

    #[test]
    fn parse_keeps_attributes() {
        let parsed = parse_set_cookie(
            "bb_session=0-123; expires=Wed, 21 Oct 2037 07:28:00 GMT; path=/forum/; domain=.rutracker.org; HttpOnly",
        );
        assert_eq!(
            parsed,
            Some(SetCookie::Store {
                name: "bb_session".to_string(),
                record: CookieRecord {
                    value: "0-123".to_string(),
                    domain: Some("rutracker.org".to_string()),
                    path: Some("/forum/".to_string()),
                    expires: Some("Wed, 21 Oct 2037 07:28:00 GMT".to_string()),
                },
            })
        );
    }

    #[test]
    fn zero_max_age_deletes() {
        let handle = SessionHandle::default();
        handle.set("uid", "5");
        assert_eq!(handle.apply_set_cookie("uid=deleted; Max-Age=0"), None);
        assert_eq!(handle.get("uid"), None);
    }

    #[test]
    fn garbage_headers_are_ignored() {
        assert_eq!(parse_set_cookie(""), None);
        assert_eq!(parse_set_cookie("novalue"), None);
        assert_eq!(parse_set_cookie("=orphan"), None);
    }

    #[test]
    fn expired_cookies_are_not_sent() {
        let handle = SessionHandle::default();
        handle.set("fresh", "1");
        handle.set_record(
            "stale",
            CookieRecord {
                value: "2".to_string(),
                expires: Some("Thu, 01 Jan 1970 00:00:10 GMT".to_string()),
                ..CookieRecord::default()
            },
        );
        assert_eq!(handle.cookie_header(Utc::now()).as_deref(), Some("fresh=1"));
    }
}
