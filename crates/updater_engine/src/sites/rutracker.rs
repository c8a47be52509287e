use std::sync::Arc;

use crate::handler::{
    DownloadMarker, DownloadMethod, DownloadStrategy, FormLogin, LoginMarker, LoginStrategy,
    MarkerDiscovery, ReferenceId, SentinelCookie, SiteSpec,
};
use crate::registry::HandlerRegistry;

pub const SITE_ID: &str = "rutracker.org";
pub const LOGIN_URL: &str = "http://login.rutracker.org/forum/login.php";

/// Topic pages link the file through `dl.rutracker.org`; guests get a
/// `guest` variant of that link. The download is a POST that must carry a
/// `bb_dl` cookie holding the topic id.
pub fn site_spec() -> SiteSpec {
    SiteSpec {
        site_id: SITE_ID.to_string(),
        login: LoginStrategy::Form(FormLogin {
            url: LOGIN_URL.to_string(),
            username_field: "login_username".to_string(),
            password_field: "login_password".to_string(),
            extra_fields: vec![("login".to_string(), "pushed".to_string())],
            success: LoginMarker::AnyCookieSet,
        }),
        discovery: Arc::new(MarkerDiscovery {
            download: DownloadMarker::Contains("dl.rutracker.org".to_string()),
            guest_marker: Some("guest".to_string()),
            login_wall_marker: None,
        }),
        download: DownloadStrategy {
            method: DownloadMethod::PostEmptyForm,
            sentinel_cookie: Some(SentinelCookie {
                name: "bb_dl".to_string(),
                value: ReferenceId::QueryValue,
            }),
        },
    }
}

pub fn register(registry: &mut HandlerRegistry) {
    registry.register_spec(site_spec());
}
