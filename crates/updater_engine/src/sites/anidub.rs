use std::sync::Arc;

use crate::handler::{
    DownloadMarker, DownloadMethod, DownloadStrategy, FormLogin, LoginMarker, LoginStrategy,
    MarkerDiscovery, SiteSpec,
};
use crate::registry::HandlerRegistry;

pub const SITE_ID: &str = "tr.anidub.com";
pub const LOGIN_URL: &str = "http://tr.anidub.com/takelogin.php";

pub fn site_spec() -> SiteSpec {
    SiteSpec {
        site_id: SITE_ID.to_string(),
        login: LoginStrategy::Form(FormLogin {
            url: LOGIN_URL.to_string(),
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            extra_fields: Vec::new(),
            // A failed login still sets cookies; only `uid` proves success.
            success: LoginMarker::CookiePresent("uid".to_string()),
        }),
        discovery: Arc::new(MarkerDiscovery {
            download: DownloadMarker::LastContaining("download.php?id=".to_string()),
            guest_marker: None,
            login_wall_marker: Some("login.php?returnto=".to_string()),
        }),
        download: DownloadStrategy {
            method: DownloadMethod::PostEmptyForm,
            sentinel_cookie: None,
        },
    }
}

pub fn register(registry: &mut HandlerRegistry) {
    registry.register_spec(site_spec());
}
