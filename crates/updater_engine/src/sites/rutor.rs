use std::sync::Arc;

use crate::handler::{
    DownloadMarker, DownloadMethod, DownloadStrategy, LoginStrategy, MarkerDiscovery, ReferenceId,
    SiteSpec,
};
use crate::registry::HandlerRegistry;

pub const SITE_ID: &str = "rutor.org";

/// Public tracker: `/torrent/<id>` pages link `d.rutor.org/download/<id>`.
pub fn site_spec() -> SiteSpec {
    SiteSpec {
        site_id: SITE_ID.to_string(),
        login: LoginStrategy::NotRequired,
        discovery: Arc::new(MarkerDiscovery {
            download: DownloadMarker::ContainsReferenceId {
                prefix: "d.rutor.org/download/".to_string(),
                id: ReferenceId::LastPathSegment,
            },
            guest_marker: None,
            login_wall_marker: None,
        }),
        download: DownloadStrategy {
            method: DownloadMethod::Get,
            sentinel_cookie: None,
        },
    }
}

pub fn register(registry: &mut HandlerRegistry) {
    registry.register_spec(site_spec());
}
