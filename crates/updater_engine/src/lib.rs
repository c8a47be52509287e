//! Updater engine: site handlers, artifact comparison and the sweep worker.
mod artifact;
pub mod bencode;
mod decode;
mod events;
mod fetch;
mod handler;
mod host;
mod links;
mod persist;
mod registry;
mod session;
mod settings;
mod types;
mod updater;
mod walker;

pub mod sites;

pub use artifact::{
    extract_identity, has_changed, migrate_preferences, ArtifactIdentity, ContentHash,
    PreferenceMigration, DEFAULT_FILE_PRIORITY, SESSION_FIELDS,
};
pub use bencode::ParseError;
pub use decode::{decode_page, DecodedPage};
pub use events::{ChannelEventSink, EventSink, NullEventSink, SweepReport, WalkEvent};
pub use fetch::{FetchSettings, SiteClient};
pub use handler::{
    Credentials, DownloadMarker, DownloadMethod, DownloadStrategy, FormLogin, HandlerContext,
    HandlerError, LinkDiscovery, LinkMatch, LoginMarker, LoginStrategy, MarkerDiscovery,
    ReferenceId, SentinelCookie, SiteHandler, SiteSpec, StrategyHandler, MAX_LOGIN_ATTEMPTS,
};
pub use host::{Host, HostError};
pub use links::LinkScanner;
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use registry::{HandlerFactory, HandlerRegistry};
pub use session::{parse_set_cookie, CookieMap, CookieRecord, SessionHandle, SessionStore, SetCookie};
pub use settings::{
    sync_site_settings, HandlerDescriptor, MemorySettingsStore, RonSettingsStore, SettingsStore,
    SettingsUpdate, UpdaterSettings, SETTINGS_FILE_NAME,
};
pub use types::{
    FailureKind, FetchError, FetchMetadata, FetchOutput, FileEntry, ItemFailure, ItemStatus,
};
pub use updater::{Clock, EnrollmentSummary, StartError, Updater, UpdaterConfig};
pub use walker::{WalkContext, Walker};

pub use updater_core::{ItemId, StatusView, SweepPlan, SweepRequest};
