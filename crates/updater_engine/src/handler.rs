//! Site handler protocol and the strategy-composed handler every built-in site uses.
//!
//! A site is described by a [`SiteSpec`]: how to log in, how to pick the
//! download link out of a page, and how to request the file. The single
//! [`StrategyHandler`] type runs any spec, so sites override one step by
//! swapping one strategy.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use updater_logging::{walk_debug, walk_trace};
use url::Url;

use crate::decode::decode_page;
use crate::fetch::{FetchSettings, SiteClient};
use crate::links::LinkScanner;
use crate::session::{CookieMap, SessionHandle};
use crate::settings::HandlerDescriptor;
use crate::FetchMetadata;

/// Logins a single locate chain may perform before giving up.
pub const MAX_LOGIN_ATTEMPTS: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    NotFound(String),
}

/// Everything a handler instance needs, handed over by the registry.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub site_id: String,
    pub source_reference: String,
    pub session: SessionHandle,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub login: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: Some(login.into()),
            password: Some(password.into()),
        }
    }
}

/// Resolves a source reference to a downloadable artifact for one site.
///
/// Failures are reported as `None`/`false` with the cause kept in
/// [`SiteHandler::last_error`]; nothing here retries on its own except the
/// single login-and-retry inside `locate_artifact`.
#[async_trait]
pub trait SiteHandler: Send {
    fn site_id(&self) -> &str;

    fn requires_login(&self) -> bool;

    /// Takes credentials from persisted settings and merges their cookies into the live session.
    fn apply_settings(&mut self, descriptor: &HandlerDescriptor);

    /// Runs the site's authentication flow once. Absent or empty credentials fail without a request.
    async fn login(&mut self, username: Option<&str>, password: Option<&str>) -> bool;

    async fn locate_artifact(&mut self, source_reference: &str) -> Option<String>;

    async fn download(&mut self, artifact_url: &str) -> Option<Bytes>;

    fn last_error(&self) -> Option<&HandlerError>;

    /// Stores the failure cause and traces it at debug level.
    fn record_error(&mut self, error: HandlerError);

    fn error_text(&self) -> String {
        self.last_error().map(ToString::to_string).unwrap_or_default()
    }

    fn export_session(&self) -> CookieMap;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStrategy {
    NotRequired,
    Form(FormLogin),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLogin {
    pub url: String,
    pub username_field: String,
    pub password_field: String,
    pub extra_fields: Vec<(String, String)>,
    pub success: LoginMarker,
}

/// How a login response is recognised as successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMarker {
    /// The response chain set at least one cookie.
    AnyCookieSet,
    /// The session holds this cookie afterwards.
    CookiePresent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMatch {
    Found(String),
    /// The page hides the download behind a login.
    LoginRequired,
    Missing,
}

pub trait LinkDiscovery: Send + Sync {
    fn select(&self, source_reference: &str, links: &[String]) -> LinkMatch;
}

/// Part of a source reference that identifies the item on its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceId {
    /// Text after the first `=`, up to the next `&` or `#`.
    QueryValue,
    /// Last non-empty path segment.
    LastPathSegment,
}

impl ReferenceId {
    pub fn extract(&self, reference: &str) -> Option<String> {
        let id = match self {
            ReferenceId::QueryValue => reference
                .split_once('=')
                .and_then(|(_, rest)| rest.split(|c| c == '&' || c == '#').next())
                .map(str::to_string),
            ReferenceId::LastPathSegment => Url::parse(reference).ok().and_then(|url| {
                url.path_segments()?
                    .filter(|segment| !segment.is_empty())
                    .last()
                    .map(str::to_string)
            }),
        };
        id.filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadMarker {
    Contains(String),
    /// Like `Contains`, but the last matching link on the page wins.
    LastContaining(String),
    /// `prefix` immediately followed by the reference id.
    ContainsReferenceId { prefix: String, id: ReferenceId },
}

/// Substring rules over the page's links.
///
/// The first link matching `download` wins (the last one for
/// [`DownloadMarker::LastContaining`]) unless it contains `guest_marker`;
/// with no download link, any link containing `login_wall_marker` means the
/// page wants a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerDiscovery {
    pub download: DownloadMarker,
    pub guest_marker: Option<String>,
    pub login_wall_marker: Option<String>,
}

impl LinkDiscovery for MarkerDiscovery {
    fn select(&self, source_reference: &str, links: &[String]) -> LinkMatch {
        let (needle, last) = match &self.download {
            DownloadMarker::Contains(marker) => (marker.clone(), false),
            DownloadMarker::LastContaining(marker) => (marker.clone(), true),
            DownloadMarker::ContainsReferenceId { prefix, id } => match id.extract(source_reference) {
                Some(id) => (format!("{prefix}{id}"), false),
                None => return LinkMatch::Missing,
            },
        };

        let matches = |link: &&String| link.contains(&needle);
        let found = if last {
            links.iter().rev().find(matches)
        } else {
            links.iter().find(matches)
        };
        if let Some(link) = found {
            if self
                .guest_marker
                .as_deref()
                .is_some_and(|guest| link.contains(guest))
            {
                return LinkMatch::LoginRequired;
            }
            return LinkMatch::Found(link.clone());
        }

        if let Some(wall) = self.login_wall_marker.as_deref() {
            if links.iter().any(|link| link.contains(wall)) {
                return LinkMatch::LoginRequired;
            }
        }
        LinkMatch::Missing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMethod {
    Get,
    /// POST with an empty form body.
    PostEmptyForm,
}

/// Cookie set right before the download, valued from the source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelCookie {
    pub name: String,
    pub value: ReferenceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStrategy {
    pub method: DownloadMethod,
    pub sentinel_cookie: Option<SentinelCookie>,
}

pub struct SiteSpec {
    pub site_id: String,
    pub login: LoginStrategy,
    pub discovery: Arc<dyn LinkDiscovery>,
    pub download: DownloadStrategy,
}

impl SiteSpec {
    pub fn requires_login(&self) -> bool {
        matches!(self.login, LoginStrategy::Form(_))
    }
}

struct LoginBudget {
    remaining: u8,
}

impl LoginBudget {
    fn new(attempts: u8) -> Self {
        Self {
            remaining: attempts,
        }
    }

    fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

pub struct StrategyHandler {
    spec: Arc<SiteSpec>,
    client: SiteClient,
    scanner: LinkScanner,
    source_reference: String,
    credentials: Credentials,
    last_error: Option<HandlerError>,
}

impl StrategyHandler {
    pub fn new(spec: Arc<SiteSpec>, context: HandlerContext) -> Self {
        Self {
            spec,
            client: SiteClient::new(context.fetch, context.session),
            scanner: LinkScanner::new(),
            source_reference: context.source_reference,
            credentials: Credentials::default(),
            last_error: None,
        }
    }

    async fn attempt_login(
        &mut self,
        budget: &mut LoginBudget,
        username: Option<&str>,
        password: Option<&str>,
    ) -> bool {
        let spec = Arc::clone(&self.spec);
        let LoginStrategy::Form(form) = &spec.login else {
            self.record_error(HandlerError::Auth(format!(
                "{} does not support login",
                spec.site_id
            )));
            return false;
        };
        let (Some(username), Some(password)) = (non_empty(username), non_empty(password)) else {
            self.record_error(HandlerError::Auth(
                "Login credentials are not configured".to_string(),
            ));
            return false;
        };
        if !budget.take() {
            self.record_error(HandlerError::Auth(format!(
                "Login at {} did not grant access",
                form.url
            )));
            return false;
        }

        walk_debug!("Trying to login at {} ...", form.url);
        let mut fields = vec![
            (form.username_field.clone(), username.to_string()),
            (form.password_field.clone(), password.to_string()),
        ];
        fields.extend(form.extra_fields.iter().cloned());

        let response = match self.client.post_form(&form.url, &fields).await {
            Ok(response) => response,
            Err(err) => {
                self.record_error(HandlerError::Transport(format!(
                    "Login request to {} failed: {err}",
                    form.url
                )));
                return false;
            }
        };

        let logged_in = match &form.success {
            LoginMarker::AnyCookieSet => !response.metadata.cookies_set.is_empty(),
            LoginMarker::CookiePresent(name) => self.client.session().get(name).is_some(),
        };
        if !logged_in {
            self.record_error(HandlerError::Auth("Unable to login.".to_string()));
        }
        logged_in
    }
}

#[async_trait]
impl SiteHandler for StrategyHandler {
    fn site_id(&self) -> &str {
        &self.spec.site_id
    }

    fn requires_login(&self) -> bool {
        self.spec.requires_login()
    }

    fn apply_settings(&mut self, descriptor: &HandlerDescriptor) {
        self.credentials = descriptor.credentials();
        if let Some(cookies) = &descriptor.cookies {
            self.client.session().merge(cookies);
        }
    }

    async fn login(&mut self, username: Option<&str>, password: Option<&str>) -> bool {
        let mut budget = LoginBudget::new(MAX_LOGIN_ATTEMPTS);
        self.attempt_login(&mut budget, username, password).await
    }

    async fn locate_artifact(&mut self, source_reference: &str) -> Option<String> {
        self.source_reference = source_reference.to_string();
        let mut budget = LoginBudget::new(MAX_LOGIN_ATTEMPTS);

        loop {
            walk_debug!("Getting page at {} ...", source_reference);
            let page = match self.client.get(source_reference).await {
                Ok(page) => page,
                Err(err) => {
                    self.record_error(HandlerError::Transport(format!(
                        "Unable to fetch {source_reference}: {err}"
                    )));
                    return None;
                }
            };
            trace_fetch(&page.metadata);
            let decoded = decode_page(&page.bytes, page.metadata.content_type.as_deref());
            if decoded.had_errors {
                walk_trace!(
                    "{} did not decode cleanly as {}",
                    source_reference,
                    decoded.encoding_label
                );
            }
            let links = self
                .scanner
                .scan(&decoded.text, Some(page.metadata.final_url.as_str()));
            walk_trace!("{} links on {}", links.len(), source_reference);

            match self.spec.discovery.select(source_reference, &links) {
                LinkMatch::Found(link) => {
                    walk_debug!("Download link found: {}", link);
                    return Some(link);
                }
                LinkMatch::Missing => {
                    self.record_error(HandlerError::NotFound(format!(
                        "Cannot find download link at {source_reference}"
                    )));
                    return None;
                }
                LinkMatch::LoginRequired => {
                    walk_debug!("Login is required to download from {}", source_reference);
                    let credentials = self.credentials.clone();
                    let logged_in = self
                        .attempt_login(
                            &mut budget,
                            credentials.login.as_deref(),
                            credentials.password.as_deref(),
                        )
                        .await;
                    if !logged_in {
                        return None;
                    }
                }
            }
        }
    }

    async fn download(&mut self, artifact_url: &str) -> Option<Bytes> {
        let spec = Arc::clone(&self.spec);
        if let Some(sentinel) = &spec.download.sentinel_cookie {
            if let Some(value) = sentinel.value.extract(&self.source_reference) {
                self.client.session().set(&sentinel.name, &value);
            }
        }

        walk_debug!("Downloading artifact from {} ...", artifact_url);
        let result = match spec.download.method {
            DownloadMethod::Get => self.client.get(artifact_url).await,
            DownloadMethod::PostEmptyForm => self.client.post_form(artifact_url, &[]).await,
        };
        match result {
            Ok(output) => {
                trace_fetch(&output.metadata);
                Some(output.bytes)
            }
            Err(err) => {
                self.record_error(HandlerError::Transport(format!(
                    "Unable to download {artifact_url}: {err}"
                )));
                None
            }
        }
    }

    fn last_error(&self) -> Option<&HandlerError> {
        self.last_error.as_ref()
    }

    fn record_error(&mut self, error: HandlerError) {
        walk_debug!("[{}] Error: {}", self.spec.site_id, error);
        self.last_error = Some(error);
    }

    fn export_session(&self) -> CookieMap {
        self.client.session().snapshot()
    }
}

fn trace_fetch(metadata: &FetchMetadata) {
    walk_trace!(
        "{} -> {} (status {}, {} redirects, {} bytes)",
        metadata.original_url,
        metadata.final_url,
        metadata.status,
        metadata.redirect_count,
        metadata.byte_len
    );
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn reference_ids() {
        assert_eq!(
            ReferenceId::QueryValue.extract("http://rutracker.org/forum/viewtopic.php?t=4242&start=30"),
            Some("4242".to_string())
        );
        assert_eq!(
            ReferenceId::LastPathSegment.extract("http://rutor.org/torrent/123456/"),
            Some("123456".to_string())
        );
        assert_eq!(ReferenceId::QueryValue.extract("http://rutracker.org/forum/"), None);
    }

    #[test]
    fn guest_download_link_means_login() {
        let discovery = MarkerDiscovery {
            download: DownloadMarker::Contains("dl.tracker".to_string()),
            guest_marker: Some("guest".to_string()),
            login_wall_marker: None,
        };
        assert_eq!(
            discovery.select("x", &links(&["http://a/x", "http://dl.tracker/guest?t=1"])),
            LinkMatch::LoginRequired
        );
        assert_eq!(
            discovery.select("x", &links(&["http://dl.tracker/dl.php?t=1"])),
            LinkMatch::Found("http://dl.tracker/dl.php?t=1".to_string())
        );
        assert_eq!(discovery.select("x", &links(&["http://a/x"])), LinkMatch::Missing);
    }

    #[test]
    fn download_link_beats_login_wall() {
        let discovery = MarkerDiscovery {
            download: DownloadMarker::Contains("download.php?id=".to_string()),
            guest_marker: None,
            login_wall_marker: Some("login.php?returnto=".to_string()),
        };
        assert_eq!(
            discovery.select("x", &links(&["http://t/login.php?returnto=%2F"])),
            LinkMatch::LoginRequired
        );
        assert_eq!(
            discovery.select(
                "x",
                &links(&["http://t/login.php?returnto=%2F", "http://t/download.php?id=9"])
            ),
            LinkMatch::Found("http://t/download.php?id=9".to_string())
        );
    }

    #[test]
    fn last_containing_marker_takes_the_final_link() {
        let spec = crate::sites::anidub::site_spec();
        let page = links(&[
            "http://tr.anidub.com/download.php?id=1",
            "http://tr.anidub.com/details.php?id=2",
            "http://tr.anidub.com/download.php?id=2",
        ]);
        assert_eq!(
            spec.discovery.select("http://tr.anidub.com/details.php?id=2", &page),
            LinkMatch::Found("http://tr.anidub.com/download.php?id=2".to_string())
        );
    }

    #[test]
    fn reference_id_marker_uses_the_reference() {
        let discovery = MarkerDiscovery {
            download: DownloadMarker::ContainsReferenceId {
                prefix: "d.rutor.org/download/".to_string(),
                id: ReferenceId::LastPathSegment,
            },
            guest_marker: None,
            login_wall_marker: None,
        };
        let page = links(&["http://d.rutor.org/download/1", "http://d.rutor.org/download/77"]);
        assert_eq!(
            discovery.select("http://rutor.org/torrent/77", &page),
            LinkMatch::Found("http://d.rutor.org/download/77".to_string())
        );
    }

    #[test]
    fn login_budget_is_spent_once() {
        let mut budget = LoginBudget::new(MAX_LOGIN_ATTEMPTS);
        assert!(budget.take());
        assert!(!budget.take());
    }
}
