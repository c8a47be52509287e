use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{Method, StatusCode, Url};
use updater_logging::walk_trace;

use crate::session::SessionHandle;
use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 16 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101".to_string(),
        }
    }
}

/// HTTP client bound to one site's cookie session.
///
/// Redirects are followed by hand so that cookies set on every hop land in
/// the session, and every request carries the session's current cookies.
#[derive(Debug, Clone)]
pub struct SiteClient {
    settings: FetchSettings,
    session: SessionHandle,
}

impl SiteClient {
    pub fn new(settings: FetchSettings, session: SessionHandle) -> Self {
        Self { settings, session }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub async fn get(&self, url: &str) -> Result<FetchOutput, FetchError> {
        self.execute(Method::GET, url, None).await
    }

    /// POSTs `fields` url-encoded. An empty slice still sends a POST with an empty body.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<FetchOutput, FetchError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        self.execute(Method::POST, url, Some(body)).await
    }

    fn build_client(&self) -> Result<reqwest::Client, FetchError> {
        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(self.settings.user_agent.clone())
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        form: Option<String>,
    ) -> Result<FetchOutput, FetchError> {
        let mut current = Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = self.build_client()?;
        let mut method = method;
        let mut form = form;
        let mut redirect_count = 0;
        let mut cookies_set = Vec::new();

        loop {
            walk_trace!("{} {}", method, current);
            let mut request = client.request(method.clone(), current.clone());
            if let Some(cookie) = self.session.cookie_header(Utc::now()) {
                request = request.header(COOKIE, cookie);
            }
            if let Some(body) = &form {
                request = request
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .body(body.clone());
            }

            let response = request.send().await.map_err(map_reqwest_error)?;
            for value in response.headers().get_all(SET_COOKIE) {
                if let Some(name) = value
                    .to_str()
                    .ok()
                    .and_then(|raw| self.session.apply_set_cookie(raw))
                {
                    cookies_set.push(name);
                }
            }

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            if status.is_redirection() {
                if let Some(location) = location {
                    if redirect_count >= self.settings.redirect_limit {
                        return Err(FetchError::new(
                            FailureKind::RedirectLimitExceeded,
                            format!("more than {} redirects", self.settings.redirect_limit),
                        ));
                    }
                    current = current
                        .join(&location)
                        .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
                    redirect_count += 1;
                    if method == Method::POST && switches_to_get(status) {
                        method = Method::GET;
                        form = None;
                    }
                    continue;
                }
            }

            if !status.is_success() {
                return Err(FetchError::new(
                    FailureKind::HttpStatus(status.as_u16()),
                    status.to_string(),
                ));
            }

            return self
                .read_body(response, url, redirect_count, cookies_set)
                .await;
        }
    }

    async fn read_body(
        &self,
        response: reqwest::Response,
        original_url: &str,
        redirect_count: usize,
        cookies_set: Vec<String>,
    ) -> Result<FetchOutput, FetchError> {
        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: original_url.to_string(),
            final_url,
            status,
            redirect_count,
            content_type,
            cookies_set,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput {
            bytes: bytes.into(),
            metadata,
        })
    }
}

fn switches_to_get(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
    )
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
