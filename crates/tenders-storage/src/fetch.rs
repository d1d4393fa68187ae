//! HTTP retrieval with transport retry and bounded rate-limit handling.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; Mobile) AppleWebKit/537.36";
pub const KENYAN_ACCEPT_LANGUAGE: &str = "en-KE,sw-KE,en;q=0.9,sw;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    RateLimited,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::RateLimited
    } else if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, first request included.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// 429 responses tolerated per fetch before giving up.
    pub max_retries: usize,
    /// Wait used when `Retry-After` is absent or not a number of seconds.
    pub default_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_wait: Duration::from_secs(60),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl RateLimitPolicy {
    pub fn wait_for(&self, headers: &HeaderMap) -> Duration {
        parse_retry_after(headers)
            .unwrap_or(self.default_wait)
            .min(self.max_wait)
    }
}

pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub backoff: BackoffPolicy,
    pub rate_limit: RateLimitPolicy,
    /// Query pairs added to every request; caller pairs win on collision.
    pub mobile_params: Vec<(String, String)>,
    /// Host suffixes whose certificates are not verified. Government portals
    /// under `.go.ke` routinely serve broken chains; nothing else is exempt.
    pub insecure_tls_suffixes: Vec<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: MOBILE_USER_AGENT.to_string(),
            accept_language: KENYAN_ACCEPT_LANGUAGE.to_string(),
            backoff: BackoffPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            mobile_params: vec![
                ("v".to_string(), "mobile".to_string()),
                ("lite".to_string(), "1".to_string()),
            ],
            insecure_tls_suffixes: vec![".go.ke".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("still rate limited after {retries} waits for {url}")]
    RateLimited { retries: usize, url: String },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    lenient_client: reqwest::Client,
    backoff: BackoffPolicy,
    rate_limit: RateLimitPolicy,
    mobile_params: Vec<(String, String)>,
    insecure_tls_suffixes: Vec<String>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("accept-language header")?,
        );

        let builder = || {
            reqwest::Client::builder()
                .gzip(true)
                .brotli(true)
                .timeout(config.timeout)
                .user_agent(config.user_agent.clone())
                .default_headers(default_headers.clone())
        };

        let client = builder().build().context("building reqwest client")?;
        let lenient_client = builder()
            .danger_accept_invalid_certs(true)
            .build()
            .context("building lenient reqwest client")?;

        Ok(Self {
            client,
            lenient_client,
            backoff: config.backoff,
            rate_limit: config.rate_limit,
            mobile_params: config.mobile_params,
            insecure_tls_suffixes: config.insecure_tls_suffixes,
        })
    }

    /// Whether certificate checks are skipped for this host.
    pub fn skips_tls_verification(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.insecure_tls_suffixes.iter().any(|suffix| {
            host.ends_with(suffix.as_str()) || host == suffix.trim_start_matches('.')
        })
    }

    /// Mobile parameters first, then caller pairs replacing any with the same key.
    pub fn merged_query(&self, query: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut merged = self.mobile_params.clone();
        for (key, value) in query {
            match merged.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.to_string(),
                None => merged.push((key.to_string(), value.to_string())),
            }
        }
        merged
    }

    pub async fn fetch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let extra_headers = header_map(headers)?;
        let query = self.merged_query(query);
        let client = if self.skips_tls_verification(&parsed) {
            &self.lenient_client
        } else {
            &self.client
        };

        let span = info_span!("http_fetch", url);
        self.fetch_with_retries(client, parsed, &query, extra_headers)
            .instrument(span)
            .await
    }

    async fn fetch_with_retries(
        &self,
        client: &reqwest::Client,
        url: Url,
        query: &[(String, String)],
        headers: HeaderMap,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        let mut rate_limited = 0usize;

        loop {
            let resp_result = client
                .get(url.clone())
                .query(query)
                .headers(headers.clone())
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        let body = resp.bytes().await?.to_vec();
                        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            content_type,
                            body,
                        });
                    }

                    match classify_status(status) {
                        RetryDisposition::RateLimited => {
                            if rate_limited >= self.rate_limit.max_retries {
                                return Err(FetchError::RateLimited {
                                    retries: rate_limited,
                                    url: final_url,
                                });
                            }
                            rate_limited += 1;
                            let wait = self.rate_limit.wait_for(resp.headers());
                            warn!(
                                wait_secs = wait.as_secs(),
                                rate_limited, "rate limited; waiting before retry"
                            );
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                        RetryDisposition::Retryable if attempt + 1 < self.backoff.max_attempts => {
                            let delay = self.backoff.delay_for_attempt(attempt);
                            warn!(status = status.as_u16(), attempt, ?delay, "server error; retrying");
                            attempt += 1;
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        _ => {
                            return Err(FetchError::HttpStatus {
                                status: status.as_u16(),
                                url: final_url,
                            });
                        }
                    }
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable
                        && attempt + 1 < self.backoff.max_attempts
                    {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(error = %err, attempt, ?delay, "request failed; retrying");
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

fn header_map(headers: &[(&str, &str)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
