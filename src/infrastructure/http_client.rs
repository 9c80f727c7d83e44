//! HubSpot HTTP client with rate limiting and error handling
//!
//! One client serves both upstream interfaces: the legacy form-submissions
//! endpoint ([`SubmissionSource`]) and CRM contact search/update
//! ([`ContactStore`]). Every call goes through [`HubSpotClient::execute`],
//! which applies the steady `governor` quota, retries 429 responses and sleeps
//! according to the [`RateLimitPolicy`] after each response.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::{header::HeaderValue, Client, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::entities::{Contact, Submission, UpdatePlan};
use crate::domain::pagination::{PageToken, SubmissionPage};
use crate::domain::repositories::{ContactStore, SubmissionSource};
use crate::infrastructure::config::{defaults, AppConfig};
use crate::infrastructure::rate_limit::{RateLimitHeaders, RateLimitPolicy};
use crate::infrastructure::sync_error::{SyncError, SyncResult};

const SUBMISSIONS_PATH: [&str; 4] = ["form-integrations", "v1", "submissions", "forms"];
const CONTACTS_PATH: [&str; 4] = ["crm", "v3", "objects", "contacts"];

/// Upstream error bodies are cut to this many characters in errors and logs.
const ERROR_BODY_LIMIT: usize = 500;

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub private_app_token: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub page_size: usize,
}

impl HttpClientConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.hubspot.base_url.clone(),
            private_app_token: config.hubspot.private_app_token.clone(),
            user_agent: format!("consent-recovery/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: config.hubspot.request_timeout_seconds,
            max_requests_per_second: config.hubspot.max_requests_per_second,
            page_size: config.hubspot.page_size,
        }
    }

    /// Page size actually sent upstream.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, defaults::MAX_PAGE_SIZE)
    }
}

/// Rate-limited client for the HubSpot REST APIs
pub struct HubSpotClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    policy: RateLimitPolicy,
    base_url: Url,
    config: HttpClientConfig,
}

impl HubSpotClient {
    /// Create a new client with the given configuration
    pub fn new(config: HttpClientConfig, policy: RateLimitPolicy) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::config(format!("invalid base URL '{}': {e}", config.base_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| SyncError::config("Rate limit must be greater than 0"))?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        info!(
            "🌐 HubSpot client ready: base={} rps={} page_size={}",
            base_url,
            config.max_requests_per_second,
            config.effective_page_size()
        );

        Ok(Self {
            client,
            rate_limiter,
            policy,
            base_url,
            config,
        })
    }

    pub fn from_app_config(config: &AppConfig) -> SyncResult<Self> {
        Self::new(HttpClientConfig::from_app_config(config), config.rate_limit.clone())
    }

    fn endpoint(&self, prefix: &[&str], tail: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::config(format!("base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(prefix)
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.private_app_token)
            .header(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"))
    }

    /// Send a request through the governor.
    ///
    /// 429 responses are retried after the advised backoff up to the policy
    /// ceiling; any other non-2xx becomes [`SyncError::Upstream`].
    pub async fn execute(&self, request: Request) -> SyncResult<Response> {
        let url = request.url().to_string();
        let mut retries = 0;

        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| SyncError::Decode(format!("request body for {url} cannot be replayed")))?;

            self.rate_limiter.until_ready().await;
            debug!("➡️ {} {}", attempt.method(), url);
            let response = self.client.execute(attempt).await?;
            let status = response.status();
            let headers = RateLimitHeaders::from_headers(response.headers());

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retries >= self.policy.max_retries {
                    warn!("🚦 Rate limited {} times, giving up: {}", retries + 1, url);
                    return Err(SyncError::RateLimited {
                        attempts: retries + 1,
                        url,
                    });
                }
                retries += 1;
                let delay = self.policy.retry_delay(headers);
                warn!(
                    "🚦 HTTP 429 (retry {}/{}), backing off {:?}: {}",
                    retries, self.policy.max_retries, delay, url
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let pause = self.policy.delay_after(headers);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::upstream(status.as_u16(), &url, truncate(&body)));
            }
            return Ok(response);
        }
    }

    async fn execute_json(&self, request: Request) -> SyncResult<Value> {
        let url = request.url().to_string();
        let response = self.execute(request).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| SyncError::Decode(format!("{url}: {e}")))
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_LIMIT {
        body.to_string()
    } else {
        let cut: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{cut}…")
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContactRecord>,
}

#[derive(Debug, Deserialize)]
struct ContactRecord {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

impl From<ContactRecord> for Contact {
    fn from(record: ContactRecord) -> Self {
        let properties = record
            .properties
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
                (name, value)
            })
            .collect();
        Self {
            id: record.id,
            properties,
        }
    }
}

#[async_trait]
impl SubmissionSource for HubSpotClient {
    async fn fetch_page(&self, form_id: &str, after: Option<&str>) -> SyncResult<SubmissionPage> {
        let url = self.endpoint(&SUBMISSIONS_PATH, &[form_id])?;
        let limit = self.config.effective_page_size().to_string();
        let mut builder = self.request(Method::GET, url).query(&[("limit", limit.as_str())]);
        if let Some(token) = after {
            builder = builder.query(&[("after", token)]);
        }

        let body = match self.execute_json(builder.build()?).await {
            Ok(body) => body,
            Err(e) if e.is_missing_resource() => {
                warn!("⚠️ Form {} not readable, treating as empty: {}", form_id, e);
                return Ok(SubmissionPage::empty());
            }
            Err(e) => return Err(e),
        };

        let results: Vec<Submission> = match body.get("results") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| SyncError::Decode(format!("submissions for form {form_id}: {e}")))?,
            None => Vec::new(),
        };
        let next = PageToken::from_response(&body);

        info!(
            "📄 Form {}: {} submission(s), token {} → {}",
            form_id,
            results.len(),
            after.unwrap_or("<start>"),
            next.as_deref().unwrap_or("<end>")
        );

        Ok(SubmissionPage { results, next })
    }
}

#[async_trait]
impl ContactStore for HubSpotClient {
    async fn find_by_email(&self, email: &str, properties: &[String]) -> SyncResult<Option<Contact>> {
        let url = self.endpoint(&CONTACTS_PATH, &["search"])?;
        let body = json!({
            "filterGroups": [{
                "filters": [{"propertyName": "email", "operator": "EQ", "value": email}]
            }],
            "properties": properties,
            "limit": 1,
        });
        let request = self.request(Method::POST, url).json(&body).build()?;
        let value = self.execute_json(request).await?;

        let response: SearchResponse = serde_json::from_value(value)
            .map_err(|e| SyncError::Decode(format!("contact search for {email}: {e}")))?;
        let contact = response.results.into_iter().next().map(Contact::from);

        match &contact {
            Some(c) => debug!("🔎 {} → contact {}", email, c.id),
            None => debug!("🔎 {} → no contact", email),
        }
        Ok(contact)
    }

    async fn update_contact(&self, contact_id: &str, plan: &UpdatePlan) -> SyncResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&CONTACTS_PATH, &[contact_id])?;
        let request = self
            .request(Method::PATCH, url)
            .json(&json!({ "properties": plan }))
            .build()?;
        self.execute(request).await?;
        info!("✏️ Contact {} updated: {:?}", contact_id, plan.properties().keys().collect::<Vec<_>>());
        Ok(())
    }
}
