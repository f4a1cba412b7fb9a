//! PagerDuty API client: authenticated paginated requests with
//! exponential backoff and rate-limit bookkeeping.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

use super::api_types::{into_entity, ApiListResponse};
use super::types::{Collection, Page, ResourceKind};
use super::FetchError;

const PAGERDUTY_ACCEPT: &str = "application/vnd.pagerduty+json;version=2";

/// Retry and throttling knobs for the client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Delay before the first retry.
  pub base_delay: Duration,
  /// Growth factor between consecutive retries.
  pub multiplier: f64,
  /// Ceiling for any single backoff delay.
  pub max_delay: Duration,
  /// Total attempts per page, including the first.
  pub max_attempts: u32,
  /// Longest the client will suspend waiting for a rate-limit reset.
  pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      base_delay: Duration::from_millis(500),
      multiplier: 2.0,
      max_delay: Duration::from_secs(10),
      max_attempts: 4,
      max_rate_limit_wait: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  /// Backoff delay before retry `attempt` (zero-based).
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    let factor = self.multiplier.powi(attempt.min(16) as i32);
    let delay = self.base_delay.mul_f64(factor);
    delay.min(self.max_delay)
  }
}

/// Per-endpoint rate-limit bookkeeping, updated from response headers
/// after every attempt and consulted before the next request.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitState {
  pub tokens_remaining: u32,
  pub reset_at: DateTime<Utc>,
}

/// Outcome of a single page request, before retry handling.
enum AttemptError {
  /// 429; the rate-limit state was updated from the response.
  Throttled,
  /// Non-retryable 4xx.
  Rejected(u16),
  /// Transport error, 5xx or malformed body.
  Retryable(String),
}

/// PagerDuty API client.
#[derive(Clone)]
pub struct PagerDutyClient {
  http: reqwest::Client,
  endpoints: HashMap<ResourceKind, Url>,
  token: String,
  page_limit: u32,
  user_ids: Vec<String>,
  retry: RetryPolicy,
  rate_limits: Arc<Mutex<HashMap<ResourceKind, RateLimitState>>>,
}

impl PagerDutyClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(config, token)
  }

  /// Build a client with an explicit token (tests inject one here).
  pub fn with_token(config: &Config, token: impl Into<String>) -> Result<Self> {
    let mut base_url = Url::parse(&config.pagerduty.api_url)
      .map_err(|e| eyre!("Invalid PagerDuty API URL {}: {}", config.pagerduty.api_url, e))?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut endpoints = HashMap::new();
    for kind in ResourceKind::ALL {
      let url = base_url
        .join(kind.endpoint_path())
        .map_err(|e| eyre!("Invalid endpoint URL for {}: {}", kind, e))?;
      endpoints.insert(kind, url);
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoints,
      token: token.into(),
      page_limit: config.pagerduty.page_limit,
      user_ids: config.pagerduty.user_ids.clone(),
      retry: config.refresh.retry_policy(),
      rate_limits: Arc::new(Mutex::new(HashMap::new())),
    })
  }

  /// Current rate-limit view for an endpoint, if any response has
  /// reported one.
  pub fn rate_limit(&self, kind: ResourceKind) -> Option<RateLimitState> {
    self.rate_limits.lock().ok()?.get(&kind).copied()
  }

  /// Fetch the complete collection for one resource kind, following
  /// pagination until the backend reports no further pages.
  ///
  /// When a later page fails after page-level retries, the pages that
  /// did arrive are returned inside [`FetchError::PartialFetch`] so the
  /// caller can decide between stale-but-available data and nothing.
  pub async fn fetch_collection(
    &self,
    kind: ResourceKind,
    since: Option<DateTime<Utc>>,
  ) -> Result<Collection, FetchError> {
    let mut collection = Collection::new(kind);
    let mut cursor: Option<String> = None;

    loop {
      match self.fetch_page(kind, cursor.as_deref(), since).await {
        Ok(page) => {
          let more = page.has_more();
          cursor = page.cursor.clone();
          collection.push_page(page);
          if !more {
            break;
          }
        }
        Err(err) if !collection.is_empty() => {
          warn!(kind = %kind, collected = collection.len(), error = %err, "pagination failed partway");
          return Err(FetchError::PartialFetch {
            collected: collection,
            cause: Box::new(err),
          });
        }
        Err(err) => return Err(err),
      }
    }

    debug!(kind = %kind, items = collection.len(), "collection fetched");
    Ok(collection)
  }

  /// Fetch one page, retrying transport/5xx failures with exponential
  /// backoff and suspending on exhausted rate limits.
  async fn fetch_page(
    &self,
    kind: ResourceKind,
    cursor: Option<&str>,
    since: Option<DateTime<Utc>>,
  ) -> Result<Page, FetchError> {
    let offset: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let mut attempt = 0u32;

    loop {
      self.wait_for_rate_limit(kind).await?;

      match self.request_page(kind, offset, since).await {
        Ok(page) => return Ok(page),
        // The updated rate-limit state drives the wait at the top of
        // the loop; throttled attempts don't consume the retry budget.
        Err(AttemptError::Throttled) => continue,
        Err(AttemptError::Rejected(code)) => return Err(FetchError::Rejected(code)),
        Err(AttemptError::Retryable(reason)) => {
          attempt += 1;
          if attempt >= self.retry.max_attempts {
            return Err(FetchError::Unavailable {
              attempts: attempt,
              reason,
            });
          }
          let delay = self.retry.backoff_delay(attempt - 1);
          debug!(kind = %kind, attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "retrying page fetch");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }

  /// Issue one HTTP request for a page and classify the outcome.
  async fn request_page(
    &self,
    kind: ResourceKind,
    offset: u64,
    since: Option<DateTime<Utc>>,
  ) -> Result<Page, AttemptError> {
    let url = self.page_url(kind, offset, since);

    let response = self
      .http
      .get(url)
      .header(ACCEPT, PAGERDUTY_ACCEPT)
      .header(AUTHORIZATION, format!("Token token={}", self.token))
      .send()
      .await
      .map_err(|e| AttemptError::Retryable(e.to_string()))?;

    let status = response.status();
    self.record_rate_limit(kind, response.headers(), status == StatusCode::TOO_MANY_REQUESTS);

    if status == StatusCode::TOO_MANY_REQUESTS {
      return Err(AttemptError::Throttled);
    }
    if status.is_client_error() {
      return Err(AttemptError::Rejected(status.as_u16()));
    }
    if !status.is_success() {
      return Err(AttemptError::Retryable(format!("HTTP {}", status)));
    }

    let body: ApiListResponse = response
      .json()
      .await
      .map_err(|e| AttemptError::Retryable(format!("malformed response body: {}", e)))?;

    let more = body.more;
    let raw_items = body.take_items(kind);
    let raw_count = raw_items.len() as u64;

    let fetched_at = Utc::now();
    let items: Vec<_> = raw_items
      .into_iter()
      .filter_map(|obj| into_entity(kind, obj, fetched_at))
      .collect();

    if (items.len() as u64) < raw_count {
      warn!(kind = %kind, dropped = raw_count - items.len() as u64, "items without derivable id dropped");
    }

    // The cursor advances by the raw item count so the next offset
    // matches what the backend counted, dropped items included. An
    // empty page claiming more data would never advance; treat it as
    // the last page.
    let cursor = if more && raw_count > 0 {
      Some((offset + raw_count).to_string())
    } else {
      None
    };

    Ok(Page { items, cursor })
  }

  fn page_url(&self, kind: ResourceKind, offset: u64, since: Option<DateTime<Utc>>) -> Url {
    let mut url = self.endpoints[&kind].clone();

    {
      let mut query = url.query_pairs_mut();
      query.append_pair("limit", &self.page_limit.to_string());
      query.append_pair("offset", &offset.to_string());
      query.append_pair("time_zone", "UTC");

      match kind {
        ResourceKind::Incidents => {
          query.append_pair("statuses[]", "triggered");
          query.append_pair("statuses[]", "acknowledged");
          query.append_pair("sort_by", "created_at:desc");
          for user_id in &self.user_ids {
            query.append_pair("user_ids[]", user_id);
          }
          if let Some(since) = since {
            query.append_pair("since", &since.to_rfc3339());
          }
        }
        ResourceKind::Oncalls => {
          query.append_pair("earliest", "true");
          for user_id in &self.user_ids {
            query.append_pair("user_ids[]", user_id);
          }
        }
      }
    }

    url
  }

  /// Suspend until the endpoint's rate-limit window resets, bounded by
  /// the policy's maximum wait.
  async fn wait_for_rate_limit(&self, kind: ResourceKind) -> Result<(), FetchError> {
    let state = match self.rate_limit(kind) {
      Some(state) => state,
      None => return Ok(()),
    };

    if state.tokens_remaining > 0 {
      return Ok(());
    }

    let now = Utc::now();
    if state.reset_at <= now {
      return Ok(());
    }

    let wait = (state.reset_at - now).to_std().unwrap_or(Duration::ZERO);
    if wait > self.retry.max_rate_limit_wait {
      return Err(FetchError::RateLimited {
        reset_at: state.reset_at,
      });
    }

    debug!(kind = %kind, wait_ms = wait.as_millis() as u64, "rate limit exhausted, waiting for reset");
    tokio::time::sleep(wait).await;
    Ok(())
  }

  /// Update the endpoint's rate-limit state from response metadata.
  /// Runs after every attempt, success or failure.
  fn record_rate_limit(&self, kind: ResourceKind, headers: &HeaderMap, throttled: bool) {
    let remaining = header_num(headers, "ratelimit-remaining");
    let reset_secs =
      header_num(headers, "ratelimit-reset").or_else(|| header_num(headers, "retry-after"));

    if remaining.is_none() && reset_secs.is_none() && !throttled {
      return;
    }

    let tokens_remaining = remaining.unwrap_or(if throttled { 0 } else { 1 }) as u32;
    let reset_at = Utc::now() + chrono::Duration::seconds(reset_secs.unwrap_or(1) as i64);

    if let Ok(mut limits) = self.rate_limits.lock() {
      limits.insert(
        kind,
        RateLimitState {
          tokens_remaining,
          reset_at,
        },
      );
    }
  }
}

fn header_num(headers: &HeaderMap, name: &str) -> Option<u64> {
  headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
