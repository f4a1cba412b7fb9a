//! PagerDuty backend access: domain types, raw API types and the
//! paginated, rate-limit-aware client.

pub mod api_types;
pub mod client;
pub mod types;

use chrono::{DateTime, Utc};
use thiserror::Error;

use self::types::Collection;

/// Errors surfaced by a collection fetch after the client's internal
/// retry and rate-limit handling is exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Transport failures and 5xx responses that survived the retry
  /// ceiling.
  #[error("backend unavailable after {attempts} attempts: {reason}")]
  Unavailable { attempts: u32, reason: String },

  /// The rate-limit window extends past the longest wait the client is
  /// willing to suspend for.
  #[error("rate limited until {reset_at}")]
  RateLimited { reset_at: DateTime<Utc> },

  /// Non-retryable client error (4xx other than 429).
  #[error("request rejected with HTTP {0}")]
  Rejected(u16),

  /// Pagination failed partway through. `collected` holds the pages
  /// that did arrive, in response order, for callers that prefer
  /// stale-but-available data over nothing.
  #[error("fetch of {} stopped after {} items", .collected.kind, .collected.len())]
  PartialFetch {
    collected: Collection,
    #[source]
    cause: Box<FetchError>,
  },
}

impl FetchError {
  /// Short form for stale-kind markers and log lines.
  pub fn reason(&self) -> String {
    match self {
      FetchError::Unavailable { reason, .. } => format!("unavailable: {}", reason),
      FetchError::RateLimited { reset_at } => format!("rate limited until {}", reset_at),
      FetchError::Rejected(code) => format!("rejected (HTTP {})", code),
      FetchError::PartialFetch { collected, cause } => {
        format!("partial fetch ({} items): {}", collected.len(), cause.reason())
      }
    }
  }
}
