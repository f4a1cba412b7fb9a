use chrono::{DateTime, Utc};
use ratatui::prelude::Color;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.len() <= max_len {
    s.to_string()
  } else {
    format!("{}...", &s[..max_len.saturating_sub(3)])
  }
}

/// First `n` characters, for fixed-width badge columns
pub fn prefix(s: &str, n: usize) -> String {
  s.chars().take(n).collect()
}

/// Display color for a PagerDuty incident status
pub fn status_color(status: &str) -> Color {
  match status {
    "triggered" => Color::Red,
    "acknowledged" => Color::Yellow,
    "resolved" => Color::Green,
    _ => Color::White,
  }
}

/// Display color for an incident urgency
pub fn urgency_color(urgency: &str) -> Color {
  match urgency {
    "high" => Color::LightRed,
    "low" => Color::DarkGray,
    _ => Color::White,
  }
}

/// Whole minutes an incident has been open, from its RFC 3339
/// created_at timestamp
pub fn age_minutes(created_at: &str, now: DateTime<Utc>) -> Option<i64> {
  let created = DateTime::parse_from_rfc3339(created_at).ok()?;
  Some((now - created.with_timezone(&Utc)).num_minutes().max(0))
}
