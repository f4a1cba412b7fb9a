mod utils;
mod views;

use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::app::{App, Mode, View};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  draw_header(frame, chunks[0], app);

  match app.view() {
    View::Incidents => {
      views::incidents::draw_incidents(frame, chunks[1], app.dashboard(), app.selected());
    }
    View::Oncalls => {
      views::oncalls::draw_oncalls(frame, chunks[1], app.dashboard(), app.selected());
    }
  }

  draw_status_bar(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
  let dashboard = app.dashboard();

  let mut spans = vec![
    Span::styled(" pd9s ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", extract_domain(app.title())),
      Style::default().fg(Color::White),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
  ];

  match dashboard.refreshed_at {
    Some(refreshed_at) => {
      let age = (Utc::now() - refreshed_at).num_seconds().max(0);
      spans.push(Span::styled(
        format!(" gen {} · {}s ago ", dashboard.generation, age),
        Style::default().fg(Color::DarkGray),
      ));
      if dashboard.changed_last_cycle > 0 {
        spans.push(Span::styled(
          format!("({} changed) ", dashboard.changed_last_cycle),
          Style::default().fg(Color::Yellow),
        ));
      }
    }
    None => {
      spans.push(Span::styled(
        " connecting... ",
        Style::default().fg(Color::DarkGray),
      ));
    }
  }

  if dashboard.partial {
    spans.push(Span::styled(
      " PARTIAL ",
      Style::default().fg(Color::Black).bg(Color::Yellow).bold(),
    ));
    for marker in &dashboard.stale {
      spans.push(Span::styled(
        format!(" {}: {} ", marker.kind, marker.reason),
        Style::default().fg(Color::Yellow),
      ));
    }
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.mode() {
    Mode::Normal => {
      let hint = " :command  Tab:panel  j/k:nav  r:refresh  q:quit";
      (hint.to_string(), Style::default().fg(Color::DarkGray))
    }
    Mode::Command => {
      let suggestions = app.autocomplete_suggestions();
      let mut hint = suggestions
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
          if i == app.selected_suggestion() {
            format!("[{}]", cmd.name)
          } else {
            cmd.name.to_string()
          }
        })
        .collect::<Vec<_>>()
        .join(" ");
      if let Some(cmd) = suggestions.get(app.selected_suggestion()) {
        hint.push_str(&format!("  ({})", cmd.description));
      }
      (
        format!(":{}  {}", app.command_input(), hint),
        Style::default().fg(Color::Yellow),
      )
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}

/// Extract the host from an API URL for the header
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(extract_domain("https://api.pagerduty.com"), "api.pagerduty.com");
    assert_eq!(
      extract_domain("https://api.eu.pagerduty.com/v2"),
      "api.eu.pagerduty.com"
    );
    assert_eq!(extract_domain("http://localhost:8080"), "localhost:8080");
    assert_eq!(extract_domain("Acme Ops"), "Acme Ops");
  }
}
