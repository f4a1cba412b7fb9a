use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use crate::app::Dashboard;
use crate::pagerduty::types::{Entity, ResourceKind};
use crate::ui::utils::{age_minutes, prefix, status_color, truncate, urgency_color};

pub fn draw_incidents(frame: &mut Frame, area: Rect, dashboard: &Dashboard, selected: usize) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Ratio(3, 4), Constraint::Ratio(1, 4)])
    .split(area);

  draw_incident_list(frame, chunks[0], dashboard, selected);
  draw_incident_details(frame, chunks[1], dashboard.incidents.get(selected));
}

fn draw_incident_list(frame: &mut Frame, area: Rect, dashboard: &Dashboard, selected: usize) {
  let incidents = &dashboard.incidents;

  let mut title = if dashboard.refreshed_at.is_none() {
    " Incidents (loading...) ".to_string()
  } else {
    format!(" Incidents ({}) ", incidents.len())
  };
  let mut border_style = Style::default().fg(Color::Blue);
  if let Some(marker) = dashboard.stale_for(ResourceKind::Incidents) {
    title = format!(
      " Incidents ({}) STALE since {} ",
      incidents.len(),
      marker.since.format("%H:%M:%S")
    );
    border_style = Style::default().fg(Color::Yellow);
  }

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(border_style);

  if incidents.is_empty() {
    let content = if dashboard.refreshed_at.is_none() {
      "Waiting for the first refresh..."
    } else {
      "No open incidents."
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let now = Utc::now();
  let items: Vec<ListItem> = incidents
    .iter()
    .map(|incident| {
      let status = incident.field_str("status").unwrap_or("?");
      let urgency = incident.field_str("urgency").unwrap_or("?");
      let age = incident
        .field_str("created_at")
        .and_then(|created| age_minutes(created, now))
        .map(|minutes| format!("{:>5}m", minutes))
        .unwrap_or_else(|| "     ?".to_string());
      let title = incident.field_str("title").unwrap_or("(no title)");

      let line = Line::from(vec![
        Span::styled(
          format!("{:^6}", prefix(&status.to_uppercase(), 4)),
          Style::default().fg(status_color(status)),
        ),
        Span::styled("│", Style::default().fg(Color::DarkGray)),
        Span::styled(
          format!("{:^6}", prefix(&urgency.to_uppercase(), 4)),
          Style::default().fg(urgency_color(urgency)),
        ),
        Span::styled("│", Style::default().fg(Color::DarkGray)),
        Span::raw(age),
        Span::raw(" │ "),
        Span::raw(truncate(title, 80)),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default().with_selected(Some(selected));
  frame.render_stateful_widget(list, area, &mut state);
}

fn draw_incident_details(frame: &mut Frame, area: Rect, incident: Option<&Entity>) {
  let block = Block::default()
    .title(" Details ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let Some(incident) = incident else {
    let paragraph = Paragraph::new("No incident selected.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  };

  let mut lines = vec![
    Line::from(Span::styled(
      incident.field_str("title").unwrap_or("(no title)").to_string(),
      Style::default().bold(),
    )),
    Line::raw(""),
    detail_line("Id", incident.field_str("id").unwrap_or(&incident.id)),
    detail_line("Status", incident.field_str("status").unwrap_or("?")),
    detail_line("Urgency", incident.field_str("urgency").unwrap_or("?")),
    detail_line("Created", incident.field_str("created_at").unwrap_or("?")),
  ];

  if let Some(service) = incident.nested_str("service", "summary") {
    lines.push(detail_line("Service", service));
  }
  if let Some(policy) = incident.nested_str("escalation_policy", "summary") {
    lines.push(detail_line("Policy", policy));
  }
  if let Some(url) = incident.field_str("html_url") {
    lines.push(Line::raw(""));
    lines.push(Line::from(Span::styled(
      url.to_string(),
      Style::default().fg(Color::Blue),
    )));
  }

  let paragraph = Paragraph::new(lines)
    .block(block)
    .wrap(ratatui::widgets::Wrap { trim: false });
  frame.render_widget(paragraph, area);
}

fn detail_line(label: &str, value: &str) -> Line<'static> {
  Line::from(vec![
    Span::styled(format!("{:<9}", label), Style::default().fg(Color::Cyan)),
    Span::raw(value.to_string()),
  ])
}
