use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use crate::app::Dashboard;
use crate::pagerduty::types::ResourceKind;
use crate::ui::utils::truncate;

pub fn draw_oncalls(frame: &mut Frame, area: Rect, dashboard: &Dashboard, selected: usize) {
  let oncalls = &dashboard.oncalls;

  let mut title = if dashboard.refreshed_at.is_none() {
    " On call (loading...) ".to_string()
  } else {
    format!(" On call ({}) ", oncalls.len())
  };
  let mut border_style = Style::default().fg(Color::Blue);
  if let Some(marker) = dashboard.stale_for(ResourceKind::Oncalls) {
    title = format!(
      " On call ({}) STALE since {} ",
      oncalls.len(),
      marker.since.format("%H:%M:%S")
    );
    border_style = Style::default().fg(Color::Yellow);
  }

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(border_style);

  if oncalls.is_empty() {
    let content = if dashboard.refreshed_at.is_none() {
      "Waiting for the first refresh..."
    } else {
      "Nobody on call."
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = oncalls
    .iter()
    .map(|oncall| {
      let policy = oncall
        .nested_str("escalation_policy", "summary")
        .unwrap_or("(no policy)");
      let level = oncall
        .fields
        .get("escalation_level")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
      let user = oncall.nested_str("user", "summary").unwrap_or("(unassigned)");
      let until = oncall.field_str("end").unwrap_or("always");

      let line = Line::from(vec![
        Span::styled(
          format!("{:<28}", truncate(policy, 26)),
          Style::default().fg(Color::Cyan),
        ),
        Span::styled(format!("L{:<3}", level), Style::default().fg(Color::Yellow)),
        Span::raw(format!("{:<24}", truncate(user, 22))),
        Span::styled(
          format!("until {}", until),
          Style::default().fg(Color::DarkGray),
        ),
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
