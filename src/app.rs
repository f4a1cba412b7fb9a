use crate::cache::{Snapshot, StaleKind};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::pagerduty::client::PagerDutyClient;
use crate::pagerduty::types::{Entity, ResourceKind};
use crate::refresh::{RefreshHandle, RefreshScheduler};
use chrono::{DateTime, Utc};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tracing::debug;

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Which panel has focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
  Incidents,
  Oncalls,
}

/// Render-ready state rebuilt from the latest snapshot.
///
/// The sink never reaches back into the cache; each snapshot carries
/// the full entity set and this struct is replaced from it wholesale.
#[derive(Debug, Default)]
pub struct Dashboard {
  pub incidents: Vec<Entity>,
  pub oncalls: Vec<Entity>,
  pub stale: Vec<StaleKind>,
  pub generation: u64,
  pub refreshed_at: Option<DateTime<Utc>>,
  pub partial: bool,
  pub changed_last_cycle: usize,
}

impl Dashboard {
  fn apply(&mut self, snapshot: Snapshot) {
    if snapshot.generation < self.generation {
      debug!(
        have = self.generation,
        got = snapshot.generation,
        "out-of-order snapshot dropped"
      );
      return;
    }

    self.generation = snapshot.generation;
    self.refreshed_at = Some(snapshot.fetched_at);
    self.partial = snapshot.partial;
    self.changed_last_cycle = snapshot.changed_count();

    self.incidents = snapshot
      .entities_of(ResourceKind::Incidents)
      .cloned()
      .collect();
    // Newest first, matching the backend's created_at:desc ordering.
    self
      .incidents
      .sort_by(|a, b| b.field_str("created_at").cmp(&a.field_str("created_at")));

    self.oncalls = snapshot.entities_of(ResourceKind::Oncalls).cloned().collect();
    self.oncalls.sort_by(|a, b| {
      let policy_a = a.nested_str("escalation_policy", "summary");
      let policy_b = b.nested_str("escalation_policy", "summary");
      policy_a.cmp(&policy_b).then_with(|| {
        a.fields
          .get("escalation_level")
          .and_then(serde_json::Value::as_u64)
          .cmp(&b.fields.get("escalation_level").and_then(serde_json::Value::as_u64))
      })
    });

    self.stale = snapshot.stale;
  }

  pub fn stale_for(&self, kind: ResourceKind) -> Option<&StaleKind> {
    self.stale.iter().find(|marker| marker.kind == kind)
  }
}

/// Main application state
pub struct App {
  /// Focused panel
  view: View,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  /// Selection per panel
  selected_incident: usize,
  selected_oncall: usize,

  /// Latest render-ready state
  dashboard: Dashboard,

  /// Application configuration
  config: Config,

  /// Refresh scheduler handle
  refresh: RefreshHandle,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = PagerDutyClient::new(&config)?;
    let refresh = RefreshScheduler::spawn(client, config.refresh.refresh_config());

    Ok(Self {
      view: View::Incidents,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      selected_incident: 0,
      selected_oncall: 0,
      dashboard: Dashboard::default(),
      config,
      refresh,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler and bridge the snapshot stream into it
    let mut events = EventHandler::new(Duration::from_millis(250));
    if let Some(snapshots) = self.refresh.take_snapshots() {
      events.forward_snapshots(snapshots);
    }

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| crate::ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Stop the scheduler before giving the terminal back
    self.refresh.shutdown();
    self.refresh.join().await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Snapshot(snapshot) => {
        self.dashboard.apply(snapshot);
        self.clamp_selection();
      }
    }
  }

  fn handle_key(&mut self, key: crossterm::event::KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      // Quit
      KeyCode::Char('q') => {
        self.should_quit = true;
      }
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
      KeyCode::Tab => {
        self.view = match self.view {
          View::Incidents => View::Oncalls,
          View::Oncalls => View::Incidents,
        };
      }

      // Refresh now
      KeyCode::Char('r') => self.refresh.force_refresh(),

      // Mode switch
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
      }

      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command();
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0; // Reset selection on input change
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0; // Reset selection on input change
      }
      _ => {}
    }
  }

  fn execute_command(&mut self) {
    // Get the command to execute - either from selected suggestion or direct input
    let suggestions = commands::get_suggestions(&self.command_input);
    let cmd = if !suggestions.is_empty() && self.selected_suggestion < suggestions.len() {
      suggestions[self.selected_suggestion].name.to_string()
    } else {
      self.command_input.trim().to_lowercase()
    };

    match cmd.as_str() {
      "incidents" => self.view = View::Incidents,
      "oncalls" => self.view = View::Oncalls,
      "refresh" => self.refresh.force_refresh(),
      "quit" => self.should_quit = true,
      _ => {
        // Unknown command
      }
    }
    self.command_input.clear();
  }

  fn move_selection(&mut self, delta: i32) {
    let (selected, len) = match self.view {
      View::Incidents => (&mut self.selected_incident, self.dashboard.incidents.len()),
      View::Oncalls => (&mut self.selected_oncall, self.dashboard.oncalls.len()),
    };
    if len > 0 {
      *selected = (*selected as i32 + delta).rem_euclid(len as i32) as usize;
    }
  }

  fn clamp_selection(&mut self) {
    if !self.dashboard.incidents.is_empty() {
      self.selected_incident = self.selected_incident.min(self.dashboard.incidents.len() - 1);
    } else {
      self.selected_incident = 0;
    }
    if !self.dashboard.oncalls.is_empty() {
      self.selected_oncall = self.selected_oncall.min(self.dashboard.oncalls.len() - 1);
    } else {
      self.selected_oncall = 0;
    }
  }

  // Accessors for UI rendering
  pub fn dashboard(&self) -> &Dashboard {
    &self.dashboard
  }

  pub fn view(&self) -> View {
    self.view
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn selected(&self) -> usize {
    match self.view {
      View::Incidents => self.selected_incident,
      View::Oncalls => self.selected_oncall,
    }
  }

  pub fn title(&self) -> &str {
    match &self.config.title {
      Some(title) => title,
      None => &self.config.pagerduty.api_url,
    }
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }
}
