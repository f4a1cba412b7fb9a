use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::Snapshot;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  /// A completed refresh cycle arrived from the scheduler
  Snapshot(Snapshot),
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn terminal event reader
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(evt) = event::read() {
          if let CrosstermEvent::Key(key) = evt {
            if input_tx.send(Event::Key(key)).is_err() {
              break;
            }
          }
        }
      } else {
        // Tick
        if input_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Bridge the scheduler's snapshot stream into the event loop
  pub fn forward_snapshots(&self, mut snapshots: mpsc::UnboundedReceiver<Snapshot>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      while let Some(snapshot) = snapshots.recv().await {
        if tx.send(Event::Snapshot(snapshot)).is_err() {
          break;
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
