use crate::model::{SessionSnapshot, Trigger, UserAction};
use crate::serializer::SerializerHandle;
use tokio::sync::{broadcast, watch};

pub const EVENT_UPDATE_STATE: &str = "updater://state";
/// Sent to the download surface only.
pub const EVENT_UPDATE_PROGRESS: &str = "updater://progress";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
  SessionChanged(SessionSnapshot),
}

#[derive(Clone)]
pub struct EventHub {
  tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
  pub fn new() -> Self {
    // Small buffer; consumers should be fast. A lagging renderer only misses intermediate progress.
    let (tx, _) = broadcast::channel(256);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
    self.tx.subscribe()
  }

  pub fn emit_session_changed(&self, snapshot: SessionSnapshot) {
    // No receivers is fine: the renderer may be gone.
    let _ = self.tx.send(ServerEvent::SessionChanged(snapshot));
  }
}

impl Default for EventHub {
  fn default() -> Self {
    Self::new()
  }
}

/// Mirrors committed transitions outward. Fire-and-forget; never waits on the renderer.
#[derive(Clone)]
pub struct NotificationBridge {
  hub: EventHub,
  latest: watch::Sender<SessionSnapshot>,
}

impl NotificationBridge {
  pub fn new(hub: EventHub) -> Self {
    let (latest, _) = watch::channel(SessionSnapshot::idle());
    Self { hub, latest }
  }

  pub fn on_transition(&self, snapshot: SessionSnapshot) {
    self.latest.send_replace(snapshot.clone());
    self.hub.emit_session_changed(snapshot);
  }

  pub fn latest(&self) -> SessionSnapshot {
    self.latest.borrow().clone()
  }

  pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
    self.latest.subscribe()
  }

  pub fn hub(&self) -> &EventHub {
    &self.hub
  }
}

/// Actions arriving from the non-modal renderer UI.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UiAction {
  CheckRequested,
  DownloadRequested,
  InstallRequested,
  /// Closes whichever prompt is pending without acting on it.
  Dismiss,
}

impl UiAction {
  pub fn trigger(self) -> Trigger {
    match self {
      UiAction::CheckRequested => Trigger::CheckRequested { manual: true },
      UiAction::DownloadRequested => Trigger::User(UserAction::Download),
      UiAction::InstallRequested => Trigger::User(UserAction::RestartNow),
      UiAction::Dismiss => Trigger::User(UserAction::Later),
    }
  }

  /// Inbound half of the bridge: hand the action to the serializer and return. `false` once the
  /// worker has stopped.
  pub fn forward(self, queue: &SerializerHandle) -> bool {
    tracing::debug!(action = ?self, "ui action");
    queue.enqueue(self.trigger())
  }
}
