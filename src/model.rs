use crate::error::ErrorCode;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
  Idle,
  Checking,
  Available,
  Downloading,
  Downloaded,
  NotAvailable,
  Error,
}

impl Step {
  /// Steps that own a transient progress surface while active.
  pub fn uses_progress_surface(self) -> bool {
    matches!(self, Step::Checking | Step::Downloading)
  }

  /// Steps that end a session and fall back to `Idle`.
  pub fn is_terminal(self) -> bool {
    matches!(self, Step::NotAvailable | Step::Error)
  }

  /// Steps during which the adapter owes us a terminal event.
  pub fn awaits_service(self) -> bool {
    self.uses_progress_surface()
  }
}

impl Default for Step {
  fn default() -> Self {
    Step::Idle
  }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub release_notes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub release_date: Option<String>,
}

impl VersionInfo {
  pub fn new(version: impl Into<String>) -> Self {
    Self {
      version: version.into(),
      release_notes: None,
      release_date: None,
    }
  }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
  pub code: ErrorCode,
  pub message: String,
}

impl ErrorDetail {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }
}

/// Read-only view of the session pushed to the renderer after each committed transition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
  pub step: Step,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version_info: Option<VersionInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<ErrorDetail>,
  pub triggered_manually: bool,
  pub updated_at: String,
}

impl SessionSnapshot {
  pub fn idle() -> Self {
    Self {
      step: Step::Idle,
      version_info: None,
      progress: None,
      last_error: None,
      triggered_manually: false,
      updated_at: now_rfc3339(),
    }
  }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfaceKind {
  Checking,
  Downloading,
}

impl SurfaceKind {
  pub fn label(self) -> &'static str {
    match self {
      SurfaceKind::Checking => "update-checking",
      SurfaceKind::Downloading => "update-downloading",
    }
  }

  pub fn title(self) -> &'static str {
    match self {
      SurfaceKind::Checking => "Checking for Updates",
      SurfaceKind::Downloading => "Downloading Update",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(Uuid);

impl SurfaceId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  /// Window label safe for hosts that restrict label characters.
  pub fn window_label(&self, kind: SurfaceKind) -> String {
    format!("{}-{}", kind.label(), self.0.simple())
  }
}

impl Default for SurfaceId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for SurfaceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// One check or download started by the orchestrator. Events from an older operation are stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub(crate) u64);

impl OperationId {
  pub(crate) fn next(self) -> Self {
    OperationId(self.0 + 1)
  }
}

impl fmt::Display for OperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "op-{}", self.0)
  }
}

/// Events reported by the update service. Never applied directly; always enqueued.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
  CheckingForUpdate,
  UpdateAvailable(VersionInfo),
  UpdateNotAvailable,
  DownloadProgress(f64),
  UpdateDownloaded(VersionInfo),
  Error(ErrorDetail),
}

impl ServiceEvent {
  pub fn name(&self) -> &'static str {
    match self {
      ServiceEvent::CheckingForUpdate => "checking-for-update",
      ServiceEvent::UpdateAvailable(_) => "update-available",
      ServiceEvent::UpdateNotAvailable => "update-not-available",
      ServiceEvent::DownloadProgress(_) => "download-progress",
      ServiceEvent::UpdateDownloaded(_) => "update-downloaded",
      ServiceEvent::Error(_) => "error",
    }
  }
}

/// Answers to prompts, or equivalent actions from the non-modal UI.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UserAction {
  Download,
  Decline,
  RestartNow,
  Later,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
  CheckRequested { manual: bool },
  Service { op: OperationId, event: ServiceEvent },
  User(UserAction),
  /// Terminal step acknowledged; return to `Idle`.
  Reset,
  Shutdown,
}

impl Trigger {
  pub fn name(&self) -> &'static str {
    match self {
      Trigger::CheckRequested { .. } => "check-requested",
      Trigger::Service { event, .. } => event.name(),
      Trigger::User(_) => "user-action",
      Trigger::Reset => "reset",
      Trigger::Shutdown => "shutdown",
    }
  }
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
  pub seq: u64,
  pub trigger: Trigger,
}

pub fn now_rfc3339() -> String {
  time::OffsetDateTime::now_utc()
    .format(&time::format_description::well_known::Rfc3339)
    .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
