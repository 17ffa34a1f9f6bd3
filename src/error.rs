use crate::model::{ErrorDetail, Step, SurfaceKind};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  Network,
  Http4xx,
  Http5xx,
  Parse,
  Download,
  Install,
  Timeout,
  Sequencing,
  Host,
  Unknown,
}

impl ErrorCode {
  pub fn from_http_status(status: u16) -> Self {
    match status {
      400..=499 => ErrorCode::Http4xx,
      500..=599 => ErrorCode::Http5xx,
      _ => ErrorCode::Unknown,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
  #[error("{message}")]
  Adapter { code: ErrorCode, message: String },

  #[error("cannot open {requested:?} surface while {live:?} surface is still live")]
  SequencingViolation { live: SurfaceKind, requested: SurfaceKind },

  #[error("no response from update service after {}s while {step:?}", after.as_secs())]
  Timeout { step: Step, after: Duration },

  #[error("host window error: {0}")]
  Host(String),

  #[error("transition queue closed")]
  ChannelClosed,

  #[error("invalid updater settings: {0}")]
  Config(String),
}

impl UpdateError {
  pub fn adapter(code: ErrorCode, message: impl Into<String>) -> Self {
    UpdateError::Adapter {
      code,
      message: message.into(),
    }
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      UpdateError::Adapter { code, .. } => *code,
      UpdateError::SequencingViolation { .. } => ErrorCode::Sequencing,
      UpdateError::Timeout { .. } => ErrorCode::Timeout,
      UpdateError::Host(_) => ErrorCode::Host,
      UpdateError::ChannelClosed | UpdateError::Config(_) => ErrorCode::Unknown,
    }
  }

  pub fn detail(&self) -> ErrorDetail {
    ErrorDetail::new(self.code(), self.to_string())
  }
}

impl From<reqwest::Error> for UpdateError {
  fn from(e: reqwest::Error) -> Self {
    let code = if e.is_timeout() {
      ErrorCode::Timeout
    } else if let Some(status) = e.status() {
      ErrorCode::from_http_status(status.as_u16())
    } else if e.is_decode() {
      ErrorCode::Parse
    } else {
      ErrorCode::Network
    };
    UpdateError::adapter(code, e.to_string())
  }
}

pub fn init_tracing(logs_dir: &Path) -> anyhow::Result<()> {
  // Rotate daily; keep logs next to app data so they are easy to find from the UI.
  let file_appender = tracing_appender::rolling::daily(logs_dir, "updater.jsonl");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  let _ = LOG_GUARD.set(guard);

  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,reqwest=warn,hyper=warn"));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(non_blocking)
    .json()
    .with_current_span(true)
    .with_span_list(true)
    .try_init()
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

  Ok(())
}
