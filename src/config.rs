use crate::error::UpdateError;
use anyhow::Context;
use std::path::Path;
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "updater_settings.json";

const DEFAULT_CHECK_INTERVAL_MS: u64 = 6 * 60 * 60 * 1000;
const DEFAULT_INITIAL_DELAY_MS: u64 = 10_000;
const DEFAULT_TRANSITION_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Which adapter the desktop host builds.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateBackend {
  /// Latest GitHub release at `feed_url`, platform installer launched directly.
  GithubRelease,
  /// `tauri-plugin-updater` with the endpoints from the app config.
  #[default]
  Plugin,
}

impl std::str::FromStr for UpdateBackend {
  type Err = UpdateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "github-release" | "github" => Ok(UpdateBackend::GithubRelease),
      "plugin" => Ok(UpdateBackend::Plugin),
      other => Err(UpdateError::Config(format!("unknown update backend: {other}"))),
    }
  }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdaterSettings {
  pub disable_auto_updates: bool,
  pub check_interval_ms: u64,
  pub initial_delay_ms: u64,
  /// How long Checking/Downloading may go without any service event.
  pub transition_timeout_ms: u64,
  /// GitHub "latest release" API URL. Only read by the github-release backend, which requires it.
  pub feed_url: Option<String>,
  pub allow_prerelease: bool,
  pub backend: UpdateBackend,
}

impl Default for UpdaterSettings {
  fn default() -> Self {
    Self {
      disable_auto_updates: false,
      check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
      initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
      transition_timeout_ms: DEFAULT_TRANSITION_TIMEOUT_MS,
      feed_url: None,
      allow_prerelease: false,
      backend: UpdateBackend::default(),
    }
  }
}

impl UpdaterSettings {
  pub fn check_interval(&self) -> Duration {
    Duration::from_millis(self.check_interval_ms)
  }

  pub fn initial_delay(&self) -> Duration {
    Duration::from_millis(self.initial_delay_ms)
  }

  pub fn transition_timeout(&self) -> Duration {
    Duration::from_millis(self.transition_timeout_ms)
  }

  /// Settings file (if any) with environment overrides applied on top.
  pub fn load(path: &Path) -> Self {
    let mut settings = Self::load_file(path);
    settings.apply_env(|key| std::env::var(key).ok());
    settings
  }

  fn load_file(path: &Path) -> Self {
    if !path.exists() {
      tracing::info!(path = %path.display(), "no updater settings file, using defaults");
      return Self::default();
    }
    let parsed = std::fs::read_to_string(path)
      .context("failed to read updater settings")
      .and_then(|raw| serde_json::from_str::<Self>(&raw).context("failed to parse updater settings"));
    match parsed {
      Ok(s) => s,
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "bad updater settings, using defaults");
        Self::default()
      }
    }
  }

  pub fn save(&self, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).context("failed to create settings dir")?;
    }
    let json = serde_json::to_string_pretty(self)?;
    std::fs::write(path, json).context("failed to write updater settings")?;
    Ok(())
  }

  pub(crate) fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("UPDATER_DISABLE_AUTO_UPDATES") {
      self.disable_auto_updates = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
    let ms = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(v) = ms("UPDATER_CHECK_INTERVAL_MS") {
      self.check_interval_ms = v;
    }
    if let Some(v) = ms("UPDATER_INITIAL_DELAY_MS") {
      self.initial_delay_ms = v;
    }
    if let Some(v) = ms("UPDATER_TIMEOUT_MS") {
      self.transition_timeout_ms = v;
    }
    if let Some(v) = get("UPDATER_FEED_URL").filter(|v| !v.trim().is_empty()) {
      self.feed_url = Some(v.trim().to_string());
    }
    if let Some(v) = get("UPDATER_BACKEND") {
      match v.parse() {
        Ok(b) => self.backend = b,
        Err(e) => tracing::warn!(error = %e, "ignoring UPDATER_BACKEND"),
      }
    }
  }

  pub fn validate(&self) -> Result<(), UpdateError> {
    if self.check_interval_ms == 0 {
      return Err(UpdateError::Config("checkIntervalMs must be greater than zero".into()));
    }
    if self.transition_timeout_ms == 0 {
      return Err(UpdateError::Config("transitionTimeoutMs must be greater than zero".into()));
    }
    match (&self.feed_url, self.backend) {
      (Some(feed), _) => {
        url::Url::parse(feed).map_err(|e| UpdateError::Config(format!("feedUrl: {e}")))?;
      }
      (None, UpdateBackend::GithubRelease) => {
        return Err(UpdateError::Config("the github-release backend needs feedUrl".into()));
      }
      (None, UpdateBackend::Plugin) => {}
    }
    Ok(())
  }
}
