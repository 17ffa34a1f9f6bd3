//! Tauri host for the updater core: progress windows, native prompts and the adapters.

mod host;
mod prompts;
mod updater;

pub use host::TauriModalHost;
pub use prompts::TauriPrompter;
pub use updater::TauriUpdaterService;

use crate::config::{UpdateBackend, UpdaterSettings};
use crate::error::UpdateError;
use crate::github::GithubReleaseService;
use crate::service::{ServiceEventSink, UpdateService};
use anyhow::Context;
use tauri::AppHandle;

pub const MAIN_WINDOW: &str = "main";

/// The adapter picked by `UpdaterSettings::backend`.
pub enum DesktopService {
  Github(GithubReleaseService),
  Plugin(TauriUpdaterService),
}

impl DesktopService {
  pub fn build(app: &AppHandle, settings: &UpdaterSettings) -> anyhow::Result<Self> {
    match settings.backend {
      UpdateBackend::GithubRelease => {
        let feed = settings
          .feed_url
          .as_deref()
          .context("the github-release backend needs feed_url")?;
        let exit_handle = app.clone();
        let current = app.package_info().version.to_string();
        let svc = GithubReleaseService::new(feed, &current, settings.allow_prerelease, move || exit_handle.exit(0))?;
        Ok(DesktopService::Github(svc))
      }
      UpdateBackend::Plugin => Ok(DesktopService::Plugin(TauriUpdaterService::new(app.clone()))),
    }
  }
}

impl UpdateService for DesktopService {
  async fn check_for_updates(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    match self {
      DesktopService::Github(s) => s.check_for_updates(events).await,
      DesktopService::Plugin(s) => s.check_for_updates(events).await,
    }
  }

  async fn download(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    match self {
      DesktopService::Github(s) => s.download(events).await,
      DesktopService::Plugin(s) => s.download(events).await,
    }
  }

  async fn install(&self, silent: bool, relaunch: bool) -> Result<(), UpdateError> {
    match self {
      DesktopService::Github(s) => s.install(silent, relaunch).await,
      DesktopService::Plugin(s) => s.install(silent, relaunch).await,
    }
  }
}
