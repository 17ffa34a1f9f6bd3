use crate::error::{ErrorCode, UpdateError};
use crate::github::progress_percent;
use crate::model::{ServiceEvent, VersionInfo};
use crate::service::{ServiceEventSink, UpdateService};
use parking_lot::Mutex;
use tauri::AppHandle;
use tauri_plugin_updater::{Update, UpdaterExt};

struct Downloaded {
  update: Update,
  bytes: Vec<u8>,
}

/// Adapter over `tauri-plugin-updater`; endpoints and signing key come from the app config.
pub struct TauriUpdaterService {
  app: AppHandle,
  pending: Mutex<Option<Update>>,
  downloaded: Mutex<Option<Downloaded>>,
}

impl TauriUpdaterService {
  pub fn new(app: AppHandle) -> Self {
    Self {
      app,
      pending: Mutex::new(None),
      downloaded: Mutex::new(None),
    }
  }
}

fn plugin_error(code: ErrorCode, e: tauri_plugin_updater::Error) -> UpdateError {
  let code = match e {
    tauri_plugin_updater::Error::Reqwest(_) => ErrorCode::Network,
    _ => code,
  };
  UpdateError::adapter(code, e.to_string())
}

fn version_info(update: &Update) -> VersionInfo {
  VersionInfo {
    version: update.version.clone(),
    release_notes: update.body.clone(),
    release_date: update.date.map(|d| d.to_string()),
  }
}

impl UpdateService for TauriUpdaterService {
  async fn check_for_updates(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    events.emit(ServiceEvent::CheckingForUpdate);
    let updater = self.app.updater().map_err(|e| plugin_error(ErrorCode::Unknown, e))?;
    match updater.check().await.map_err(|e| plugin_error(ErrorCode::Parse, e))? {
      Some(update) => {
        let info = version_info(&update);
        tracing::info!(version = %info.version, current = %update.current_version, "update available");
        *self.pending.lock() = Some(update);
        events.emit(ServiceEvent::UpdateAvailable(info));
      }
      None => {
        *self.pending.lock() = None;
        events.emit(ServiceEvent::UpdateNotAvailable);
      }
    }
    Ok(())
  }

  async fn download(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    let update = self
      .pending
      .lock()
      .clone()
      .ok_or_else(|| UpdateError::adapter(ErrorCode::Download, "No pending update; check for updates first"))?;

    let mut written: u64 = 0;
    let mut last_whole: i64 = -1;
    let bytes = update
      .download(
        |chunk, total| {
          written += chunk as u64;
          if let Some(p) = progress_percent(written, total) {
            if p.floor() as i64 > last_whole {
              last_whole = p.floor() as i64;
              events.emit(ServiceEvent::DownloadProgress(p));
            }
          }
        },
        || {},
      )
      .await
      .map_err(|e| {
        tracing::warn!(error = %e, "update download failed");
        plugin_error(ErrorCode::Download, e)
      })?;

    let info = version_info(&update);
    tracing::info!(version = %info.version, bytes = bytes.len(), "update downloaded");
    *self.downloaded.lock() = Some(Downloaded { update, bytes });
    events.emit(ServiceEvent::UpdateDownloaded(info));
    Ok(())
  }

  async fn install(&self, silent: bool, relaunch: bool) -> Result<(), UpdateError> {
    let Downloaded { update, bytes } = self
      .downloaded
      .lock()
      .take()
      .ok_or_else(|| UpdateError::adapter(ErrorCode::Install, "No downloaded update to install"))?;

    tracing::info!(version = %update.version, silent, relaunch, "installing update");
    // Runs the platform installer synchronously.
    tokio::task::spawn_blocking(move || update.install(bytes))
      .await
      .map_err(|e| UpdateError::adapter(ErrorCode::Install, e.to_string()))?
      .map_err(|e| plugin_error(ErrorCode::Install, e))?;
    if relaunch {
      self.app.restart();
    }
    Ok(())
  }
}
