use crate::config::SETTINGS_FILE_NAME;
use crate::runtime::UpdaterRuntime;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::AppHandle;
use tauri::Manager;

#[derive(Clone)]
pub struct AppPaths {
  pub app_data_dir: PathBuf,
  pub logs_dir: PathBuf,
  pub settings_path: PathBuf,
}

impl AppPaths {
  pub fn from_app(app: &AppHandle) -> anyhow::Result<Self> {
    let app_data_dir = app
      .path()
      .app_data_dir()
      .context("failed to resolve app_data_dir")?;
    std::fs::create_dir_all(&app_data_dir).context("failed to create app_data_dir")?;

    let logs_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&logs_dir).context("failed to create logs dir")?;

    let settings_path = app_data_dir.join(SETTINGS_FILE_NAME);

    Ok(Self {
      app_data_dir,
      logs_dir,
      settings_path,
    })
  }
}

#[derive(Clone)]
pub struct AppState {
  pub paths: AppPaths,
  pub updater: Arc<UpdaterRuntime>,
}
