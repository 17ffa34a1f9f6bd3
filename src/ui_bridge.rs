use crate::{
  app_state::AppState,
  config::UpdaterSettings,
  events::{EventHub, ServerEvent, UiAction, EVENT_UPDATE_STATE},
  model::SessionSnapshot,
};
use tauri::{AppHandle, Emitter, Manager};
use tauri_plugin_shell::ShellExt;
use tokio::sync::broadcast::error::RecvError;

#[tauri::command]
pub fn cmd_check_for_updates(state: tauri::State<AppState>) -> Result<(), String> {
  state.updater.trigger_manual_check().map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_update_action(state: tauri::State<AppState>, action: UiAction) -> Result<(), String> {
  state.updater.dispatch_ui_action(action).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_download_update(state: tauri::State<AppState>) -> Result<(), String> {
  state
    .updater
    .dispatch_ui_action(UiAction::DownloadRequested)
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_install_update(state: tauri::State<AppState>) -> Result<(), String> {
  state
    .updater
    .dispatch_ui_action(UiAction::InstallRequested)
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_get_update_state(state: tauri::State<AppState>) -> Result<SessionSnapshot, String> {
  Ok(state.updater.snapshot())
}

#[tauri::command]
pub fn cmd_get_updater_settings(state: tauri::State<AppState>) -> Result<UpdaterSettings, String> {
  Ok(UpdaterSettings::load(&state.paths.settings_path))
}

/// Persisted only; the runtime reads settings once at startup.
#[tauri::command]
pub fn cmd_set_updater_settings(state: tauri::State<AppState>, s: UpdaterSettings) -> Result<(), String> {
  s.validate().map_err(|e| e.to_string())?;
  s.save(&state.paths.settings_path).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_open_logs_folder(state: tauri::State<AppState>, app: AppHandle) -> Result<(), String> {
  let p = state.paths.logs_dir.clone();
  app
    .shell()
    .open(p.to_string_lossy().to_string(), None)
    .map_err(|e| e.to_string())
}

/// Mirror committed transitions to the renderer.
pub fn spawn_tauri_event_forwarder(app: AppHandle, events: EventHub) {
  tauri::async_runtime::spawn(async move {
    let mut rx = events.subscribe();
    loop {
      match rx.recv().await {
        Ok(ServerEvent::SessionChanged(snapshot)) => {
          let _ = app.emit(EVENT_UPDATE_STATE, snapshot);
        }
        Err(RecvError::Lagged(n)) => {
          tracing::debug!(skipped = n, "renderer forwarder lagged");
        }
        Err(RecvError::Closed) => break,
      }
    }
  });
}

pub fn toggle_main_window(app: &AppHandle) -> anyhow::Result<()> {
  if let Some(w) = app.get_webview_window(crate::desktop::MAIN_WINDOW) {
    if w.is_visible().unwrap_or(true) {
      w.hide()?;
    } else {
      w.show()?;
      w.set_focus()?;
    }
  }
  Ok(())
}

pub fn init_tray(app: &AppHandle) -> anyhow::Result<()> {
  use tauri::menu::{Menu, MenuItem, PredefinedMenuItem};
  use tauri::tray::TrayIconBuilder;

  let show = MenuItem::with_id(app, "show_hide", "Show/Hide", true, None::<&str>)?;
  let check = MenuItem::with_id(app, "check_updates", "Check for Updates", true, None::<&str>)?;
  let separator = PredefinedMenuItem::separator(app)?;
  let quit = MenuItem::with_id(app, "quit", "Quit", true, None::<&str>)?;

  let menu = Menu::with_items(app, &[&show, &check, &separator, &quit])?;

  let mut builder = TrayIconBuilder::new()
    .menu(&menu)
    .on_menu_event(move |app, event| match event.id().as_ref() {
      "show_hide" => {
        let _ = toggle_main_window(app);
      }
      "check_updates" => {
        if let Some(st) = app.try_state::<AppState>() {
          if let Err(e) = st.updater.trigger_manual_check() {
            tracing::warn!(error = %e, "tray update check ignored");
          }
        }
      }
      "quit" => {
        app.exit(0);
      }
      _ => {}
    });

  if let Some(icon) = app.default_window_icon().cloned() {
    builder = builder.icon(icon);
  }

  builder.build(app)?;

  Ok(())
}
