//! Serialized update lifecycle for a desktop shell: check, download and install, with progress
//! surfaces and prompts that never overlap on the host window.

pub mod config;
pub mod error;
pub mod events;
pub mod github;
pub mod modal;
pub mod model;
pub mod orchestrator;
pub mod runtime;
pub mod scheduler;
pub mod serializer;
pub mod service;

#[cfg(test)]
mod testing;

#[cfg(feature = "desktop")]
mod app_state;
#[cfg(feature = "desktop")]
pub mod desktop;
#[cfg(feature = "desktop")]
mod ui_bridge;

pub use config::{UpdateBackend, UpdaterSettings};
pub use error::{ErrorCode, UpdateError};
pub use events::{EventHub, NotificationBridge, ServerEvent, UiAction};
pub use modal::{ModalHost, ModalManager, SequencingPolicy};
pub use model::{ErrorDetail, ServiceEvent, SessionSnapshot, Step, SurfaceKind, VersionInfo};
pub use orchestrator::Prompter;
pub use runtime::{RuntimeOptions, UpdaterRuntime};
pub use service::{ServiceEventSink, UpdateService};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
  use app_state::AppState;
  use desktop::{DesktopService, TauriModalHost, TauriPrompter, MAIN_WINDOW};
  use std::sync::Arc;
  use tauri::Manager;

  let mut builder = tauri::Builder::default();

  builder = builder.plugin(tauri_plugin_shell::init());
  builder = builder.plugin(tauri_plugin_dialog::init());
  builder = builder.plugin(tauri_plugin_updater::Builder::new().build());

  let app = builder
    .setup(|app| -> Result<(), Box<dyn std::error::Error>> {
      // Logging + data dirs
      let paths = app_state::AppPaths::from_app(app.handle())?;
      error::init_tracing(&paths.logs_dir)?;

      tracing::info!(
        app_data_dir = %paths.app_data_dir.display(),
        version = %app.package_info().version,
        "starting shell"
      );

      let settings = UpdaterSettings::load(&paths.settings_path);
      let events = EventHub::new();
      ui_bridge::spawn_tauri_event_forwarder(app.handle().clone(), events.clone());

      let mut opts = RuntimeOptions::new(settings.clone());
      opts.events = events;
      let handle = app.handle().clone();
      let service = Arc::new(DesktopService::build(&handle, &settings)?);
      // Enter the async runtime so the worker and timers are spawned onto it.
      let updater = tauri::async_runtime::block_on(async {
        UpdaterRuntime::start(
          opts,
          service,
          Arc::new(TauriModalHost::new(handle.clone())),
          Arc::new(TauriPrompter::new(handle.clone())),
        )
      })?;

      app.manage(AppState {
        paths,
        updater: Arc::new(updater),
      });

      // Tray
      ui_bridge::init_tray(app.handle())?;

      Ok(())
    })
    .on_window_event(|window, event| {
      // Closing the main window only hides it; the tray keeps the app alive.
      if let tauri::WindowEvent::CloseRequested { api, .. } = event {
        if window.label() == MAIN_WINDOW {
          api.prevent_close();
          let _ = window.hide();
        }
      }
    })
    .invoke_handler(tauri::generate_handler![
      ui_bridge::cmd_check_for_updates,
      ui_bridge::cmd_update_action,
      ui_bridge::cmd_download_update,
      ui_bridge::cmd_install_update,
      ui_bridge::cmd_get_update_state,
      ui_bridge::cmd_get_updater_settings,
      ui_bridge::cmd_set_updater_settings,
      ui_bridge::cmd_open_logs_folder,
    ])
    .build(tauri::generate_context!())
    .expect("error while building tauri application");

  app.run(|handle, event| {
    if let tauri::RunEvent::Exit = event {
      if let Some(st) = handle.try_state::<AppState>() {
        st.updater.shutdown_now();
      }
    }
  });
}
