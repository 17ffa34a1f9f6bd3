use super::MAIN_WINDOW;
use crate::events::EVENT_UPDATE_PROGRESS;
use crate::modal::ModalHost;
use crate::model::{SurfaceId, SurfaceKind};
use anyhow::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder, WindowEvent};
use tokio::sync::oneshot;

/// Progress surfaces as child webview windows of the main window.
///
/// While a surface is up the main window is disabled; the manager re-enables it once the surface
/// has reported `Destroyed`.
pub struct TauriModalHost {
  app: AppHandle,
  windows: Arc<Mutex<HashMap<SurfaceId, WebviewWindow>>>,
}

impl TauriModalHost {
  pub fn new(app: AppHandle) -> Self {
    Self {
      app,
      windows: Arc::default(),
    }
  }

  fn main_window(&self) -> anyhow::Result<WebviewWindow> {
    self.app.get_webview_window(MAIN_WINDOW).context("main window not found")
  }
}

impl ModalHost for TauriModalHost {
  fn open_surface(&self, id: SurfaceId, kind: SurfaceKind, closed: oneshot::Sender<()>) -> anyhow::Result<()> {
    let parent = self.main_window()?;
    let label = id.window_label(kind);
    let url = WebviewUrl::App(format!("index.html#/{}", kind.label()).into());

    let window = WebviewWindowBuilder::new(&self.app, &label, url)
      .title(kind.title())
      .inner_size(420.0, 150.0)
      .resizable(false)
      .minimizable(false)
      .maximizable(false)
      .closable(false)
      .center()
      .parent(&parent)
      .context("failed to parent update surface")?
      .build()
      .with_context(|| format!("failed to create {label}"))?;

    let closed = Mutex::new(Some(closed));
    let windows = self.windows.clone();
    window.on_window_event(move |event| {
      if let WindowEvent::Destroyed = event {
        windows.lock().remove(&id);
        if let Some(tx) = closed.lock().take() {
          let _ = tx.send(());
        }
      }
    });

    if let Err(e) = parent.set_enabled(false) {
      tracing::warn!(error = %e, "failed to disable main window");
    }
    self.windows.lock().insert(id, window);
    tracing::debug!(%label, "update surface opened");
    Ok(())
  }

  fn request_close(&self, id: SurfaceId) -> anyhow::Result<()> {
    let window = self.windows.lock().get(&id).cloned().context("surface already gone")?;
    window.close().context("close request failed")?;
    Ok(())
  }

  fn destroy(&self, id: SurfaceId) {
    let window = self.windows.lock().remove(&id);
    if let Some(window) = window {
      if let Err(e) = window.destroy() {
        tracing::warn!(label = %window.label(), error = %e, "failed to destroy update surface");
      }
    }
  }

  fn set_progress(&self, id: SurfaceId, percent: f64) {
    let label = self.windows.lock().get(&id).map(|w| w.label().to_string());
    let Some(label) = label else {
      return;
    };
    let _ = self.app.emit_to(label.as_str(), EVENT_UPDATE_PROGRESS, percent);
  }

  fn set_parent_interactive(&self) -> anyhow::Result<()> {
    let parent = self.main_window()?;
    parent.set_enabled(true).context("failed to re-enable main window")?;
    parent.set_focus().context("failed to focus main window")?;
    Ok(())
  }
}
