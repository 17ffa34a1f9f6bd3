use super::MAIN_WINDOW;
use crate::model::{ErrorDetail, VersionInfo};
use crate::orchestrator::Prompter;
use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tokio::sync::oneshot;

/// Native message boxes, parented to the main window when it exists.
pub struct TauriPrompter {
  app: AppHandle,
  product: String,
}

impl TauriPrompter {
  pub fn new(app: AppHandle) -> Self {
    let product = app.package_info().name.clone();
    Self { app, product }
  }

  async fn ask(&self, title: &str, message: String, kind: MessageDialogKind, buttons: MessageDialogButtons) -> bool {
    let (tx, rx) = oneshot::channel();
    {
      let mut dialog = self.app.dialog().message(message).title(title).kind(kind).buttons(buttons);
      if let Some(main) = self.app.get_webview_window(MAIN_WINDOW) {
        dialog = dialog.parent(&main);
      }
      dialog.show(move |answer| {
        let _ = tx.send(answer);
      });
    }
    // Dropped sender means the dialog went away without an answer.
    rx.await.unwrap_or(false)
  }
}

impl Prompter for TauriPrompter {
  async fn confirm_download(&self, info: &VersionInfo) -> bool {
    let mut message = format!("{} {} is available. Download it now?", self.product, info.version);
    if let Some(notes) = info.release_notes.as_deref().filter(|n| !n.trim().is_empty()) {
      message.push_str("\n\n");
      message.push_str(notes.trim());
    }
    self
      .ask(
        "Update Available",
        message,
        MessageDialogKind::Info,
        MessageDialogButtons::OkCancelCustom("Download".into(), "Not Now".into()),
      )
      .await
  }

  async fn confirm_restart(&self, info: &VersionInfo) -> bool {
    self
      .ask(
        "Update Ready",
        format!("{} {} has been downloaded. Restart to install it?", self.product, info.version),
        MessageDialogKind::Info,
        MessageDialogButtons::OkCancelCustom("Restart Now".into(), "Later".into()),
      )
      .await
  }

  async fn show_up_to_date(&self) {
    let version = self.app.package_info().version.to_string();
    self
      .ask(
        "No Updates",
        format!("You're running the latest version ({version})."),
        MessageDialogKind::Info,
        MessageDialogButtons::Ok,
      )
      .await;
  }

  async fn show_error(&self, detail: &ErrorDetail) {
    self
      .ask(
        "Update Failed",
        format!("Could not update {}:\n{}", self.product, detail.message),
        MessageDialogKind::Error,
        MessageDialogButtons::Ok,
      )
      .await;
  }
}
