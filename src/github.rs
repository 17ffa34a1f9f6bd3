use crate::error::{ErrorCode, UpdateError};
use crate::model::{ServiceEvent, VersionInfo};
use crate::service::{ServiceEventSink, UpdateService};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Whole-request bound for the release lookup. Downloads have none; stalls there are caught by the
/// transition watchdog.
const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
struct GhRelease {
  tag_name: String,
  #[serde(default)]
  body: Option<String>,
  #[serde(default)]
  published_at: Option<String>,
  #[serde(default)]
  prerelease: bool,
  #[serde(default)]
  draft: bool,
  assets: Vec<GhAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhAsset {
  name: String,
  browser_download_url: String,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingRelease {
  info: VersionInfo,
  installer_url: String,
}

struct DownloadedInstaller {
  version: String,
  path: PathBuf,
}

/// Update service backed by the "latest release" endpoint of a GitHub repository.
pub struct GithubReleaseService {
  client: reqwest::Client,
  feed_url: String,
  current_version: semver::Version,
  allow_prerelease: bool,
  check_timeout: Duration,
  pending: Mutex<Option<PendingRelease>>,
  downloaded: Mutex<Option<DownloadedInstaller>>,
  exit: Arc<dyn Fn() + Send + Sync>,
}

impl GithubReleaseService {
  /// `exit` is called after the installer was launched with `relaunch`, so it can replace files.
  pub fn new(
    feed_url: impl Into<String>,
    current_version: &str,
    allow_prerelease: bool,
    exit: impl Fn() + Send + Sync + 'static,
  ) -> anyhow::Result<Self> {
    let current_version = semver::Version::parse(current_version.trim_start_matches('v'))
      .map_err(|_| anyhow::anyhow!("Cannot parse current version: {current_version}"))?;
    let client = reqwest::Client::builder()
      .user_agent(concat!("shell-updater/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(CONNECT_TIMEOUT)
      .build()?;
    Ok(Self {
      client,
      feed_url: feed_url.into(),
      current_version,
      allow_prerelease,
      check_timeout: CHECK_TIMEOUT,
      pending: Mutex::new(None),
      downloaded: Mutex::new(None),
      exit: Arc::new(exit),
    })
  }

  pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
    self.check_timeout = timeout;
    self
  }
}

impl UpdateService for GithubReleaseService {
  async fn check_for_updates(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    events.emit(ServiceEvent::CheckingForUpdate);

    let resp = self
      .client
      .get(&self.feed_url)
      .timeout(self.check_timeout)
      .send()
      .await?;
    if !resp.status().is_success() {
      let status = resp.status().as_u16();
      return Err(UpdateError::adapter(
        ErrorCode::from_http_status(status),
        format!("Update check failed: HTTP {status}"),
      ));
    }
    let release: GhRelease = resp.json().await?;

    match evaluate_release(&self.current_version, &release, self.allow_prerelease, std::env::consts::OS)? {
      Some(pending) => {
        tracing::info!(version = %pending.info.version, url = %pending.installer_url, "update available");
        let info = pending.info.clone();
        *self.pending.lock() = Some(pending);
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
    let pending = self
      .pending
      .lock()
      .clone()
      .ok_or_else(|| UpdateError::adapter(ErrorCode::Download, "No pending update; check for updates first"))?;

    let path = fetch_installer(&self.client, &pending.installer_url, &events)
      .await
      .inspect_err(|e| tracing::warn!(error = %e, "update download failed"))?;
    tracing::info!(path = %path.display(), version = %pending.info.version, "update downloaded");
    *self.downloaded.lock() = Some(DownloadedInstaller {
      version: pending.info.version.clone(),
      path,
    });
    events.emit(ServiceEvent::UpdateDownloaded(pending.info));
    Ok(())
  }

  async fn install(&self, silent: bool, relaunch: bool) -> Result<(), UpdateError> {
    let (version, path) = {
      let guard = self.downloaded.lock();
      let d = guard
        .as_ref()
        .ok_or_else(|| UpdateError::adapter(ErrorCode::Install, "No downloaded update to install"))?;
      (d.version.clone(), d.path.clone())
    };
    tracing::info!(%version, path = %path.display(), silent, relaunch, "launching installer");
    spawn_installer_with_retry(&path, silent)
      .await
      .map_err(|e| UpdateError::adapter(ErrorCode::Install, e))?;
    if relaunch {
      // Exit so the installer can replace files.
      (self.exit)();
    }
    Ok(())
  }
}

fn evaluate_release(
  current: &semver::Version,
  release: &GhRelease,
  allow_prerelease: bool,
  os: &str,
) -> Result<Option<PendingRelease>, UpdateError> {
  if release.draft || (release.prerelease && !allow_prerelease) {
    return Ok(None);
  }
  let latest_version = release.tag_name.trim_start_matches('v');
  let latest = semver::Version::parse(latest_version)
    .map_err(|_| UpdateError::adapter(ErrorCode::Parse, format!("Cannot parse latest version: {latest_version}")))?;
  if latest <= *current {
    return Ok(None);
  }
  let Some(installer_url) = pick_installer_url(&release.assets, os) else {
    tracing::warn!(version = %latest, os, "newer release has no installer for this platform");
    return Ok(None);
  };
  Ok(Some(PendingRelease {
    info: VersionInfo {
      version: latest.to_string(),
      release_notes: release.body.clone().filter(|b| !b.trim().is_empty()),
      release_date: release.published_at.clone(),
    },
    installer_url,
  }))
}

fn pick_installer_url(assets: &[GhAsset], os: &str) -> Option<String> {
  // Preference order per platform; first matching suffix wins.
  let suffixes: &[&str] = match os {
    "windows" => &["setup.exe", ".msi"],
    "macos" => &[".dmg"],
    "linux" => &[".appimage", ".deb"],
    _ => &[],
  };
  suffixes.iter().find_map(|suffix| {
    assets
      .iter()
      .find(|a| a.name.to_ascii_lowercase().ends_with(suffix))
      .map(|a| a.browser_download_url.clone())
  })
}

pub(crate) fn progress_percent(written: u64, total: Option<u64>) -> Option<f64> {
  match total {
    Some(t) if t > 0 => Some(((written as f64) * 100.0 / (t as f64)).min(100.0)),
    _ => None,
  }
}

async fn fetch_installer(client: &reqwest::Client, url: &str, events: &ServiceEventSink) -> Result<PathBuf, UpdateError> {
  let resp = client.get(url).send().await?;
  if !resp.status().is_success() {
    let status = resp.status().as_u16();
    return Err(UpdateError::adapter(
      ErrorCode::from_http_status(status),
      format!("Download failed: HTTP {status}"),
    ));
  }
  let total = resp.content_length();

  let filename = url.split('/').last().filter(|s| !s.is_empty()).unwrap_or("update-installer.exe");
  let ext = Path::new(filename).extension().and_then(|s| s.to_str()).unwrap_or("exe");
  // Always use a unique temp filename to avoid collisions/locks with a previous attempt.
  let path = std::env::temp_dir().join(format!("update-{}.{}", Uuid::new_v4(), ext));

  let io_err = |e: std::io::Error| UpdateError::adapter(ErrorCode::Download, e.to_string());
  let mut file = tokio::fs::OpenOptions::new()
    .create_new(true)
    .write(true)
    .open(&path)
    .await
    .map_err(io_err)?;

  let mut written: u64 = 0;
  let mut last_whole: i64 = -1;
  let mut stream = resp.bytes_stream();
  while let Some(chunk) = stream.next().await {
    let chunk = chunk?;
    tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await.map_err(io_err)?;
    written += chunk.len() as u64;
    if let Some(p) = progress_percent(written, total) {
      // One event per whole percent is plenty for a progress bar.
      if p.floor() as i64 > last_whole {
        last_whole = p.floor() as i64;
        events.emit(ServiceEvent::DownloadProgress(p));
      }
    }
  }
  tokio::io::AsyncWriteExt::flush(&mut file).await.map_err(io_err)?;
  file.sync_all().await.map_err(io_err)?;
  drop(file); // critical on Windows: ensure the file handle is closed before launching

  Ok(path)
}

/// `silent` maps to the unattended switch of the Windows installers; disk images and packages are
/// handed to the desktop and always show UI.
fn installer_command(installer_path: &Path, silent: bool) -> std::process::Command {
  let ext = installer_path
    .extension()
    .and_then(|s| s.to_str())
    .unwrap_or("")
    .to_ascii_lowercase();
  match ext.as_str() {
    "msi" => {
      let mut cmd = std::process::Command::new("msiexec");
      cmd.args(["/i", installer_path.to_string_lossy().as_ref()]);
      if silent {
        cmd.arg("/quiet");
      }
      cmd
    }
    "exe" => {
      let mut cmd = std::process::Command::new(installer_path);
      if silent {
        cmd.arg("/S");
      }
      cmd
    }
    "dmg" => {
      let mut cmd = std::process::Command::new("open");
      cmd.arg(installer_path);
      cmd
    }
    _ => {
      let mut cmd = std::process::Command::new("xdg-open");
      cmd.arg(installer_path);
      cmd
    }
  }
}

async fn spawn_installer_with_retry(installer_path: &Path, silent: bool) -> Result<(), String> {
  // Windows can transiently lock freshly-written executables/MSIs (e.g. AV scanning),
  // returning ERROR_SHARING_VIOLATION (os error 32). Retry a few times.
  for attempt in 0..10u64 {
    let spawn_res = installer_command(installer_path, silent).spawn().map(|_| ());

    match spawn_res {
      Ok(()) => return Ok(()),
      Err(e) => {
        let sharing_violation = e.raw_os_error() == Some(32);
        if sharing_violation && attempt < 9 {
          tokio::time::sleep(std::time::Duration::from_millis(200 + attempt * 150)).await;
          continue;
        }
        return Err(e.to_string());
      }
    }
  }

  Err("failed to launch installer".to_string())
}
