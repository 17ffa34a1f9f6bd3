//! Exclusive progress surfaces parented to the main window.
//!
//! At most one surface is live at a time. Closing is a two-phase affair: the manager asks the
//! host to close, then waits for the host's terminal "closed" signal before it reports the
//! surface gone. Only after that does it re-assert that the parent window accepts input.

use crate::error::UpdateError;
use crate::model::{SurfaceId, SurfaceKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Grace period for the host to confirm a requested close before the surface is destroyed.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Host windowing system.
///
/// `open_surface` receives the sender half of the close signal; the host must fire it only from
/// its terminal close event (window destroyed), never when a close was merely requested.
pub trait ModalHost: Send + Sync + 'static {
  fn open_surface(&self, id: SurfaceId, kind: SurfaceKind, closed: oneshot::Sender<()>) -> anyhow::Result<()>;
  fn request_close(&self, id: SurfaceId) -> anyhow::Result<()>;
  /// Tear the surface down without waiting for its graceful close.
  fn destroy(&self, id: SurfaceId);
  fn set_progress(&self, id: SurfaceId, percent: f64);
  /// Explicitly mark the parent window as interactive again.
  fn set_parent_interactive(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencingPolicy {
  /// Opening a second surface is a bug; fail loudly.
  Panic,
  /// Log, destroy the stale surface, carry on.
  Recover,
}

impl Default for SequencingPolicy {
  fn default() -> Self {
    if cfg!(debug_assertions) {
      SequencingPolicy::Panic
    } else {
      SequencingPolicy::Recover
    }
  }
}

/// Owned handle to the live surface. Not `Clone`: whoever holds it is responsible for closing it.
#[derive(Debug)]
pub struct ModalHandle {
  id: SurfaceId,
  kind: SurfaceKind,
  closed: oneshot::Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveSurface {
  pub id: SurfaceId,
  pub kind: SurfaceKind,
}

/// Shared record of the live surface, so process shutdown can tear it down from outside the worker.
#[derive(Clone)]
pub struct ModalRegistry {
  live: Arc<Mutex<Option<LiveSurface>>>,
  host: Arc<dyn ModalHost>,
}

impl ModalRegistry {
  fn new(host: Arc<dyn ModalHost>) -> Self {
    Self {
      live: Arc::new(Mutex::new(None)),
      host,
    }
  }

  pub fn live(&self) -> Option<LiveSurface> {
    *self.live.lock()
  }

  fn set(&self, surface: LiveSurface) {
    *self.live.lock() = Some(surface);
  }

  fn clear(&self, id: SurfaceId) {
    let mut live = self.live.lock();
    if live.map(|s| s.id) == Some(id) {
      *live = None;
    }
  }

  /// Abnormal shutdown path: destroy whatever is live without waiting.
  pub fn force_close_live(&self) {
    let Some(surface) = self.live.lock().take() else {
      return;
    };
    tracing::info!(surface = %surface.id, kind = ?surface.kind, "force-closing surface on shutdown");
    self.host.destroy(surface.id);
    if let Err(e) = self.host.set_parent_interactive() {
      tracing::warn!(error = %format!("{e:#}"), "failed to re-enable parent window");
    }
  }
}

pub struct ModalManager<H: ModalHost> {
  host: Arc<H>,
  registry: ModalRegistry,
  policy: SequencingPolicy,
  close_grace: Duration,
}

impl<H: ModalHost> ModalManager<H> {
  pub fn new(host: Arc<H>) -> Self {
    let registry = ModalRegistry::new(host.clone());
    Self {
      host,
      registry,
      policy: SequencingPolicy::default(),
      close_grace: DEFAULT_CLOSE_GRACE,
    }
  }

  pub fn with_policy(mut self, policy: SequencingPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_close_grace(mut self, grace: Duration) -> Self {
    self.close_grace = grace;
    self
  }

  pub fn registry(&self) -> ModalRegistry {
    self.registry.clone()
  }

  pub fn create(&self, kind: SurfaceKind) -> Result<ModalHandle, UpdateError> {
    if let Some(stale) = self.registry.live() {
      let violation = UpdateError::SequencingViolation {
        live: stale.kind,
        requested: kind,
      };
      match self.policy {
        SequencingPolicy::Panic => panic!("{violation}"),
        SequencingPolicy::Recover => {
          tracing::error!(stale = %stale.id, error = %violation, "sequencing violation, destroying stale surface");
          self.host.destroy(stale.id);
          self.registry.clear(stale.id);
        }
      }
    }

    let id = SurfaceId::new();
    let (tx, rx) = oneshot::channel();
    self.registry.set(LiveSurface { id, kind });
    if let Err(e) = self.host.open_surface(id, kind, tx) {
      self.registry.clear(id);
      return Err(UpdateError::Host(format!("failed to open {kind:?} surface: {e:#}")));
    }
    tracing::debug!(surface = %id, ?kind, "surface opened");
    Ok(ModalHandle { id, kind, closed: rx })
  }

  pub fn set_progress(&self, handle: &ModalHandle, percent: f64) {
    self.host.set_progress(handle.id, percent);
  }

  /// Request close and wait for the host to confirm teardown.
  ///
  /// If the host does not confirm within the grace period the surface is destroyed. Either way
  /// the parent window is re-asserted as interactive before this returns.
  pub async fn await_close(&self, handle: ModalHandle) {
    let ModalHandle { id, kind, closed } = handle;
    match self.host.request_close(id) {
      Ok(()) => match tokio::time::timeout(self.close_grace, closed).await {
        Ok(Ok(())) => tracing::debug!(surface = %id, ?kind, "surface closed"),
        Ok(Err(_)) => tracing::warn!(surface = %id, ?kind, "host dropped close signal"),
        Err(_) => {
          tracing::warn!(surface = %id, ?kind, grace_ms = self.close_grace.as_millis() as u64, "close not confirmed, destroying");
          self.host.destroy(id);
        }
      },
      Err(e) => {
        tracing::warn!(surface = %id, ?kind, error = %format!("{e:#}"), "close request failed, destroying");
        self.host.destroy(id);
      }
    }
    self.registry.clear(id);
    self.reassert_parent();
  }

  /// Destroy immediately; used when the process is going away.
  pub fn force_close(&self, handle: ModalHandle) {
    self.host.destroy(handle.id);
    self.registry.clear(handle.id);
    self.reassert_parent();
  }

  fn reassert_parent(&self) {
    if let Err(e) = self.host.set_parent_interactive() {
      tracing::warn!(error = %format!("{e:#}"), "failed to re-enable parent window");
    }
  }
}
