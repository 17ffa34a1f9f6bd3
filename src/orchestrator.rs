//! The update-lifecycle state machine.
//!
//! Owned by the serializer's worker and never touched from anywhere else. Every transition that
//! owns a progress surface awaits its teardown before anything else can take the parent window
//! (a prompt, another surface). Prompt answers are fed back through the queue as [`UserAction`]s
//! so each transition stays one step.

use crate::error::{ErrorCode, UpdateError};
use crate::events::NotificationBridge;
use crate::modal::{ModalHandle, ModalHost, ModalManager};
use crate::model::{
  now_rfc3339, ErrorDetail, OperationId, ServiceEvent, SessionSnapshot, Step, SurfaceKind, Trigger, UserAction,
  VersionInfo,
};
use crate::serializer::{SerializerHandle, TransitionMachine};
use crate::service::UpdateService;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Upper bound on `install`; it runs inline on the worker, unlike checks and downloads.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

/// User-facing prompts. Each resolves when the user has answered or dismissed it.
pub trait Prompter: Send + Sync + 'static {
  fn confirm_download(&self, info: &VersionInfo) -> impl Future<Output = bool> + Send;
  fn confirm_restart(&self, info: &VersionInfo) -> impl Future<Output = bool> + Send;
  fn show_up_to_date(&self) -> impl Future<Output = ()> + Send;
  fn show_error(&self, detail: &ErrorDetail) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Default)]
pub struct UpdateSession {
  step: Step,
  triggered_manually: bool,
  version_info: Option<VersionInfo>,
  progress: Option<f64>,
  last_error: Option<ErrorDetail>,
  active_modal: Option<ModalHandle>,
  installing: bool,
}

impl UpdateSession {
  pub fn step(&self) -> Step {
    self.step
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    SessionSnapshot {
      step: self.step,
      version_info: self.version_info.clone(),
      progress: self.progress,
      last_error: self.last_error.clone(),
      triggered_manually: self.triggered_manually,
      updated_at: now_rfc3339(),
    }
  }

  fn reset(&mut self) {
    self.step = Step::Idle;
    self.triggered_manually = false;
    self.version_info = None;
    self.progress = None;
    self.last_error = None;
  }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
  Check,
  Download,
}

pub struct Orchestrator<S: UpdateService, H: ModalHost, P: Prompter> {
  session: UpdateSession,
  /// Events tagged with any other operation are late reports from an abandoned call.
  op: OperationId,
  in_flight: Option<JoinHandle<()>>,
  service: Arc<S>,
  modals: ModalManager<H>,
  prompter: Arc<P>,
  bridge: NotificationBridge,
  queue: SerializerHandle,
}

impl<S: UpdateService, H: ModalHost, P: Prompter> Orchestrator<S, H, P> {
  pub fn new(
    service: Arc<S>,
    modals: ModalManager<H>,
    prompter: Arc<P>,
    bridge: NotificationBridge,
    queue: SerializerHandle,
  ) -> Self {
    Self {
      session: UpdateSession::default(),
      op: OperationId::default(),
      in_flight: None,
      service,
      modals,
      prompter,
      bridge,
      queue,
    }
  }

  /// Publish the session and log the step change.
  fn commit(&mut self, from: Step) {
    let to = self.session.step;
    if from != to {
      tracing::info!(?from, ?to, manual = self.session.triggered_manually, "update step");
    }
    debug_assert!(
      self.session.active_modal.is_none() || to.uses_progress_surface(),
      "surface left open in {to:?}"
    );
    self.bridge.on_transition(self.session.snapshot());
  }

  async fn close_active_modal(&mut self) {
    if let Some(handle) = self.session.active_modal.take() {
      self.modals.await_close(handle).await;
    }
  }

  fn abandon_in_flight(&mut self) {
    if let Some(task) = self.in_flight.take() {
      task.abort();
    }
  }

  /// Start a check or download on its own task under a fresh operation id. A failed or panicking
  /// call is reported as that operation's `Error` event.
  fn start_operation(&mut self, operation: Operation) {
    self.abandon_in_flight();
    self.op = self.op.next();
    let op = self.op;
    let events = self.queue.service_sink(op);
    let report = events.clone();
    let service = self.service.clone();
    tracing::debug!(%op, ?operation, "starting service call");

    let call = async move {
      match operation {
        Operation::Check => service.check_for_updates(events).await,
        Operation::Download => service.download(events).await,
      }
    };
    self.in_flight = Some(tokio::spawn(async move {
      let err = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(_) => UpdateError::adapter(ErrorCode::Unknown, format!("{operation:?} call panicked")),
      };
      tracing::debug!(%op, error = %err, "service call failed");
      report.emit(ServiceEvent::Error(err.detail()));
    }));
  }

  fn open_surface(&mut self, kind: SurfaceKind) -> Result<(), UpdateError> {
    let handle = self.modals.create(kind)?;
    self.session.active_modal = Some(handle);
    Ok(())
  }

  async fn on_check_requested(&mut self, manual: bool) -> Result<(), UpdateError> {
    match self.session.step {
      Step::Idle => {}
      Step::NotAvailable | Step::Error => {
        // Terminal step still waiting for its reset; a fresh request supersedes it.
        tracing::debug!(step = ?self.session.step, "check requested before reset, starting over");
        self.session.reset();
      }
      step => {
        if manual && !self.session.triggered_manually {
          tracing::debug!(?step, "promoting in-flight automatic check to manual");
          self.session.triggered_manually = true;
          self.commit(step);
        } else {
          tracing::debug!(?step, manual, "check already in flight, dropping request");
        }
        return Ok(());
      }
    }

    let from = self.session.step;
    self.session.triggered_manually = manual;
    self.session.step = Step::Checking;
    self.open_surface(SurfaceKind::Checking)?;
    self.start_operation(Operation::Check);
    self.commit(from);
    Ok(())
  }

  async fn on_service_event(&mut self, event: ServiceEvent) -> Result<(), UpdateError> {
    let step = self.session.step;
    match (step, event) {
      (Step::Checking, ServiceEvent::CheckingForUpdate) => {
        tracing::debug!("service is checking");
        Ok(())
      }
      (Step::Checking, ServiceEvent::UpdateAvailable(info)) => {
        self.close_active_modal().await;
        self.session.step = Step::Available;
        self.session.version_info = Some(info.clone());
        self.commit(step);
        let download = self.prompter.confirm_download(&info).await;
        self.queue.enqueue(Trigger::User(if download {
          UserAction::Download
        } else {
          UserAction::Decline
        }));
        Ok(())
      }
      (Step::Checking, ServiceEvent::UpdateNotAvailable) => {
        self.close_active_modal().await;
        self.session.step = Step::NotAvailable;
        self.commit(step);
        if self.session.triggered_manually {
          self.prompter.show_up_to_date().await;
        } else {
          tracing::info!("no update available");
        }
        self.queue.enqueue(Trigger::Reset);
        Ok(())
      }
      (Step::Checking | Step::Downloading, ServiceEvent::Error(detail)) => {
        Err(UpdateError::Adapter {
          code: detail.code,
          message: detail.message,
        })
      }
      (Step::Downloading, ServiceEvent::DownloadProgress(percent)) => {
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        self.session.progress = Some(percent);
        if let Some(handle) = self.session.active_modal.as_ref() {
          self.modals.set_progress(handle, percent);
        }
        self.commit(step);
        Ok(())
      }
      (Step::Downloading, ServiceEvent::UpdateDownloaded(info)) => {
        self.close_active_modal().await;
        self.session.step = Step::Downloaded;
        self.session.progress = None;
        self.session.version_info = Some(info.clone());
        self.commit(step);
        let restart = self.prompter.confirm_restart(&info).await;
        self.queue.enqueue(Trigger::User(if restart {
          UserAction::RestartNow
        } else {
          UserAction::Later
        }));
        Ok(())
      }
      (step, event) => {
        tracing::debug!(?step, event = event.name(), "ignoring service event for inactive step");
        Ok(())
      }
    }
  }

  async fn on_user_action(&mut self, action: UserAction) -> Result<(), UpdateError> {
    let step = self.session.step;
    match (step, action) {
      (Step::Available, UserAction::Download) => {
        self.session.step = Step::Downloading;
        self.session.progress = Some(0.0);
        self.open_surface(SurfaceKind::Downloading)?;
        self.start_operation(Operation::Download);
        self.commit(step);
        Ok(())
      }
      (Step::Available | Step::Downloaded, UserAction::Decline | UserAction::Later) => {
        self.session.reset();
        self.commit(step);
        Ok(())
      }
      (Step::Downloaded, UserAction::RestartNow) => {
        tracing::info!(version = ?self.session.version_info.as_ref().map(|v| v.version.as_str()), "installing update");
        tokio::time::timeout(INSTALL_TIMEOUT, self.service.install(false, true))
          .await
          .map_err(|_| UpdateError::Timeout {
            step,
            after: INSTALL_TIMEOUT,
          })??;
        self.session.installing = true;
        Ok(())
      }
      (step, action) => {
        tracing::debug!(?step, ?action, "ignoring user action for inactive step");
        Ok(())
      }
    }
  }

  fn on_reset(&mut self) {
    let step = self.session.step;
    if step.is_terminal() {
      self.session.reset();
      self.commit(step);
    }
  }

  async fn fail_session(&mut self, err: UpdateError) {
    let from = self.session.step;
    let manual = self.session.triggered_manually;
    // Automatic checks fail quietly; anything the user took part in is reported.
    let visible = manual || matches!(from, Step::Available | Step::Downloading | Step::Downloaded);
    if visible {
      tracing::error!(step = ?from, code = ?err.code(), error = %err, "update failed");
    } else {
      tracing::warn!(step = ?from, code = ?err.code(), error = %err, "automatic update check failed");
    }

    self.abandon_in_flight();
    self.close_active_modal().await;
    let detail = err.detail();
    self.session.step = Step::Error;
    self.session.progress = None;
    self.session.last_error = Some(detail.clone());
    self.commit(from);

    if visible {
      self.prompter.show_error(&detail).await;
    }
    self.queue.enqueue(Trigger::Reset);
  }
}

impl<S: UpdateService, H: ModalHost, P: Prompter> TransitionMachine for Orchestrator<S, H, P> {
  async fn apply(&mut self, trigger: Trigger) -> Result<(), UpdateError> {
    if self.session.installing {
      tracing::debug!(trigger = trigger.name(), "install in progress, ignoring");
      return Ok(());
    }
    match trigger {
      Trigger::CheckRequested { manual } => self.on_check_requested(manual).await,
      Trigger::Service { op, event } if op == self.op => self.on_service_event(event).await,
      Trigger::Service { op, event } => {
        tracing::debug!(%op, current = %self.op, event = event.name(), "dropping event from abandoned operation");
        Ok(())
      }
      Trigger::User(action) => self.on_user_action(action).await,
      Trigger::Reset => {
        self.on_reset();
        Ok(())
      }
      Trigger::Shutdown => Ok(()),
    }
  }

  async fn fail(&mut self, err: UpdateError) {
    self.fail_session(err).await;
  }

  async fn shutdown(&mut self) {
    self.abandon_in_flight();
    if let Some(handle) = self.session.active_modal.take() {
      self.modals.force_close(handle);
    }
  }

  fn step(&self) -> Step {
    self.session.step
  }

  fn is_finished(&self) -> bool {
    self.session.installing
  }

  fn is_service_activity(&self, trigger: &Trigger) -> bool {
    matches!(trigger, Trigger::Service { op, .. } if *op == self.op)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorCode;
  use crate::events::{EventHub, ServerEvent};
  use crate::modal::SequencingPolicy;
  use crate::serializer;
  use crate::testing::{FakeModalHost, FakeService, HostCall, Prompt, ScriptedPrompter, ServiceCall};
  use std::time::Duration;
  use tokio::sync::broadcast;

  struct Harness {
    queue: SerializerHandle,
    hub: EventHub,
    host: Arc<FakeModalHost>,
    service: Arc<FakeService>,
    prompter: Arc<ScriptedPrompter>,
    events: broadcast::Receiver<ServerEvent>,
    worker: tokio::task::JoinHandle<()>,
  }

  impl Harness {
    fn start(prompter: ScriptedPrompter) -> Self {
      Self::with_watchdog(prompter, Duration::from_secs(600))
    }

    fn with_watchdog(prompter: ScriptedPrompter, watchdog: Duration) -> Self {
      let (queue, transitions) = serializer::channel(watchdog);
      let host = FakeModalHost::with_close_delay(Duration::from_millis(5));
      let prompter = Arc::new(prompter.watching(host.clone()));
      let service = Arc::new(FakeService::new());
      let hub = EventHub::new();
      let events = hub.subscribe();
      let modals = ModalManager::new(host.clone()).with_policy(SequencingPolicy::Panic);
      let machine = Orchestrator::new(
        service.clone(),
        modals,
        prompter.clone(),
        NotificationBridge::new(hub.clone()),
        queue.clone(),
      );
      let worker = transitions.spawn(machine);
      Self {
        queue,
        hub,
        host,
        service,
        prompter,
        events,
        worker,
      }
    }

    fn send(&self, trigger: Trigger) {
      assert!(self.queue.enqueue(trigger));
    }

    /// Report `event` as the service call that is currently running.
    async fn service_event(&self, event: ServiceEvent) {
      tokio::task::yield_now().await;
      self.service.last_sink().expect("a service call was started").emit(event);
    }

    async fn next(&mut self) -> SessionSnapshot {
      let ServerEvent::SessionChanged(s) = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
        .await
        .expect("no snapshot published")
        .unwrap();
      s
    }

    /// Wait until a snapshot with `step` is published; returns it.
    async fn until(&mut self, step: Step) -> SessionSnapshot {
      tokio::time::timeout(Duration::from_secs(5), async {
        loop {
          let ServerEvent::SessionChanged(s) = self.events.recv().await.unwrap();
          if s.step == step {
            return s;
          }
        }
      })
      .await
      .unwrap_or_else(|_| panic!("never reached {step:?}"))
    }

    /// Drain everything enqueued so far, then stop the worker.
    async fn finish(self) -> Vec<SessionSnapshot> {
      let mut events = self.events;
      self.queue.enqueue(Trigger::Shutdown);
      self.worker.await.unwrap();
      let mut seen = Vec::new();
      while let Ok(ServerEvent::SessionChanged(s)) = events.try_recv() {
        seen.push(s);
      }
      seen
    }
  }

  #[tokio::test]
  async fn available_update_closes_checking_surface_before_prompt() {
    let mut h = Harness::start(ScriptedPrompter::declining());

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))).await;
    let snap = h.until(Step::Available).await;
    assert_eq!(snap.version_info.unwrap().version, "2.3.0");
    h.until(Step::Idle).await;

    let calls = h.host.calls();
    let closed_at = calls
      .iter()
      .position(|c| *c == HostCall::Closed(SurfaceKind::Checking))
      .expect("checking surface closed");
    let prompt_at = calls
      .iter()
      .position(|c| matches!(c, HostCall::Prompt(_)))
      .expect("confirm prompt shown");
    assert!(closed_at < prompt_at);
    assert_eq!(calls.iter().filter(|c| **c == HostCall::Closed(SurfaceKind::Checking)).count(), 1);
    assert_eq!(h.prompter.shown(), vec![Prompt::ConfirmDownload("2.3.0".into())]);
    assert_eq!(h.host.prompts_over_live_surface(), 0);
    h.finish().await;
  }

  #[tokio::test]
  async fn back_to_back_manual_checks_start_one_session() {
    let mut h = Harness::start(ScriptedPrompter::declining());

    h.send(Trigger::CheckRequested { manual: true });
    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    tokio::task::yield_now().await;
    let host = h.host.clone();
    let service = h.service.clone();
    let seen = h.finish().await;

    assert_eq!(service.calls(), vec![ServiceCall::Check]);
    assert_eq!(host.opened(SurfaceKind::Checking), 1);
    assert!(seen.iter().all(|s| s.step != Step::Checking));
  }

  #[tokio::test]
  async fn manual_request_promotes_in_flight_automatic_check() {
    let mut h = Harness::start(ScriptedPrompter::declining());

    h.send(Trigger::CheckRequested { manual: false });
    let first = h.until(Step::Checking).await;
    assert!(!first.triggered_manually);
    h.send(Trigger::CheckRequested { manual: true });
    let promoted = h.until(Step::Checking).await;
    assert!(promoted.triggered_manually);

    h.service_event(ServiceEvent::UpdateNotAvailable).await;
    h.until(Step::Idle).await;
    assert_eq!(h.prompter.shown(), vec![Prompt::UpToDate]);
    assert_eq!(h.service.calls(), vec![ServiceCall::Check]);
    h.finish().await;
  }

  #[tokio::test]
  async fn automatic_not_available_is_silent_but_manual_is_shown() {
    let mut h = Harness::start(ScriptedPrompter::declining());

    h.send(Trigger::CheckRequested { manual: false });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateNotAvailable).await;
    h.until(Step::NotAvailable).await;
    let idle = h.until(Step::Idle).await;
    assert!(!idle.triggered_manually);
    assert!(h.prompter.shown().is_empty());

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateNotAvailable).await;
    h.until(Step::NotAvailable).await;
    h.until(Step::Idle).await;
    assert_eq!(h.prompter.shown(), vec![Prompt::UpToDate]);
    h.finish().await;
  }

  #[tokio::test]
  async fn download_error_closes_surface_records_error_and_recovers() {
    let mut h = Harness::start(ScriptedPrompter::accepting());

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))).await;
    h.until(Step::Downloading).await;
    h.service_event(ServiceEvent::Error(ErrorDetail::new(ErrorCode::Http4xx, "rate limit"))).await;
    let err = h.until(Step::Error).await;
    assert_eq!(err.last_error.as_ref().unwrap().message, "rate limit");
    assert!(h.host.calls().contains(&HostCall::Closed(SurfaceKind::Downloading)));
    assert_eq!(h.host.open_count(), 0);

    let idle = h.until(Step::Idle).await;
    assert!(idle.last_error.is_none());
    assert!(!idle.triggered_manually);

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    assert_eq!(h.prompter.shown().last(), Some(&Prompt::Error("rate limit".into())));
    assert_eq!(h.host.overlap_violations(), 0);
    h.finish().await;
  }

  #[tokio::test]
  async fn full_round_trip_with_later_returns_to_idle() {
    let mut h = Harness::start(ScriptedPrompter::scripted(vec![true, false]));

    h.send(Trigger::CheckRequested { manual: false });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))).await;
    h.until(Step::Available).await;
    let dl = h.until(Step::Downloading).await;
    assert_eq!(dl.progress, Some(0.0));

    h.service_event(ServiceEvent::DownloadProgress(40.0)).await;
    h.service_event(ServiceEvent::DownloadProgress(140.0)).await;
    h.service_event(ServiceEvent::UpdateDownloaded(VersionInfo::new("2.3.0"))).await;
    let done = h.until(Step::Downloaded).await;
    assert!(done.progress.is_none());
    h.until(Step::Idle).await;

    assert!(h.host.calls().contains(&HostCall::Progress(40.0)));
    assert!(h.host.calls().contains(&HostCall::Progress(100.0)));
    assert_eq!(h.service.calls(), vec![ServiceCall::Check, ServiceCall::Download]);
    assert_eq!(h.host.overlap_violations(), 0);
    assert_eq!(h.host.prompts_over_live_surface(), 0);
    h.finish().await;
  }

  #[tokio::test]
  async fn restart_now_installs_and_stops_processing() {
    let mut h = Harness::start(ScriptedPrompter::accepting());

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("3.0.0"))).await;
    h.until(Step::Downloading).await;
    h.service_event(ServiceEvent::UpdateDownloaded(VersionInfo::new("3.0.0"))).await;
    h.until(Step::Downloaded).await;

    let Harness { queue, service, worker, .. } = h;
    tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
    assert_eq!(
      service.calls(),
      vec![
        ServiceCall::Check,
        ServiceCall::Download,
        ServiceCall::Install { silent: false, relaunch: true }
      ]
    );
    assert!(!queue.enqueue(Trigger::CheckRequested { manual: true }));
  }

  #[tokio::test]
  async fn automatic_check_failure_is_logged_not_prompted() {
    let mut h = Harness::start(ScriptedPrompter::declining());
    h.service.fail_next_check(ErrorCode::Network, "offline");

    h.send(Trigger::CheckRequested { manual: false });
    let err = h.until(Step::Error).await;
    assert_eq!(err.last_error.unwrap().code, ErrorCode::Network);
    h.until(Step::Idle).await;
    assert!(h.prompter.shown().is_empty());
    assert_eq!(h.host.open_count(), 0);
    h.finish().await;
  }

  #[tokio::test]
  async fn events_for_inactive_steps_are_ignored() {
    let h = Harness::start(ScriptedPrompter::declining());
    let sink = h.queue.service_sink(OperationId::default());
    sink.emit(ServiceEvent::UpdateDownloaded(VersionInfo::new("9.9.9")));
    sink.emit(ServiceEvent::DownloadProgress(50.0));
    h.send(Trigger::User(UserAction::RestartNow));
    let service = h.service.clone();
    let seen = h.finish().await;
    assert!(seen.is_empty());
    assert!(service.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn hung_check_times_out_and_next_check_still_runs() {
    let mut h = Harness::with_watchdog(ScriptedPrompter::declining(), Duration::from_secs(2));
    h.service.hang_checks();

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    let err = h.until(Step::Error).await;
    assert_eq!(err.last_error.unwrap().code, ErrorCode::Timeout);
    assert_eq!(h.host.open_count(), 0);
    h.until(Step::Idle).await;

    h.send(Trigger::CheckRequested { manual: true });
    let again = h.until(Step::Checking).await;
    assert!(again.triggered_manually);
    tokio::task::yield_now().await;
    assert_eq!(h.service.calls(), vec![ServiceCall::Check, ServiceCall::Check]);
    assert_eq!(h.host.opened(SurfaceKind::Checking), 2);
    h.finish().await;
  }

  #[tokio::test]
  async fn late_event_from_abandoned_download_is_dropped() {
    let mut h = Harness::start(ScriptedPrompter::accepting());

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))).await;
    h.until(Step::Downloading).await;
    tokio::task::yield_now().await;
    let abandoned = h.service.last_sink().unwrap();
    h.service_event(ServiceEvent::Error(ErrorDetail::new(ErrorCode::Network, "reset"))).await;
    h.until(Step::Error).await;
    h.until(Step::Idle).await;

    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    h.service_event(ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))).await;
    h.until(Step::Downloading).await;
    tokio::task::yield_now().await;
    assert_ne!(h.service.last_sink().unwrap().op(), abandoned.op());

    abandoned.emit(ServiceEvent::UpdateDownloaded(VersionInfo::new("2.3.0")));
    h.service_event(ServiceEvent::DownloadProgress(10.0)).await;
    let next = h.next().await;
    assert_eq!((next.step, next.progress), (Step::Downloading, Some(10.0)));
    assert!(!h.prompter.shown().contains(&Prompt::ConfirmRestart("2.3.0".into())));
    h.finish().await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_triggers_keep_surfaces_and_prompts_sequenced() {
    let h = Harness::start(ScriptedPrompter::accepting());
    h.service
      .respond_to_checks_with(vec![ServiceEvent::UpdateAvailable(VersionInfo::new("2.3.0"))]);

    let mut rx = h.hub.subscribe();
    let collector = tokio::spawn(async move {
      let mut seen = Vec::new();
      loop {
        match rx.recv().await {
          Ok(ServerEvent::SessionChanged(s)) => seen.push(s),
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => return seen,
        }
      }
    });

    let mut tasks = Vec::new();
    for i in 0..40u32 {
      let queue = h.queue.clone();
      let service = h.service.clone();
      tasks.push(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(u64::from(i % 7))).await;
        match i % 5 {
          0 => {
            queue.enqueue(Trigger::CheckRequested { manual: false });
          }
          1 => {
            queue.enqueue(Trigger::CheckRequested { manual: true });
          }
          2 => {
            queue.enqueue(Trigger::User(UserAction::Decline));
          }
          3 => {
            if let Some(sink) = service.last_sink() {
              sink.emit(ServiceEvent::DownloadProgress(f64::from(i)));
            }
          }
          _ => {
            if let Some(sink) = service.last_sink() {
              sink.emit(ServiceEvent::Error(ErrorDetail::new(ErrorCode::Network, "flaky")));
            }
          }
        }
      }));
    }
    for t in tasks {
      t.await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let host = h.host.clone();
    h.finish().await;
    let seen = tokio::time::timeout(Duration::from_secs(5), collector).await.unwrap().unwrap();

    assert_eq!(host.overlap_violations(), 0);
    assert_eq!(host.prompts_over_live_surface(), 0);
    assert_eq!(host.open_count(), 0);
    assert!(seen.iter().any(|s| s.step == Step::Checking));
    for s in &seen {
      if let Some(e) = &s.last_error {
        assert!(!matches!(e.code, ErrorCode::Sequencing | ErrorCode::Unknown), "{e:?}");
      }
    }
  }

  #[tokio::test]
  async fn shutdown_force_closes_live_surface() {
    let mut h = Harness::start(ScriptedPrompter::declining());
    h.send(Trigger::CheckRequested { manual: true });
    h.until(Step::Checking).await;
    let host = h.host.clone();
    h.finish().await;
    assert!(host.calls().contains(&HostCall::Destroy(SurfaceKind::Checking)));
    assert_eq!(host.open_count(), 0);
  }
}
