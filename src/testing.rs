//! In-process fakes for the host window, the update service and the prompts.

use crate::error::{ErrorCode, UpdateError};
use crate::modal::ModalHost;
use crate::model::{ErrorDetail, ServiceEvent, SurfaceId, SurfaceKind, VersionInfo};
use crate::orchestrator::Prompter;
use crate::service::{ServiceEventSink, UpdateService};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
  Open(SurfaceKind),
  RequestClose(SurfaceKind),
  Closed(SurfaceKind),
  Destroy(SurfaceKind),
  Progress(f64),
  ParentInteractive,
  Prompt(Prompt),
}

struct Surface {
  kind: SurfaceKind,
  closed: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct HostState {
  open: HashMap<SurfaceId, Surface>,
  calls: Vec<HostCall>,
  overlap_violations: usize,
  prompts_over_live_surface: usize,
  fail_next_open: bool,
}

/// Records every call and counts any surface opened while another is still up.
pub struct FakeModalHost {
  state: Arc<Mutex<HostState>>,
  /// `None`: the host never confirms a requested close.
  close_delay: Option<Duration>,
}

impl FakeModalHost {
  pub fn with_close_delay(delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      state: Arc::default(),
      close_delay: Some(delay),
    })
  }

  pub fn never_closing() -> Arc<Self> {
    Arc::new(Self {
      state: Arc::default(),
      close_delay: None,
    })
  }

  pub fn calls(&self) -> Vec<HostCall> {
    self.state.lock().calls.clone()
  }

  pub fn open_count(&self) -> usize {
    self.state.lock().open.len()
  }

  pub fn opened(&self, kind: SurfaceKind) -> usize {
    self.state.lock().calls.iter().filter(|c| **c == HostCall::Open(kind)).count()
  }

  pub fn overlap_violations(&self) -> usize {
    self.state.lock().overlap_violations
  }

  pub fn prompts_over_live_surface(&self) -> usize {
    self.state.lock().prompts_over_live_surface
  }

  pub fn fail_next_open(&self) {
    self.state.lock().fail_next_open = true;
  }

  fn record_prompt(&self, prompt: Prompt) {
    let mut st = self.state.lock();
    if !st.open.is_empty() {
      st.prompts_over_live_surface += 1;
    }
    st.calls.push(HostCall::Prompt(prompt));
  }
}

impl ModalHost for FakeModalHost {
  fn open_surface(&self, id: SurfaceId, kind: SurfaceKind, closed: oneshot::Sender<()>) -> anyhow::Result<()> {
    let mut st = self.state.lock();
    if std::mem::take(&mut st.fail_next_open) {
      anyhow::bail!("window creation failed");
    }
    if !st.open.is_empty() {
      st.overlap_violations += 1;
    }
    st.calls.push(HostCall::Open(kind));
    st.open.insert(id, Surface { kind, closed: Some(closed) });
    Ok(())
  }

  fn request_close(&self, id: SurfaceId) -> anyhow::Result<()> {
    let mut st = self.state.lock();
    let Some(surface) = st.open.get_mut(&id) else {
      anyhow::bail!("unknown surface {id}");
    };
    let kind = surface.kind;
    let Some(delay) = self.close_delay else {
      st.calls.push(HostCall::RequestClose(kind));
      return Ok(());
    };
    let sender = surface.closed.take();
    st.calls.push(HostCall::RequestClose(kind));
    drop(st);

    let state = self.state.clone();
    tokio::spawn(async move {
      if delay.is_zero() {
        tokio::task::yield_now().await;
      } else {
        tokio::time::sleep(delay).await;
      }
      {
        let mut st = state.lock();
        if let Some(s) = st.open.remove(&id) {
          st.calls.push(HostCall::Closed(s.kind));
        }
      }
      if let Some(tx) = sender {
        let _ = tx.send(());
      }
    });
    Ok(())
  }

  fn destroy(&self, id: SurfaceId) {
    let mut st = self.state.lock();
    if let Some(mut s) = st.open.remove(&id) {
      st.calls.push(HostCall::Destroy(s.kind));
      if let Some(tx) = s.closed.take() {
        let _ = tx.send(());
      }
    }
  }

  fn set_progress(&self, id: SurfaceId, percent: f64) {
    let mut st = self.state.lock();
    if st.open.contains_key(&id) {
      st.calls.push(HostCall::Progress(percent));
    }
  }

  fn set_parent_interactive(&self) -> anyhow::Result<()> {
    self.state.lock().calls.push(HostCall::ParentInteractive);
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
  Check,
  Download,
  Install { silent: bool, relaunch: bool },
}

/// Records calls and the sink each operation was given; outcomes are either scripted or
/// injected by the test through [`FakeService::last_sink`].
#[derive(Default)]
pub struct FakeService {
  calls: Mutex<Vec<ServiceCall>>,
  sinks: Mutex<Vec<ServiceEventSink>>,
  fail_next_check: Mutex<Option<UpdateError>>,
  hang_checks: AtomicBool,
  on_check: Mutex<Vec<ServiceEvent>>,
}

impl FakeService {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self) -> Vec<ServiceCall> {
    self.calls.lock().clone()
  }

  /// Sink handed to the most recent check or download.
  pub fn last_sink(&self) -> Option<ServiceEventSink> {
    self.sinks.lock().last().cloned()
  }

  pub fn fail_next_check(&self, code: ErrorCode, message: &str) {
    *self.fail_next_check.lock() = Some(UpdateError::adapter(code, message));
  }

  /// Every subsequent check never resolves and never reports.
  pub fn hang_checks(&self) {
    self.hang_checks.store(true, Ordering::SeqCst);
  }

  /// Events emitted (in order) by every subsequent check.
  pub fn respond_to_checks_with(&self, events: Vec<ServiceEvent>) {
    *self.on_check.lock() = events;
  }
}

impl UpdateService for FakeService {
  async fn check_for_updates(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    self.calls.lock().push(ServiceCall::Check);
    self.sinks.lock().push(events.clone());
    if self.hang_checks.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    if let Some(e) = self.fail_next_check.lock().take() {
      return Err(e);
    }
    let scripted = self.on_check.lock().clone();
    for ev in scripted {
      events.emit(ev);
    }
    Ok(())
  }

  async fn download(&self, events: ServiceEventSink) -> Result<(), UpdateError> {
    self.calls.lock().push(ServiceCall::Download);
    self.sinks.lock().push(events);
    Ok(())
  }

  async fn install(&self, silent: bool, relaunch: bool) -> Result<(), UpdateError> {
    self.calls.lock().push(ServiceCall::Install { silent, relaunch });
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
  ConfirmDownload(String),
  ConfirmRestart(String),
  UpToDate,
  Error(String),
}

/// Answers confirm prompts from a script; falls back to `default_answer` once it runs out.
pub struct ScriptedPrompter {
  answers: Mutex<VecDeque<bool>>,
  default_answer: bool,
  shown: Mutex<Vec<Prompt>>,
  host: Option<Arc<FakeModalHost>>,
}

impl ScriptedPrompter {
  pub fn accepting() -> Self {
    Self::with(Vec::new(), true)
  }

  pub fn declining() -> Self {
    Self::with(Vec::new(), false)
  }

  pub fn scripted(answers: Vec<bool>) -> Self {
    Self::with(answers, false)
  }

  fn with(answers: Vec<bool>, default_answer: bool) -> Self {
    Self {
      answers: Mutex::new(answers.into()),
      default_answer,
      shown: Mutex::new(Vec::new()),
      host: None,
    }
  }

  /// Also log prompts into the host timeline so ordering against surfaces can be asserted.
  pub fn watching(mut self, host: Arc<FakeModalHost>) -> Self {
    self.host = Some(host);
    self
  }

  pub fn shown(&self) -> Vec<Prompt> {
    self.shown.lock().clone()
  }

  fn record(&self, prompt: Prompt) {
    if let Some(host) = &self.host {
      host.record_prompt(prompt.clone());
    }
    self.shown.lock().push(prompt);
  }

  fn answer(&self) -> bool {
    self.answers.lock().pop_front().unwrap_or(self.default_answer)
  }
}

impl Prompter for ScriptedPrompter {
  async fn confirm_download(&self, info: &VersionInfo) -> bool {
    self.record(Prompt::ConfirmDownload(info.version.clone()));
    self.answer()
  }

  async fn confirm_restart(&self, info: &VersionInfo) -> bool {
    self.record(Prompt::ConfirmRestart(info.version.clone()));
    self.answer()
  }

  async fn show_up_to_date(&self) {
    self.record(Prompt::UpToDate);
  }

  async fn show_error(&self, detail: &ErrorDetail) {
    self.record(Prompt::Error(detail.message.clone()));
  }
}
