use crate::config::UpdaterSettings;
use crate::error::UpdateError;
use crate::events::{EventHub, NotificationBridge, ServerEvent, UiAction};
use crate::modal::{ModalHost, ModalManager, ModalRegistry, SequencingPolicy};
use crate::model::{SessionSnapshot, Trigger};
use crate::orchestrator::{Orchestrator, Prompter};
use crate::scheduler::Scheduler;
use crate::serializer::{self, SerializerHandle};
use crate::service::UpdateService;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Everything the host application holds on to: entry points, state view, shutdown hook.
pub struct UpdaterRuntime {
  queue: SerializerHandle,
  scheduler: Scheduler,
  bridge: NotificationBridge,
  registry: ModalRegistry,
  worker: Mutex<Option<JoinHandle<()>>>,
}

pub struct RuntimeOptions {
  pub settings: UpdaterSettings,
  pub sequencing: SequencingPolicy,
  pub events: EventHub,
}

impl RuntimeOptions {
  pub fn new(settings: UpdaterSettings) -> Self {
    Self {
      settings,
      sequencing: SequencingPolicy::default(),
      events: EventHub::new(),
    }
  }
}

impl UpdaterRuntime {
  /// Wire serializer, orchestrator and scheduler, and start automatic checks.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn start<S, H, P>(
    opts: RuntimeOptions,
    service: Arc<S>,
    host: Arc<H>,
    prompter: Arc<P>,
  ) -> anyhow::Result<Self>
  where
    S: UpdateService,
    H: ModalHost,
    P: Prompter,
  {
    opts.settings.validate()?;

    let (queue, transitions) = serializer::channel(opts.settings.transition_timeout());
    let modals = ModalManager::new(host).with_policy(opts.sequencing);
    let registry = modals.registry();
    let bridge = NotificationBridge::new(opts.events);

    let machine = Orchestrator::new(service, modals, prompter, bridge.clone(), queue.clone());
    let worker = transitions.spawn(machine);

    let scheduler = Scheduler::new(queue.clone());
    scheduler.start_with(&opts.settings);

    tracing::info!(
      auto = !opts.settings.disable_auto_updates,
      interval_ms = opts.settings.check_interval_ms,
      "updater started"
    );

    Ok(Self {
      queue,
      scheduler,
      bridge,
      registry,
      worker: Mutex::new(Some(worker)),
    })
  }

  pub fn trigger_manual_check(&self) -> Result<(), UpdateError> {
    if self.scheduler.trigger_manual_check() {
      Ok(())
    } else {
      Err(UpdateError::ChannelClosed)
    }
  }

  pub fn dispatch_ui_action(&self, action: UiAction) -> Result<(), UpdateError> {
    if action.forward(&self.queue) {
      Ok(())
    } else {
      Err(UpdateError::ChannelClosed)
    }
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    self.bridge.latest()
  }

  pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
    self.bridge.watch()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
    self.bridge.hub().subscribe()
  }

  /// Stop timers, tear down any live surface without waiting, and let the worker exit.
  pub async fn shutdown(&self) {
    self.scheduler.stop();
    self.registry.force_close_live();
    self.queue.enqueue(Trigger::Shutdown);
    let worker = self.worker.lock().take();
    if let Some(worker) = worker {
      // The worker may be parked in a prompt; don't hold up process exit for it.
      if tokio::time::timeout(std::time::Duration::from_secs(2), worker).await.is_err() {
        tracing::warn!("transition worker did not stop in time");
      }
    }
  }

  /// Synchronous variant for exit hooks that cannot await.
  pub fn shutdown_now(&self) {
    self.scheduler.stop();
    self.registry.force_close_live();
    self.queue.enqueue(Trigger::Shutdown);
    if let Some(worker) = self.worker.lock().take() {
      worker.abort();
    }
  }
}
