use crate::config::UpdaterSettings;
use crate::model::Trigger;
use crate::serializer::SerializerHandle;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Automatic and manual entry points into the update flow. Both only enqueue.
pub struct Scheduler {
  queue: SerializerHandle,
  timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
  pub fn new(queue: SerializerHandle) -> Self {
    Self {
      queue,
      timer: Mutex::new(None),
    }
  }

  /// Start automatic checks according to `settings`, unless they are disabled.
  pub fn start_with(&self, settings: &UpdaterSettings) {
    if settings.disable_auto_updates {
      tracing::info!("automatic update checks disabled");
      return;
    }
    self.start(settings.initial_delay(), settings.check_interval());
  }

  /// One check after `initial_delay`, then one every `interval`. Restarting replaces the timers.
  pub fn start(&self, initial_delay: Duration, interval: Duration) {
    let queue = self.queue.clone();
    let task = tokio::spawn(async move {
      tokio::time::sleep(initial_delay).await;
      if !queue.enqueue(Trigger::CheckRequested { manual: false }) {
        return;
      }
      let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
      tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      loop {
        tick.tick().await;
        tracing::debug!("scheduled update check");
        if !queue.enqueue(Trigger::CheckRequested { manual: false }) {
          return;
        }
      }
    });

    if let Some(old) = self.timer.lock().replace(task) {
      old.abort();
    }
    tracing::info!(
      initial_delay_ms = initial_delay.as_millis() as u64,
      interval_ms = interval.as_millis() as u64,
      "update scheduler started"
    );
  }

  pub fn stop(&self) {
    if let Some(task) = self.timer.lock().take() {
      task.abort();
      tracing::info!("update scheduler stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.timer.lock().as_ref().is_some_and(|t| !t.is_finished())
  }

  /// Menu/button entry point. Returns immediately; does not wait for the outcome. `false` once
  /// the worker has stopped.
  pub fn trigger_manual_check(&self) -> bool {
    tracing::info!("manual update check requested");
    self.queue.enqueue(Trigger::CheckRequested { manual: true })
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    if let Some(task) = self.timer.get_mut().take() {
      task.abort();
    }
  }
}
