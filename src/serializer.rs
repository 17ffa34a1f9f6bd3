//! Single-worker transition queue.
//!
//! Timers, UI handlers and service callbacks only ever call [`SerializerHandle::enqueue`]. One
//! worker task owns the state machine and applies requests strictly in enqueue order, each to
//! completion before the next is dequeued.

use crate::error::{ErrorCode, UpdateError};
use crate::model::{OperationId, Step, TransitionRequest, Trigger};
use crate::service::ServiceEventSink;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What the worker drives. Implemented by the orchestrator.
pub trait TransitionMachine: Send + 'static {
  fn apply(&mut self, trigger: Trigger) -> impl Future<Output = Result<(), UpdateError>> + Send;
  /// The single error path. Must not fail.
  fn fail(&mut self, err: UpdateError) -> impl Future<Output = ()> + Send;
  fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
  /// Current step, used to arm the no-response watchdog.
  fn step(&self) -> Step;
  /// True once nothing further should be processed (e.g. an install is restarting the process).
  fn is_finished(&self) -> bool;
  /// Whether `trigger` is a sign of life from the operation currently awaited. Only those re-arm
  /// the watchdog.
  fn is_service_activity(&self, trigger: &Trigger) -> bool {
    matches!(trigger, Trigger::Service { .. })
  }
}

#[derive(Clone)]
pub struct SerializerHandle {
  tx: mpsc::UnboundedSender<TransitionRequest>,
  seq: Arc<AtomicU64>,
}

impl SerializerHandle {
  /// Never blocks and never awaits the outcome. Returns false if the worker is gone.
  pub fn enqueue(&self, trigger: Trigger) -> bool {
    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let name = trigger.name();
    match self.tx.send(TransitionRequest { seq, trigger }) {
      Ok(()) => {
        tracing::trace!(seq, trigger = name, "enqueued");
        true
      }
      Err(_) => {
        tracing::debug!(seq, trigger = name, "transition queue closed, dropping request");
        false
      }
    }
  }

  pub fn service_sink(&self, op: OperationId) -> ServiceEventSink {
    ServiceEventSink::new(self.clone(), op)
  }
}

pub struct TransitionQueue {
  rx: mpsc::UnboundedReceiver<TransitionRequest>,
  watchdog: Duration,
}

pub fn channel(watchdog: Duration) -> (SerializerHandle, TransitionQueue) {
  let (tx, rx) = mpsc::unbounded_channel();
  (
    SerializerHandle {
      tx,
      seq: Arc::new(AtomicU64::new(0)),
    },
    TransitionQueue { rx, watchdog },
  )
}

impl TransitionQueue {
  #[cfg(test)]
  pub(crate) fn try_next(&mut self) -> Option<TransitionRequest> {
    self.rx.try_recv().ok()
  }

  pub fn spawn<M: TransitionMachine>(self, machine: M) -> JoinHandle<()> {
    tokio::spawn(self.run(machine))
  }

  pub async fn run<M: TransitionMachine>(mut self, mut machine: M) {
    // (step being watched, deadline)
    let mut deadline: Option<(Step, Instant)> = None;

    loop {
      let next = match deadline {
        Some((step, at)) => tokio::select! {
          req = self.rx.recv() => req,
          _ = tokio::time::sleep_until(at) => {
            tracing::warn!(?step, after_ms = self.watchdog.as_millis() as u64, "no response from update service");
            machine.fail(UpdateError::Timeout { step, after: self.watchdog }).await;
            deadline = self.rearm(None, machine.step(), true);
            if machine.is_finished() {
              break;
            }
            continue;
          }
        },
        None => self.rx.recv().await,
      };

      let Some(TransitionRequest { seq, trigger }) = next else {
        break;
      };

      if matches!(trigger, Trigger::Shutdown) {
        tracing::info!(seq, "transition worker shutting down");
        machine.shutdown().await;
        break;
      }

      let from_service = machine.is_service_activity(&trigger);
      let name = trigger.name();
      tracing::debug!(seq, trigger = name, step = ?machine.step(), "processing");

      match AssertUnwindSafe(machine.apply(trigger)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          tracing::debug!(seq, trigger = name, error = %e, "transition failed");
          machine.fail(e).await;
        }
        Err(panic) => {
          let msg = panic_message(panic.as_ref());
          tracing::error!(seq, trigger = name, panic = %msg, "transition panicked");
          machine
            .fail(UpdateError::adapter(ErrorCode::Unknown, format!("internal error: {msg}")))
            .await;
        }
      }

      if machine.is_finished() {
        tracing::info!(seq, "state machine finished, worker exiting");
        break;
      }

      deadline = self.rearm(deadline, machine.step(), from_service);
    }
  }

  /// Keep the running deadline while the same step waits on the service with no new service
  /// activity; start a fresh one on entry to a waiting step or on any service event.
  fn rearm(&self, current: Option<(Step, Instant)>, step: Step, activity: bool) -> Option<(Step, Instant)> {
    if !step.awaits_service() {
      return None;
    }
    match current {
      Some((watched, at)) if watched == step && !activity => Some((watched, at)),
      _ => Some((step, Instant::now() + self.watchdog)),
    }
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
