use crate::error::UpdateError;
use crate::model::{OperationId, ServiceEvent, Trigger};
use crate::serializer::SerializerHandle;
use std::future::Future;

/// The check/download/install backend.
///
/// `check_for_updates` and `download` run on a task of their own, so they may take as long as
/// the network does. Their outcomes are reported through `events`, which is scoped to the one
/// operation; a returned `Err` is reported as a [`ServiceEvent::Error`] of that operation.
pub trait UpdateService: Send + Sync + 'static {
  fn check_for_updates(&self, events: ServiceEventSink) -> impl Future<Output = Result<(), UpdateError>> + Send;
  fn download(&self, events: ServiceEventSink) -> impl Future<Output = Result<(), UpdateError>> + Send;
  /// Apply the downloaded update. With `relaunch` the process is expected to exit shortly after.
  ///
  /// `silent` asks for an installer without UI. Adapters whose install mode is fixed by the
  /// bundle config cannot honor it and only log it.
  fn install(&self, silent: bool, relaunch: bool) -> impl Future<Output = Result<(), UpdateError>> + Send;
}

/// Where one operation's callbacks go. Events are turned into queued transitions, never applied
/// directly.
#[derive(Clone)]
pub struct ServiceEventSink {
  queue: SerializerHandle,
  op: OperationId,
}

impl ServiceEventSink {
  pub(crate) fn new(queue: SerializerHandle, op: OperationId) -> Self {
    Self { queue, op }
  }

  pub fn op(&self) -> OperationId {
    self.op
  }

  pub fn emit(&self, event: ServiceEvent) {
    tracing::trace!(op = %self.op, event = event.name(), "service event");
    self.queue.enqueue(Trigger::Service { op: self.op, event });
  }
}
