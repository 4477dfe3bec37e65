//! Submission observers provided by the orchestration layer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use soknad_core::submission::{ObserverHandle, StateChange, SubmissionObserver};

/// Logs every submission state change at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SubmissionObserver for TracingObserver {
  fn state_changed(&self, change: &StateChange) {
    tracing::info!(
      submission_id = %change.submission_id,
      kind = %change.kind,
      state = %change.state,
      previous = %change.previous,
      "submission state changed"
    );
  }
}

/// Holds the state changes of one event until the application they belong
/// to is saved. Dropped unread when the event is rejected.
#[derive(Debug, Default)]
pub(crate) struct ChangeBuffer(Mutex<Vec<StateChange>>);

impl ChangeBuffer {
  /// Hand every buffered change to `observers`, in the order raised.
  pub(crate) fn forward(&self, observers: &[ObserverHandle]) {
    let changes = std::mem::take(&mut *self.changes());
    for change in &changes {
      for observer in observers {
        observer.state_changed(change);
      }
    }
  }

  fn changes(&self) -> MutexGuard<'_, Vec<StateChange>> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl SubmissionObserver for ChangeBuffer {
  fn state_changed(&self, change: &StateChange) { self.changes().push(change.clone()); }
}
