//! [`Mediator`], which applies one inbound event end to end.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use soknad_core::{
  activity::{ActivityLog, Severity},
  application::{Application, ApplicationState},
  event::{Event, EventKind},
  mediator::{NeedMessage, mediate},
  store::ApplicationStore,
  submission::ObserverHandle,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Error, NeedPublisher, Result, TracingObserver, observer::ChangeBuffer};

/// What processing one event produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
  pub application_id: Uuid,
  pub state:          ApplicationState,
  pub messages:       Vec<NeedMessage>,
  /// Only what this event raised; the full history lives on the application.
  pub activities:     ActivityLog,
}

/// Runs load → handle → mediate → save → publish, one event at a time per
/// owner.
///
/// Messages are saved to the store's outbox together with the application
/// and removed once published. Whatever a failed publish leaves behind is
/// sent before the owner's next event is handled, or by
/// [`retry_pending`](Self::retry_pending).
pub struct Mediator<S, P> {
  store:     Arc<S>,
  publisher: Arc<P>,
  observers: Vec<ObserverHandle>,
  /// One lock per owner with an event in flight; entries go away with the
  /// last holder.
  locks:     Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S, P> Mediator<S, P>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  /// A mediator that logs submission state changes through `tracing`.
  pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
    Self {
      store,
      publisher,
      observers: vec![Arc::new(TracingObserver)],
      locks: Mutex::new(HashMap::new()),
    }
  }

  /// Attach another observer to every submission this mediator touches.
  /// Observers only hear about changes that have been saved.
  pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
    self.observers.push(observer);
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Apply `event`, persist the result and publish the needs it raised.
  ///
  /// Nothing is saved or published when the event is rejected. A publish
  /// failure leaves the state saved and the messages pending.
  pub async fn handle(&self, event: Event) -> Result<Outcome> {
    let ident = event.ident.clone();
    let lock = self.lock_for(&ident).await;
    let result = {
      let _guard = lock.lock().await;
      self.process(event).await
    };
    self.release(&ident, lock).await;
    result
  }

  /// Publish whatever an earlier failure left in the owner's outbox.
  /// Returns how many messages went out.
  pub async fn retry_pending(&self, ident: &str) -> Result<usize> {
    let lock = self.lock_for(ident).await;
    let result = {
      let _guard = lock.lock().await;
      self.flush(ident).await
    };
    self.release(ident, lock).await;
    result
  }

  async fn process(&self, event: Event) -> Result<Outcome> {
    self.flush(&event.ident).await?;

    let changes = Arc::new(ChangeBuffer::default());
    let mut log = ActivityLog::new();
    let application = match self.apply(&event, &mut log, &changes).await {
      Ok(application) => application,
      Err(e) => return Err(rejected(&event, e)),
    };
    self.settle(&event, application, log, &changes).await
  }

  /// Mediate, save and publish an application that has handled `event`.
  pub(crate) async fn settle(
    &self,
    event: &Event,
    mut application: Application,
    log: ActivityLog,
    changes: &ChangeBuffer,
  ) -> Result<Outcome> {
    let messages = mediate(&log, &event.ident, event.event_id)
      .map_err(|e| rejected(event, e.into()))?;

    for activity in log.activities() {
      match activity.severity {
        Severity::Warn => tracing::warn!(
          application_id = %application.id,
          event = event.name(),
          contexts = %activity.contexts,
          "{}", activity.message
        ),
        Severity::Error => tracing::error!(
          application_id = %application.id,
          event = event.name(),
          contexts = %activity.contexts,
          "{}", activity.message
        ),
        _ => {}
      }
    }

    application.activity_log.absorb(log.clone());
    self
      .store
      .save(&application, &messages)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    changes.forward(&self.observers);
    self.publish(&messages).await?;

    tracing::info!(
      application_id = %application.id,
      ident = %event.ident,
      event = event.name(),
      state = %application.state,
      messages = messages.len(),
      "event handled"
    );

    Ok(Outcome {
      application_id: application.id,
      state: application.state,
      messages,
      activities: log,
    })
  }

  async fn flush(&self, ident: &str) -> Result<usize> {
    let pending = self
      .store
      .pending_messages(ident)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    if pending.is_empty() {
      return Ok(0);
    }

    tracing::info!(ident, messages = pending.len(), "publishing pending needs");
    self.publish(&pending).await?;
    Ok(pending.len())
  }

  async fn publish(&self, messages: &[NeedMessage]) -> Result<()> {
    if messages.is_empty() {
      return Ok(());
    }

    if let Err(e) = self.publisher.publish(messages).await {
      tracing::warn!(
        messages = messages.len(),
        "publish failed, needs stay pending: {e}"
      );
      return Err(Error::Publish(Box::new(e)));
    }

    let ids: Vec<String> = messages.iter().map(|m| m.message_id.clone()).collect();
    self
      .store
      .mark_published(&ids)
      .await
      .map_err(|e| Error::Store(Box::new(e)))
  }

  async fn apply(
    &self,
    event: &Event,
    log: &mut ActivityLog,
    changes: &Arc<ChangeBuffer>,
  ) -> Result<Application> {
    if let EventKind::NewApplicationWanted { .. } = event.kind {
      let existing = self
        .store
        .find_being_created(&event.ident)
        .await
        .map_err(|e| Error::Store(Box::new(e)))?;
      return match existing {
        Some(application) => {
          let mut application = self.observed(application, changes);
          application.handle(event, log)?;
          Ok(application)
        }
        None => Ok(self.observed(Application::create(event, log)?, changes)),
      };
    }

    let id = event
      .application_id
      .ok_or(Error::MissingApplicationId { event: event.name() })?;
    let application = self
      .store
      .load(id)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?
      .filter(|a| a.ident == event.ident)
      .ok_or(Error::ApplicationNotFound(id))?;

    let mut application = self.observed(application, changes);
    application.handle(event, log)?;
    Ok(application)
  }

  pub(crate) fn observed(
    &self,
    application: Application,
    changes: &Arc<ChangeBuffer>,
  ) -> Application {
    application.with_submission_observer(changes.clone())
  }

  async fn lock_for(&self, ident: &str) -> Arc<Mutex<()>> {
    self
      .locks
      .lock()
      .await
      .entry(ident.to_owned())
      .or_default()
      .clone()
  }

  async fn release(&self, ident: &str, lock: Arc<Mutex<()>>) {
    let mut locks = self.locks.lock().await;
    // The map and `lock` are the only holders left.
    if Arc::strong_count(&lock) == 2 {
      locks.remove(ident);
    }
  }

  #[cfg(test)]
  pub(crate) async fn tracked_owners(&self) -> usize { self.locks.lock().await.len() }
}

fn rejected(event: &Event, error: Error) -> Error {
  tracing::error!(
    event_id = %event.event_id,
    ident = %event.ident,
    event = event.name(),
    fatal = error.is_fatal(),
    "event rejected: {error}"
  );
  error
}
