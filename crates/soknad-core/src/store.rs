//! The `ApplicationStore` trait, the persistence boundary.
//!
//! The trait is implemented by storage backends (e.g. `soknad-store-sqlite`).
//! The orchestration layer and the API depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  application::{Application, FormAnswers},
  mediator::NeedMessage,
};

/// Abstraction over an application store backend.
///
/// A backend must round-trip the activity log losslessly: severity, message,
/// timestamp, context stack and need details.
///
/// Need messages go through an outbox: [`save`](Self::save) stores them in
/// the same unit of work as the application, and they stay pending until
/// [`mark_published`](Self::mark_published) removes them.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ApplicationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Retrieve an application by id. Returns `None` if not found.
  fn load(
    &self,
    application_id: Uuid,
  ) -> impl Future<Output = Result<Option<Application>, Self::Error>> + Send + '_;

  /// The owner's application in the `being_created` state, if any. There is
  /// at most one.
  fn find_being_created<'a>(
    &'a self,
    ident: &'a str,
  ) -> impl Future<Output = Result<Option<Application>, Self::Error>> + Send + 'a;

  /// Every application the owner has, newest first.
  fn list_for_owner<'a>(
    &'a self,
    ident: &'a str,
  ) -> impl Future<Output = Result<Vec<Application>, Self::Error>> + Send + 'a;

  /// Insert or update an application together with its activity log and
  /// form-answer projection, and queue `outbox` as pending. Either all of it
  /// is written or none of it is. A message id that is already pending is
  /// not queued twice.
  fn save<'a>(
    &'a self,
    application: &'a Application,
    outbox: &'a [NeedMessage],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Messages queued under partition `key` and not yet published, oldest
  /// first.
  fn pending_messages<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Vec<NeedMessage>, Self::Error>> + Send + 'a;

  /// Drop published messages from the outbox. Unknown ids are ignored.
  fn mark_published<'a>(
    &'a self,
    message_ids: &'a [String],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The form-answer projection of an application, provided it is at least
  /// `min_version`. Returns `None` if missing or older.
  fn form_answers(
    &self,
    application_id: Uuid,
    min_version: Option<u64>,
  ) -> impl Future<Output = Result<Option<FormAnswers>, Self::Error>> + Send + '_;
}
