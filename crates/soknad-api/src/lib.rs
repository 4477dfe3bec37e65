//! JSON REST API for the application workflow.
//!
//! Exposes an axum [`Router`] backed by a [`Mediator`] over any
//! [`soknad_core::store::ApplicationStore`]. Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", soknad_api::api_router(mediator.clone()))
//! ```

pub mod applications;
pub mod client;
pub mod error;
pub mod events;
pub mod owners;
pub mod retry;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use soknad_core::store::ApplicationStore;
use soknad_mediator::{Mediator, NeedPublisher};

pub use error::ApiError;

/// Shared handler state.
pub type AppState<S, P> = Arc<Mediator<S, P>>;

/// Build a fully-materialised API router around `mediator`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, P>(mediator: AppState<S, P>) -> Router<()>
where
  S: ApplicationStore + 'static,
  P: NeedPublisher + 'static,
{
  Router::new()
    // Inbound events
    .route("/events", post(events::submit::<S, P>))
    // Applications
    .route("/applications/{id}", get(applications::get_one::<S, P>))
    .route(
      "/applications/{id}/requirements",
      get(applications::requirements::<S, P>),
    )
    .route("/applications/{id}/answers", get(applications::answers::<S, P>))
    // Owners
    .route("/owners/{ident}/applications", get(owners::applications::<S, P>))
    .with_state(mediator)
}

#[cfg(test)]
mod tests;
