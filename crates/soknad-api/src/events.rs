//! Handler for `POST /events`.
//!
//! The body is one event envelope; the response lists what it produced.

use axum::{Json, extract::State};
use soknad_core::{event::Event, store::ApplicationStore};
use soknad_mediator::{NeedPublisher, Outcome};

use crate::{AppState, error::ApiError};

/// `POST /events`
pub async fn submit<S, P>(
  State(mediator): State<AppState<S, P>>,
  Json(event): Json<Event>,
) -> Result<Json<Outcome>, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  Ok(Json(mediator.handle(event).await?))
}
