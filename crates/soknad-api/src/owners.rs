//! Handler for `GET /owners/:ident/applications`.

use axum::{
  Json,
  extract::{Path, State},
};
use soknad_core::store::ApplicationStore;
use soknad_mediator::NeedPublisher;

use crate::{AppState, applications::ApplicationView, error::ApiError};

/// `GET /owners/:ident/applications`, newest first.
pub async fn applications<S, P>(
  State(mediator): State<AppState<S, P>>,
  Path(ident): Path<String>,
) -> Result<Json<Vec<ApplicationView>>, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  let applications = mediator
    .store()
    .list_for_owner(&ident)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(applications.into_iter().map(ApplicationView::from).collect()))
}
