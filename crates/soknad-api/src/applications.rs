//! Handlers for `/applications` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/applications/:id` | 404 if not found |
//! | `GET`  | `/applications/:id/requirements` | Optional `?status=active\|inactive` |
//! | `GET`  | `/applications/:id/answers` | Optional `?min_version=N`; 404 if missing or older |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use soknad_core::{
  application::{Application, ApplicationState, FormAnswers, ProcessVersion},
  requirement::{Requirement, RequirementStatus},
  store::ApplicationStore,
  submission::Submission,
};
use soknad_mediator::NeedPublisher;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── View ─────────────────────────────────────────────────────────────────────

/// The read-side shape of an application. The activity log is summarised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationView {
  pub id:              Uuid,
  pub ident:           String,
  pub language:        String,
  pub state:           ApplicationState,
  pub created_at:      DateTime<Utc>,
  pub submitted_at:    Option<DateTime<Utc>>,
  pub process_version: Option<ProcessVersion>,
  pub requirements:    Vec<Requirement>,
  /// The original submission first, then follow-ups in order.
  pub submissions:     Vec<Submission>,
  pub activities:      usize,
}

impl From<Application> for ApplicationView {
  fn from(application: Application) -> Self {
    let submissions = application
      .submission
      .as_ref()
      .map(|s| s.all().cloned().collect())
      .unwrap_or_default();
    Self {
      id:              application.id,
      ident:           application.ident,
      language:        application.language,
      state:           application.state,
      created_at:      application.created_at,
      submitted_at:    application.submitted_at,
      process_version: application.process_version,
      requirements:    application.requirements.all().to_vec(),
      submissions,
      activities:      application.activity_log.len(),
    }
  }
}

async fn load<S, P>(mediator: &AppState<S, P>, id: Uuid) -> Result<Application, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  mediator
    .store()
    .load(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("application {id} not found")))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /applications/:id`
pub async fn get_one<S, P>(
  State(mediator): State<AppState<S, P>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ApplicationView>, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  Ok(Json(load(&mediator, id).await?.into()))
}

// ─── Requirements ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RequirementParams {
  pub status: Option<RequirementStatus>,
}

/// `GET /applications/:id/requirements[?status=<status>]`
pub async fn requirements<S, P>(
  State(mediator): State<AppState<S, P>>,
  Path(id): Path<Uuid>,
  Query(params): Query<RequirementParams>,
) -> Result<Json<Vec<Requirement>>, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  let application = load(&mediator, id).await?;
  let requirements = application
    .requirements
    .all()
    .iter()
    .filter(|r| params.status.is_none_or(|status| r.status == status))
    .cloned()
    .collect();
  Ok(Json(requirements))
}

// ─── Answers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnswerParams {
  pub min_version: Option<u64>,
}

/// `GET /applications/:id/answers[?min_version=<n>]`
pub async fn answers<S, P>(
  State(mediator): State<AppState<S, P>>,
  Path(id): Path<Uuid>,
  Query(params): Query<AnswerParams>,
) -> Result<Json<FormAnswers>, ApiError>
where
  S: ApplicationStore,
  P: NeedPublisher,
{
  let answers = mediator
    .store()
    .form_answers(id, params.min_version)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("no answers for application {id}")))?;
  Ok(Json(answers))
}
