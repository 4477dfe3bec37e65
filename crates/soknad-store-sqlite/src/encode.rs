//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, which keeps sub-second
//! precision. Enums are stored as their snake_case names. Structured fields
//! (context stacks, need details, the aggregate body) are stored as compact
//! JSON. UUIDs are stored as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use soknad_core::{
  activity::{Activity, ContextStack, Need, NeedKind, Severity},
  application::{Application, FormAnswers},
  mediator::NeedMessage,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ────────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::UnknownValue { column, value: s.to_owned() })
}

// ─── Application ─────────────────────────────────────────────────────────────

/// An application ready to be written: queried columns plus the JSON body.
pub struct EncodedApplication {
  pub application_id: String,
  pub ident:          String,
  pub state:          String,
  pub created_at:     String,
  pub body:           String,
  pub activities:     Vec<RawActivity>,
  pub form_answers:   Option<RawFormAnswers>,
}

pub fn encode_application(application: &Application) -> Result<EncodedApplication> {
  let mut body = serde_json::to_value(application)?;
  if let Value::Object(map) = &mut body {
    map.remove("activity_log");
    map.remove("form");
  }

  let activities = application
    .activity_log
    .activities()
    .iter()
    .enumerate()
    .map(|(seq, activity)| encode_activity(seq as i64, activity))
    .collect::<Result<_>>()?;

  Ok(EncodedApplication {
    application_id: encode_uuid(application.id),
    ident:          application.ident.clone(),
    state:          application.state.as_ref().to_owned(),
    created_at:     encode_dt(application.created_at),
    body:           body.to_string(),
    activities,
    form_answers:   application.form.as_ref().map(encode_form_answers).transpose()?,
  })
}

/// Raw strings read directly from an `applications` row, plus its activity
/// and form-answer rows.
pub struct RawApplication {
  pub body:         String,
  pub activities:   Vec<RawActivity>,
  pub form_answers: Option<RawFormAnswers>,
}

impl RawApplication {
  pub fn into_application(self) -> Result<Application> {
    let mut application: Application = serde_json::from_str(&self.body)?;

    let activities = self
      .activities
      .into_iter()
      .map(RawActivity::into_activity)
      .collect::<Result<Vec<_>>>()?;
    application.activity_log =
      soknad_core::activity::ActivityLog::from_activities(activities);

    application.form = self
      .form_answers
      .map(RawFormAnswers::into_form_answers)
      .transpose()?;

    Ok(application)
  }
}

// ─── Activity ────────────────────────────────────────────────────────────────

/// Raw strings read directly from an `activities` row.
pub struct RawActivity {
  pub seq:          i64,
  pub severity:     String,
  pub message:      String,
  pub recorded_at:  String,
  pub contexts:     String,
  pub need_kind:    Option<String>,
  pub need_details: Option<String>,
}

pub fn encode_activity(seq: i64, activity: &Activity) -> Result<RawActivity> {
  let (need_kind, need_details) = match &activity.need {
    Some(need) => (
      Some(need.kind.as_ref().to_owned()),
      Some(serde_json::to_string(&need.details)?),
    ),
    None => (None, None),
  };

  Ok(RawActivity {
    seq,
    severity: activity.severity.as_ref().to_owned(),
    message: activity.message.clone(),
    recorded_at: encode_dt(activity.recorded_at),
    contexts: serde_json::to_string(&activity.contexts)?,
    need_kind,
    need_details,
  })
}

impl RawActivity {
  pub fn into_activity(self) -> Result<Activity> {
    let severity: Severity = decode_enum("severity", &self.severity)?;
    let contexts: ContextStack = serde_json::from_str(&self.contexts)?;

    let need = match self.need_kind {
      Some(kind) => {
        let kind: NeedKind = decode_enum("need_kind", &kind)?;
        let details = match self.need_details {
          Some(json) => serde_json::from_str(&json)?,
          None => serde_json::Map::new(),
        };
        Some(Need { kind, details })
      }
      None => None,
    };

    Ok(Activity {
      severity,
      message: self.message,
      recorded_at: decode_dt(&self.recorded_at)?,
      contexts,
      need,
    })
  }
}

// ─── Form answers ────────────────────────────────────────────────────────────

/// Raw strings read directly from a `form_answers` row.
pub struct RawFormAnswers {
  pub application_id: String,
  pub version:        i64,
  pub answers:        String,
  pub updated_at:     String,
}

pub fn encode_form_answers(form: &FormAnswers) -> Result<RawFormAnswers> {
  let version = i64::try_from(form.version).map_err(|_| Error::OutOfRange {
    column: "version",
    value:  form.version.to_string(),
  })?;
  Ok(RawFormAnswers {
    application_id: encode_uuid(form.application_id),
    version,
    answers:        form.answers.to_string(),
    updated_at:     encode_dt(form.updated_at),
  })
}

impl RawFormAnswers {
  pub fn into_form_answers(self) -> Result<FormAnswers> {
    let version = u64::try_from(self.version).map_err(|_| Error::OutOfRange {
      column: "version",
      value:  self.version.to_string(),
    })?;
    Ok(FormAnswers {
      application_id: decode_uuid(&self.application_id)?,
      version,
      answers:        serde_json::from_str(&self.answers)?,
      updated_at:     decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

/// A need message ready for the `pending_messages` table.
pub struct RawMessage {
  pub message_id: String,
  pub key:        String,
  pub body:       String,
}

pub fn encode_message(message: &NeedMessage) -> Result<RawMessage> {
  Ok(RawMessage {
    message_id: message.message_id.clone(),
    key:        message.key.clone(),
    body:       serde_json::to_string(message)?,
  })
}

pub fn decode_message(body: &str) -> Result<NeedMessage> { Ok(serde_json::from_str(body)?) }
