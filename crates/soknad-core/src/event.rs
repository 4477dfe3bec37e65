//! Inbound domain events.
//!
//! Every event that reaches the core arrives wrapped in an [`Event`]
//! envelope naming the owner and, once known, the application it concerns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::{
  activity::{ContextFrame, ContextStack, Contextual},
  application::ProcessVersion,
  requirement::{Choice, File, Probabilization},
  submission::{Metadata, Rendition},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
  // ── Application ─────────────────────────────────────────────────────────
  NewApplicationWanted {
    language: String,
  },
  ApplicationCreated {
    process_version: ProcessVersion,
  },
  FormAnswerUpdated {
    version:          u64,
    answers:          Value,
    #[serde(default)]
    probabilizations: Vec<Probabilization>,
  },
  ApplicantFinishedForm,
  ExplicitDelete,

  // ── Submission ──────────────────────────────────────────────────────────
  NewSubmissionRequested {
    submission_id: Uuid,
  },
  SubmissionMetadataReceived {
    submission_id: Uuid,
    metadata:      Metadata,
  },
  ArchivableRenditionReceived {
    submission_id: Uuid,
    renditions:    Vec<Rendition>,
  },
  SubmissionProvisionallyRegistered {
    submission_id: Uuid,
    case_file_id:  String,
  },
  SubmissionFinallyRegistered {
    case_file_id: String,
  },

  // ── Document requirements ───────────────────────────────────────────────
  AttachFile {
    requirement_id: String,
    file:           File,
  },
  RemoveFile {
    requirement_id: String,
    urn:            String,
  },
  SetAnswer {
    requirement_id: String,
    choice:         Choice,
    justification:  Option<String>,
  },
  SetBundleReference {
    requirement_id: String,
    bundle_urn:     String,
  },
}

impl EventKind {
  /// The submission an event addresses by id, if any.
  pub fn submission_id(&self) -> Option<Uuid> {
    match self {
      Self::NewSubmissionRequested { submission_id }
      | Self::SubmissionMetadataReceived { submission_id, .. }
      | Self::ArchivableRenditionReceived { submission_id, .. }
      | Self::SubmissionProvisionallyRegistered { submission_id, .. } => {
        Some(*submission_id)
      }
      _ => None,
    }
  }

  pub fn is_submission_event(&self) -> bool {
    self.submission_id().is_some()
      || matches!(self, Self::SubmissionFinallyRegistered { .. })
  }

  pub fn is_requirement_command(&self) -> bool {
    matches!(
      self,
      Self::AttachFile { .. }
        | Self::RemoveFile { .. }
        | Self::SetAnswer { .. }
        | Self::SetBundleReference { .. }
    )
  }
}

/// The envelope around one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(default = "Uuid::new_v4")]
  pub event_id:       Uuid,
  /// The owner's identity; also the partition key for outbound messages.
  pub ident:          String,
  /// Absent only on [`EventKind::NewApplicationWanted`].
  #[serde(default)]
  pub application_id: Option<Uuid>,
  #[serde(default = "Utc::now")]
  pub occurred_at:    DateTime<Utc>,
  pub kind:           EventKind,
}

impl Event {
  pub fn new(
    ident: impl Into<String>,
    application_id: Option<Uuid>,
    kind: EventKind,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      ident: ident.into(),
      application_id,
      occurred_at: Utc::now(),
      kind,
    }
  }

  pub fn name(&self) -> &'static str { (&self.kind).into() }

  /// The outermost context every activity raised for this event carries.
  pub fn contexts(&self) -> ContextStack { ContextStack::new().enter(self) }
}

impl Contextual for Event {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("person").with("ident", &self.ident)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn events_are_named_in_snake_case() {
    let event = Event::new("1", None, EventKind::ApplicantFinishedForm);
    assert_eq!(event.name(), "applicant_finished_form");
  }

  #[test]
  fn envelope_fills_in_id_and_timestamp() {
    let event: Event = serde_json::from_value(serde_json::json!({
      "ident": "12345678901",
      "kind": { "type": "new_application_wanted", "language": "nb" }
    }))
    .unwrap();

    assert_eq!(event.application_id, None);
    assert_eq!(
      event.kind,
      EventKind::NewApplicationWanted { language: "nb".into() }
    );
  }

  #[test]
  fn submission_events_are_recognised() {
    let id = Uuid::new_v4();
    assert_eq!(
      EventKind::NewSubmissionRequested { submission_id: id }.submission_id(),
      Some(id)
    );
    assert!(
      EventKind::SubmissionFinallyRegistered { case_file_id: "1".into() }
        .is_submission_event()
    );
    assert!(!EventKind::ExplicitDelete.is_submission_event());
    assert!(
      EventKind::RemoveFile { requirement_id: "1".into(), urn: "u".into() }
        .is_requirement_command()
    );
  }
}
