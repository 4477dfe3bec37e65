//! Submissions ("innsending"): the archiving pipeline of an application.
//!
//! A [`Submission`] walks one pipeline: metadata → archivable rendering →
//! provisional registration → final registration. A [`NewSubmission`] holds
//! the original submission plus any supplementary follow-ups; each follow-up
//! advances through its own copy of the state machine while sharing the
//! parent's metadata and observers.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  activity::{ActivityLog, ContextFrame, ContextStack, Contextual, NeedKind},
  event::{Event, EventKind},
};

// ─── Documents ───────────────────────────────────────────────────────────────

/// Which rendering of a document a rendition is.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenditionKind {
  /// Only the questions the applicant actually answered.
  Net,
  /// The complete form, including unanswered questions.
  Gross,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
  pub filename:   String,
  /// Content-addressed reference to the stored file.
  pub urn:        String,
  pub kind:       RenditionKind,
  pub media_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
  pub name:       String,
  pub form_code:  Option<String>,
  pub renditions: Vec<Rendition>,
}

/// Classification of a submission, supplied from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
  pub form_code: String,
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionKind {
  Original,
  Supplementary,
}

/// Pipeline states, in order; `Archived` is terminal.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionState {
  Created,
  AwaitingMetadata,
  AwaitingArchivableRendition,
  AwaitingProvisionalRegistration,
  AwaitingFinalRegistration,
  Archived,
}

impl Contextual for SubmissionState {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("state").with("state", self)
  }
}

impl SubmissionState {
  /// Apply `event` in this state. Returns the state to move to, if any.
  fn handle(
    self,
    submission: &mut Submission,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Option<SubmissionState> {
    use EventKind as E;
    use SubmissionState as S;

    match (self, &event.kind) {
      (S::Created, E::NewSubmissionRequested { .. }) => Some(S::AwaitingMetadata),

      (S::AwaitingMetadata, E::SubmissionMetadataReceived { metadata, .. }) => {
        submission.metadata = Some(metadata.clone());
        Some(S::AwaitingArchivableRendition)
      }

      (
        S::AwaitingArchivableRendition,
        E::ArchivableRenditionReceived { renditions, .. },
      ) => {
        if renditions.is_empty() {
          log.error(contexts, "archivable copy arrived without renditions");
          return None;
        }
        submission.main_document = Some(Document {
          name:       "application".to_owned(),
          form_code:  submission.form_code().map(str::to_owned),
          renditions: renditions.clone(),
        });
        Some(S::AwaitingProvisionalRegistration)
      }

      (
        S::AwaitingProvisionalRegistration,
        E::SubmissionProvisionallyRegistered { case_file_id, .. },
      ) => {
        submission.case_file_id = Some(case_file_id.clone());
        Some(S::AwaitingFinalRegistration)
      }

      (
        S::AwaitingFinalRegistration,
        E::SubmissionFinallyRegistered { case_file_id },
      ) => {
        if submission.case_file_id.as_deref() == Some(case_file_id.as_str()) {
          Some(S::Archived)
        } else {
          log.warn(
            contexts,
            format!(
              "case file {case_file_id} does not match {}",
              submission.case_file_id.as_deref().unwrap_or("<none>")
            ),
          );
          None
        }
      }

      (state, _) => {
        log.warn(
          contexts,
          format!("cannot handle {} in state {state}", event.name()),
        );
        None
      }
    }
  }

  /// Entry action. May return a state to skip ahead to.
  fn entering(
    self,
    submission: &Submission,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<Option<SubmissionState>> {
    use SubmissionState as S;

    match self {
      S::AwaitingMetadata => {
        if submission.metadata.is_some() {
          return Ok(Some(S::AwaitingArchivableRendition));
        }
        let mut details = Map::new();
        details.insert("submission_kind".into(), json!(submission.kind));
        log.needed(
          contexts,
          NeedKind::ClassifySubmission,
          "need metadata to classify the submission",
          details,
        );
      }
      S::AwaitingArchivableRendition => {
        let mut details = Map::new();
        details.insert("requirement_ids".into(), json!(submission.requirement_ids));
        details.insert("form_code".into(), json!(submission.form_code()));
        log.needed(
          contexts,
          NeedKind::RenderArchivableCopy,
          "need an archivable copy of the application",
          details,
        );
      }
      S::AwaitingProvisionalRegistration => {
        let mut details = Map::new();
        details.insert(
          "main_document".into(),
          serde_json::to_value(&submission.main_document)?,
        );
        details.insert(
          "supporting_documents".into(),
          serde_json::to_value(&submission.supporting_documents)?,
        );
        details.insert("form_code".into(), json!(submission.form_code()));
        details.insert("submission_kind".into(), json!(submission.kind));
        log.needed(
          contexts,
          NeedKind::RegisterCaseFile,
          "need a case file for the submission",
          details,
        );
      }
      S::Created | S::AwaitingFinalRegistration | S::Archived => {}
    }
    Ok(None)
  }
}

// ─── Observers ───────────────────────────────────────────────────────────────

/// Emitted on every actual state change of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
  pub submission_id: Uuid,
  pub kind:          SubmissionKind,
  pub state:         SubmissionState,
  pub previous:      SubmissionState,
}

/// Receives submission state changes, e.g. for metrics or audit.
pub trait SubmissionObserver: Send + Sync + fmt::Debug {
  fn state_changed(&self, change: &StateChange);
}

pub type ObserverHandle = Arc<dyn SubmissionObserver>;

// ─── Submission ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
  pub id:                   Uuid,
  pub application_id:       Uuid,
  pub ident:                String,
  pub kind:                 SubmissionKind,
  pub created_at:           DateTime<Utc>,
  pub state:                SubmissionState,
  pub case_file_id:         Option<String>,
  pub metadata:             Option<Metadata>,
  pub main_document:        Option<Document>,
  #[serde(default)]
  pub supporting_documents: Vec<Document>,
  /// Requirements whose documents travel with this submission.
  #[serde(default)]
  pub requirement_ids:      Vec<String>,
}

impl Contextual for Submission {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("submission")
      .with("submission_id", self.id)
      .with("submission_kind", self.kind)
  }
}

impl Submission {
  pub fn new(
    application_id: Uuid,
    ident: impl Into<String>,
    kind: SubmissionKind,
    created_at: DateTime<Utc>,
    requirement_ids: Vec<String>,
    supporting_documents: Vec<Document>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      application_id,
      ident: ident.into(),
      kind,
      created_at,
      state: SubmissionState::Created,
      case_file_id: None,
      metadata: None,
      main_document: None,
      supporting_documents,
      requirement_ids,
    }
  }

  pub fn form_code(&self) -> Option<&str> {
    self.metadata.as_ref().map(|m| m.form_code.as_str())
  }

  pub fn is_archived(&self) -> bool { self.state == SubmissionState::Archived }

  /// Apply one event. Events the current state does not accept are recorded
  /// as warnings and change nothing.
  pub fn handle(
    &mut self,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
    observers: &[ObserverHandle],
  ) -> Result<()> {
    let contexts = contexts.enter(self);
    let state = self.state;
    if let Some(next) = state.handle(self, event, &contexts.enter(&state), log) {
      self.transition(next, &contexts, log, observers)?;
    }
    Ok(())
  }

  fn transition(
    &mut self,
    next: SubmissionState,
    contexts: &ContextStack,
    log: &mut ActivityLog,
    observers: &[ObserverHandle],
  ) -> Result<()> {
    let mut next = next;
    loop {
      if next == self.state {
        return Ok(());
      }
      let previous = std::mem::replace(&mut self.state, next);
      log.info(contexts, format!("moved from {previous} to {next}"));

      let change = StateChange {
        submission_id: self.id,
        kind: self.kind,
        state: next,
        previous,
      };
      for observer in observers {
        observer.state_changed(&change);
      }

      match next.entering(self, &contexts.enter(&next), log)? {
        Some(skip) => next = skip,
        None => return Ok(()),
      }
    }
  }
}

// ─── NewSubmission ───────────────────────────────────────────────────────────

/// The original submission of an application plus its supplementary
/// follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
  pub original:  Submission,
  #[serde(default)]
  pub followups: Vec<Submission>,
  #[serde(skip)]
  observers:     Vec<ObserverHandle>,
}

impl NewSubmission {
  pub fn new(original: Submission) -> Self {
    Self { original, followups: Vec::new(), observers: Vec::new() }
  }

  pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
    self.observers.push(observer);
    self
  }

  pub fn with_observers(
    mut self,
    observers: impl IntoIterator<Item = ObserverHandle>,
  ) -> Self {
    self.observers.extend(observers);
    self
  }

  pub fn observers(&self) -> &[ObserverHandle] { &self.observers }

  pub fn all(&self) -> impl Iterator<Item = &Submission> {
    std::iter::once(&self.original).chain(self.followups.iter())
  }

  pub fn get(&self, id: Uuid) -> Option<&Submission> { self.all().find(|s| s.id == id) }

  /// Kick off the original submission.
  pub fn start(
    &mut self,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let started = Event {
      kind: EventKind::NewSubmissionRequested { submission_id: self.original.id },
      ..event.clone()
    };
    self.original.handle(&started, contexts, log, &self.observers)
  }

  /// Add a supplementary follow-up and start it. The follow-up inherits the
  /// original's metadata, so it skips classification when that is known.
  pub fn add_followup(
    &mut self,
    mut followup: Submission,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    if followup.metadata.is_none() {
      followup.metadata = self.original.metadata.clone();
    }
    let started = Event {
      kind: EventKind::NewSubmissionRequested { submission_id: followup.id },
      ..event.clone()
    };
    followup.handle(&started, contexts, log, &self.observers)?;
    self.followups.push(followup);
    Ok(())
  }

  /// Route a submission event to the submissions it concerns: by submission
  /// id, or by case-file id for the final registration.
  pub fn handle(
    &mut self,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let observers = &self.observers;
    let submissions =
      std::iter::once(&mut self.original).chain(self.followups.iter_mut());

    match &event.kind {
      EventKind::SubmissionFinallyRegistered { case_file_id } => {
        let mut matched = false;
        for submission in submissions
          .filter(|s| s.case_file_id.as_deref() == Some(case_file_id.as_str()))
        {
          matched = true;
          submission.handle(event, contexts, log, observers)?;
        }
        if !matched {
          log.warn(
            contexts,
            format!("no submission is registered under case file {case_file_id}"),
          );
        }
      }
      kind => match kind.submission_id() {
        Some(id) => {
          let mut matched = false;
          for submission in submissions.filter(|s| s.id == id) {
            matched = true;
            submission.handle(event, contexts, log, observers)?;
          }
          if !matched {
            log.warn(contexts, format!("no submission with id {id}"));
          }
        }
        None => log.warn(
          contexts,
          format!("{} is not a submission event", event.name()),
        ),
      },
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::activity::Severity;

  #[derive(Debug, Default)]
  struct Recorder(Mutex<Vec<StateChange>>);

  impl SubmissionObserver for Recorder {
    fn state_changed(&self, change: &StateChange) {
      self.0.lock().unwrap().push(change.clone());
    }
  }

  fn event(kind: EventKind) -> Event {
    Event::new("12345678901", Some(Uuid::nil()), kind)
  }

  fn contexts() -> ContextStack {
    ContextStack::new().push(ContextFrame::new("person").with("ident", "12345678901"))
  }

  fn submission() -> Submission {
    Submission::new(
      Uuid::nil(),
      "12345678901",
      SubmissionKind::Original,
      Utc::now(),
      vec!["krav-1".into()],
      Vec::new(),
    )
  }

  fn renditions() -> Vec<Rendition> {
    vec![
      Rendition {
        filename:   "netto.pdf".into(),
        urn:        "urn:vedlegg:netto".into(),
        kind:       RenditionKind::Net,
        media_type: "application/pdf".into(),
      },
      Rendition {
        filename:   "brutto.pdf".into(),
        urn:        "urn:vedlegg:brutto".into(),
        kind:       RenditionKind::Gross,
        media_type: "application/pdf".into(),
      },
    ]
  }

  fn pipeline(id: Uuid) -> Vec<EventKind> {
    vec![
      EventKind::NewSubmissionRequested { submission_id: id },
      EventKind::SubmissionMetadataReceived {
        submission_id: id,
        metadata:      Metadata { form_code: "04-01.03".into() },
      },
      EventKind::ArchivableRenditionReceived {
        submission_id: id,
        renditions:    renditions(),
      },
      EventKind::SubmissionProvisionallyRegistered {
        submission_id: id,
        case_file_id:  "jp-1".into(),
      },
      EventKind::SubmissionFinallyRegistered { case_file_id: "jp-1".into() },
    ]
  }

  #[test]
  fn pipeline_order_ends_archived_with_each_need_once() {
    let recorder = Arc::new(Recorder::default());
    let observers: Vec<ObserverHandle> = vec![recorder.clone()];
    let mut s = submission();
    let mut log = ActivityLog::new();

    for kind in pipeline(s.id) {
      s.handle(&event(kind), &contexts(), &mut log, &observers).unwrap();
    }

    assert!(s.is_archived());
    assert!(!log.has_warnings());

    let kinds: Vec<NeedKind> = log.needs().map(|(_, n)| n.kind).collect();
    assert_eq!(
      kinds,
      [
        NeedKind::ClassifySubmission,
        NeedKind::RenderArchivableCopy,
        NeedKind::RegisterCaseFile,
      ]
    );

    let states: Vec<SubmissionState> =
      recorder.0.lock().unwrap().iter().map(|c| c.state).collect();
    assert_eq!(
      states,
      [
        SubmissionState::AwaitingMetadata,
        SubmissionState::AwaitingArchivableRendition,
        SubmissionState::AwaitingProvisionalRegistration,
        SubmissionState::AwaitingFinalRegistration,
        SubmissionState::Archived,
      ]
    );
  }

  #[test]
  fn skipping_a_step_warns_and_keeps_the_state() {
    let mut s = submission();
    let mut log = ActivityLog::new();
    let steps = pipeline(s.id);

    s.handle(&event(steps[0].clone()), &contexts(), &mut log, &[]).unwrap();
    for skipped in &steps[2..] {
      s.handle(&event(skipped.clone()), &contexts(), &mut log, &[]).unwrap();
      assert_eq!(s.state, SubmissionState::AwaitingMetadata);
    }
    assert_eq!(log.warnings().count(), 3);
  }

  #[test]
  fn first_need_without_metadata_is_classification() {
    let mut s = submission();
    let mut log = ActivityLog::new();
    s.handle(&event(pipeline(s.id).remove(0)), &contexts(), &mut log, &[])
      .unwrap();

    let (activity, need) = log.needs().next().unwrap();
    assert_eq!(need.kind, NeedKind::ClassifySubmission);
    assert_eq!(
      activity.contexts.key().get("state").map(String::as_str),
      Some("awaiting_metadata")
    );
  }

  #[test]
  fn known_metadata_skips_straight_to_rendering() {
    let recorder = Arc::new(Recorder::default());
    let observers: Vec<ObserverHandle> = vec![recorder.clone()];
    let mut s = submission();
    s.metadata = Some(Metadata { form_code: "04-01.03".into() });
    let mut log = ActivityLog::new();

    s.handle(&event(pipeline(s.id).remove(0)), &contexts(), &mut log, &observers)
      .unwrap();

    assert_eq!(s.state, SubmissionState::AwaitingArchivableRendition);
    let kinds: Vec<NeedKind> = log.needs().map(|(_, n)| n.kind).collect();
    assert_eq!(kinds, [NeedKind::RenderArchivableCopy]);
    assert_eq!(recorder.0.lock().unwrap().len(), 2);
  }

  #[test]
  fn metadata_leads_to_render_need_with_ids_and_form_code() {
    let mut s = submission();
    let mut log = ActivityLog::new();
    for kind in pipeline(s.id).into_iter().take(2) {
      s.handle(&event(kind), &contexts(), &mut log, &[]).unwrap();
    }

    let (_, need) = log.needs().last().unwrap();
    assert_eq!(need.kind, NeedKind::RenderArchivableCopy);
    assert_eq!(need.details["requirement_ids"], json!(["krav-1"]));
    assert_eq!(need.details["form_code"], json!("04-01.03"));
  }

  #[test]
  fn two_renditions_produce_a_main_document_and_register_need() {
    let mut s = submission();
    s.supporting_documents.push(Document {
      name:       "krav-1".into(),
      form_code:  None,
      renditions: renditions()[..1].to_vec(),
    });
    let mut log = ActivityLog::new();
    for kind in pipeline(s.id).into_iter().take(3) {
      s.handle(&event(kind), &contexts(), &mut log, &[]).unwrap();
    }

    assert_eq!(s.state, SubmissionState::AwaitingProvisionalRegistration);
    assert_eq!(s.main_document.as_ref().unwrap().renditions.len(), 2);

    let (_, need) = log.needs().last().unwrap();
    assert_eq!(need.kind, NeedKind::RegisterCaseFile);
    assert_eq!(need.details["main_document"]["name"], json!("application"));
    assert_eq!(
      need.details["supporting_documents"].as_array().unwrap().len(),
      1
    );
  }

  #[test]
  fn empty_rendition_list_is_an_error() {
    let mut s = submission();
    let mut log = ActivityLog::new();
    for kind in pipeline(s.id).into_iter().take(2) {
      s.handle(&event(kind), &contexts(), &mut log, &[]).unwrap();
    }
    s.handle(
      &event(EventKind::ArchivableRenditionReceived {
        submission_id: s.id,
        renditions:    Vec::new(),
      }),
      &contexts(),
      &mut log,
      &[],
    )
    .unwrap();

    assert!(log.has_errors());
    assert_eq!(s.state, SubmissionState::AwaitingArchivableRendition);
  }

  #[test]
  fn mismatching_case_file_is_ignored() {
    let mut s = submission();
    let mut log = ActivityLog::new();
    for kind in pipeline(s.id).into_iter().take(4) {
      s.handle(&event(kind), &contexts(), &mut log, &[]).unwrap();
    }
    s.handle(
      &event(EventKind::SubmissionFinallyRegistered { case_file_id: "jp-2".into() }),
      &contexts(),
      &mut log,
      &[],
    )
    .unwrap();

    assert_eq!(s.state, SubmissionState::AwaitingFinalRegistration);
    assert_eq!(log.warnings().count(), 1);
  }

  #[test]
  fn composite_routes_by_id_and_case_file() {
    let recorder = Arc::new(Recorder::default());
    let original = submission();
    let original_id = original.id;
    let mut composite = NewSubmission::new(original).with_observer(recorder.clone());
    let mut log = ActivityLog::new();
    let trigger = event(EventKind::ApplicantFinishedForm);

    composite.start(&trigger, &contexts(), &mut log).unwrap();
    for kind in pipeline(original_id).into_iter().skip(1).take(3) {
      composite.handle(&event(kind), &contexts(), &mut log).unwrap();
    }

    let followup = Submission::new(
      Uuid::nil(),
      "12345678901",
      SubmissionKind::Supplementary,
      Utc::now(),
      vec!["krav-2".into()],
      Vec::new(),
    );
    let followup_id = followup.id;
    composite
      .add_followup(followup, &trigger, &contexts(), &mut log)
      .unwrap();

    let f = composite.get(followup_id).unwrap();
    assert_eq!(f.state, SubmissionState::AwaitingArchivableRendition);
    assert_eq!(f.form_code(), Some("04-01.03"));

    composite
      .handle(
        &event(EventKind::SubmissionFinallyRegistered { case_file_id: "jp-1".into() }),
        &contexts(),
        &mut log,
      )
      .unwrap();
    assert!(composite.original.is_archived());
    assert_eq!(
      composite.get(followup_id).unwrap().state,
      SubmissionState::AwaitingArchivableRendition
    );

    // observers are shared with the follow-up
    assert!(
      recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.submission_id == followup_id)
    );
  }

  #[test]
  fn composite_warns_on_unknown_targets() {
    let mut composite = NewSubmission::new(submission());
    let mut log = ActivityLog::new();
    composite
      .handle(
        &event(EventKind::SubmissionFinallyRegistered { case_file_id: "nope".into() }),
        &contexts(),
        &mut log,
      )
      .unwrap();
    composite
      .handle(
        &event(EventKind::NewSubmissionRequested { submission_id: Uuid::new_v4() }),
        &contexts(),
        &mut log,
      )
      .unwrap();

    assert_eq!(log.warnings().count(), 2);
    assert!(log.activities().iter().all(|a| a.severity == Severity::Warn));
  }
}
