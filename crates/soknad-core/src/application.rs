//! The application ("søknad") aggregate and its fill-out lifecycle.
//!
//! The application owns its document requirements and, once the applicant
//! finishes the form, the [`NewSubmission`] that archives it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  activity::{ActivityLog, ContextFrame, ContextStack, Contextual, NeedKind},
  event::{Event, EventKind},
  requirement::{Probabilization, Requirements},
  submission::{NewSubmission, ObserverHandle, Submission, SubmissionKind},
};

// ─── Supporting types ────────────────────────────────────────────────────────

/// The form template version an application was built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessVersion {
  pub name:    String,
  pub version: u32,
}

/// The latest form-answer projection, as served to read-side clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormAnswers {
  pub application_id: Uuid,
  pub version:        u64,
  pub answers:        Value,
  pub updated_at:     DateTime<Utc>,
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
pub enum ApplicationState {
  BeingCreated,
  InProgress,
  Submitted,
  Archived,
  Deleted,
}

impl ApplicationState {
  /// No state transition leaves a terminal state, and an explicit delete is
  /// refused. `Archived` still takes work that does not change the state:
  /// supplementary follow-ups, requirement commands and the feedback for
  /// those follow-ups.
  pub fn is_terminal(self) -> bool { matches!(self, Self::Archived | Self::Deleted) }
}

impl Contextual for ApplicationState {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("state").with("state", self)
  }
}

impl ApplicationState {
  fn handle(
    self,
    application: &mut Application,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<Option<ApplicationState>> {
    use ApplicationState as S;
    use EventKind as E;

    let next = match (self, &event.kind) {
      (S::BeingCreated | S::InProgress | S::Submitted, E::ExplicitDelete) => {
        Some(S::Deleted)
      }

      (S::BeingCreated, E::NewApplicationWanted { .. }) => {
        log.info(contexts, "application is already being created");
        self.entering(application, event, contexts, log)?;
        None
      }

      (S::BeingCreated, E::ApplicationCreated { process_version }) => {
        application.process_version = Some(process_version.clone());
        Some(S::InProgress)
      }

      (
        S::InProgress,
        E::FormAnswerUpdated { version, answers, probabilizations },
      ) => {
        application.update_form(
          *version,
          answers,
          probabilizations,
          event.occurred_at,
          contexts,
          log,
        );
        None
      }

      (S::InProgress, E::ApplicantFinishedForm) => Some(S::Submitted),

      (S::Submitted | S::Archived, E::ApplicantFinishedForm) => {
        application.send_followup(event, contexts, log)?;
        None
      }

      (S::InProgress | S::Submitted | S::Archived, kind)
        if kind.is_requirement_command() =>
      {
        application.apply_requirement_command(kind, contexts, log)?;
        None
      }

      (S::Submitted | S::Archived, kind) if kind.is_submission_event() => {
        application.handle_submission_event(event, contexts, log)?;
        let archived = application
          .submission
          .as_ref()
          .is_some_and(|s| s.original.is_archived());
        (self == S::Submitted && archived).then_some(S::Archived)
      }

      (state, _) => {
        log.warn(
          contexts,
          format!("cannot handle {} in state {state}", event.name()),
        );
        None
      }
    };
    Ok(next)
  }

  fn entering(
    self,
    application: &mut Application,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    match self {
      Self::BeingCreated => {
        let mut details = Map::new();
        details.insert("language".into(), json!(application.language));
        log.needed(
          contexts,
          NeedKind::ProvisionEmptyApplication,
          "need an empty application",
          details,
        );
      }
      Self::Submitted => application.submit(event, log)?,
      Self::Archived => log.info(contexts, "original submission archived"),
      Self::Deleted => log.info(contexts, "application deleted"),
      Self::InProgress => {}
    }
    Ok(())
  }
}

// ─── Application ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
  pub id:              Uuid,
  pub ident:           String,
  pub language:        String,
  pub created_at:      DateTime<Utc>,
  pub state:           ApplicationState,
  pub process_version: Option<ProcessVersion>,
  #[serde(default)]
  pub requirements:    Requirements,
  pub submitted_at:    Option<DateTime<Utc>>,
  pub form:            Option<FormAnswers>,
  pub submission:      Option<NewSubmission>,
  /// Everything raised over the application's lifetime.
  #[serde(default)]
  pub activity_log:    ActivityLog,
  #[serde(skip)]
  observers:           Vec<ObserverHandle>,
}

impl Contextual for Application {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("application").with("application_id", self.id)
  }
}

impl Application {
  /// Create an application from a [`EventKind::NewApplicationWanted`] event
  /// and raise the need for an empty shell.
  pub fn create(event: &Event, log: &mut ActivityLog) -> Result<Self> {
    let EventKind::NewApplicationWanted { language } = &event.kind else {
      return Err(log.severe(
        &event.contexts(),
        format!("cannot create an application from {}", event.name()),
      ));
    };

    let mut application = Self {
      id:              Uuid::new_v4(),
      ident:           event.ident.clone(),
      language:        language.clone(),
      created_at:      event.occurred_at,
      state:           ApplicationState::BeingCreated,
      process_version: None,
      requirements:    Requirements::default(),
      submitted_at:    None,
      form:            None,
      submission:      None,
      activity_log:    ActivityLog::new(),
      observers:       Vec::new(),
    };

    let contexts = event.contexts().enter(&application);
    log.info(&contexts, "application created");
    let state = application.state;
    state.entering(&mut application, event, &contexts.enter(&state), log)?;
    Ok(application)
  }

  /// Attach an observer to every current and future submission.
  pub fn with_submission_observer(mut self, observer: ObserverHandle) -> Self {
    self.observers.push(observer.clone());
    self.submission = self.submission.map(|s| s.with_observer(observer));
    self
  }

  pub fn is_terminal(&self) -> bool { self.state.is_terminal() }

  /// Apply one inbound event.
  pub fn handle(&mut self, event: &Event, log: &mut ActivityLog) -> Result<()> {
    let contexts = event.contexts().enter(self);
    if event.application_id.is_some_and(|id| id != self.id) {
      return Err(log.severe(&contexts, "event addressed to another application"));
    }

    let state = self.state;
    if let Some(next) = state.handle(self, event, &contexts.enter(&state), log)? {
      self.transition(next, event, &contexts, log)?;
    }
    Ok(())
  }

  fn transition(
    &mut self,
    next: ApplicationState,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    if next == self.state {
      return Ok(());
    }
    let previous = std::mem::replace(&mut self.state, next);
    log.info(contexts, format!("moved from {previous} to {next}"));
    next.entering(self, event, &contexts.enter(&next), log)
  }

  fn update_form(
    &mut self,
    version: u64,
    answers: &Value,
    probabilizations: &[Probabilization],
    updated_at: DateTime<Utc>,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) {
    if let Some(current) = &self.form
      && version <= current.version
    {
      log.warn(
        contexts,
        format!("ignoring form version {version}; already at {}", current.version),
      );
      return;
    }

    self.requirements = self.requirements.reconcile(probabilizations);

    if !answers.is_object() {
      log.error(contexts, "form answers must be a JSON object");
      return;
    }
    self.form = Some(FormAnswers {
      application_id: self.id,
      version,
      answers: answers.clone(),
      updated_at,
    });
  }

  fn apply_requirement_command(
    &mut self,
    kind: &EventKind,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let requirements = &mut self.requirements;
    match kind {
      EventKind::AttachFile { requirement_id, file } => {
        requirements.attach_file(requirement_id, file.clone(), contexts, log)
      }
      EventKind::RemoveFile { requirement_id, urn } => {
        requirements.remove_file(requirement_id, urn, contexts, log)
      }
      EventKind::SetAnswer { requirement_id, choice, justification } => requirements
        .set_answer(requirement_id, *choice, justification.clone(), contexts, log),
      EventKind::SetBundleReference { requirement_id, bundle_urn } => {
        requirements.set_bundle(requirement_id, bundle_urn.clone(), contexts, log)
      }
      _ => Ok(()),
    }
  }

  fn handle_submission_event(
    &mut self,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    match &mut self.submission {
      Some(submission) => submission.handle(event, contexts, log),
      None => Err(log.severe(contexts, "submitted application has no submission")),
    }
  }

  /// Entry into `Submitted`: stamp the time, hand the active requirements to a
  /// new original submission and start it.
  fn submit(&mut self, event: &Event, log: &mut ActivityLog) -> Result<()> {
    let contexts = event.contexts().enter(self);
    self.submitted_at = Some(event.occurred_at);

    let original = Submission::new(
      self.id,
      self.ident.clone(),
      SubmissionKind::Original,
      event.occurred_at,
      self.requirements.active_ids(),
      self.requirements.documents(),
    );
    self.requirements.mark_submitted();

    let mut submission =
      NewSubmission::new(original).with_observers(self.observers.iter().cloned());
    submission.start(event, &contexts, log)?;
    self.submission = Some(submission);
    Ok(())
  }

  /// Send bundles added after submission as a supplementary follow-up.
  fn send_followup(
    &mut self,
    event: &Event,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let pending: Vec<String> = self
      .requirements
      .pending_resend()
      .map(|r| r.id().to_owned())
      .collect();
    if pending.is_empty() {
      log.warn(contexts, "no new documents to send");
      return Ok(());
    }

    let documents = self
      .requirements
      .pending_resend()
      .filter_map(|r| r.document())
      .collect();
    let followup = Submission::new(
      self.id,
      self.ident.clone(),
      SubmissionKind::Supplementary,
      event.occurred_at,
      pending.clone(),
      documents,
    );

    let submission_contexts = event.contexts().enter(self);
    let Some(submission) = self.submission.as_mut() else {
      return Err(log.severe(contexts, "submitted application has no submission"));
    };
    submission.add_followup(followup, event, &submission_contexts, log)?;
    self.requirements.mark_submitted_ids(&pending);
    Ok(())
  }
}
