//! The activity log: the structured record of one event-processing cycle.
//!
//! Every layer that delegates work (event → application → submission →
//! state) extends an immutable [`ContextStack`] and passes it down. An
//! [`Activity`] copies the stack that was active when it was raised, so the
//! log can later be grouped and filtered by context without any shared
//! mutable state.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, SevereFailure};

// ─── Severity ────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
  Info,
  Warn,
  Need,
  Error,
  Severe,
}

impl Severity {
  pub fn is_error(self) -> bool { matches!(self, Self::Error | Self::Severe) }
}

// ─── Needs ───────────────────────────────────────────────────────────────────

/// A typed request for externally supplied information.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NeedKind {
  /// Ask the form service for an empty application shell.
  ProvisionEmptyApplication,
  /// Ask for the form code that classifies a submission.
  ClassifySubmission,
  /// Ask for an archivable rendering of the application.
  RenderArchivableCopy,
  /// Ask the case-management system to open a case file.
  RegisterCaseFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Need {
  pub kind:    NeedKind,
  #[serde(default)]
  pub details: Map<String, Value>,
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// One layer of "what was active": a kind (e.g. `application`) plus the
/// key/value pairs that identify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFrame {
  pub kind:    String,
  #[serde(default)]
  pub details: BTreeMap<String, String>,
}

impl ContextFrame {
  pub fn new(kind: impl Into<String>) -> Self {
    Self { kind: kind.into(), details: BTreeMap::new() }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.details.insert(key.into(), value.to_string());
    self
  }
}

/// Anything that can describe itself as a context frame.
pub trait Contextual {
  fn context(&self) -> ContextFrame;
}

/// An immutable, outermost-first list of context frames.
///
/// Extending a stack returns a new value; the original is left untouched, so
/// a caller's stack is never affected by what a callee pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextStack(Vec<ContextFrame>);

impl ContextStack {
  pub fn new() -> Self { Self::default() }

  pub fn from_frames(frames: Vec<ContextFrame>) -> Self { Self(frames) }

  /// A copy of this stack with `frame` appended.
  pub fn push(&self, frame: ContextFrame) -> Self {
    let mut frames = self.0.clone();
    frames.push(frame);
    Self(frames)
  }

  /// A copy of this stack with the context of `item` appended.
  pub fn enter(&self, item: &impl Contextual) -> Self { self.push(item.context()) }

  pub fn frames(&self) -> &[ContextFrame] { &self.0 }

  /// The identifying fields of every frame merged into one map. Inner frames
  /// overwrite outer ones on key collisions.
  pub fn key(&self) -> BTreeMap<String, String> {
    self
      .0
      .iter()
      .flat_map(|frame| frame.details.iter())
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// True if one stack is a prefix of the other, i.e. they describe the same
  /// line of delegation.
  pub fn is_related(&self, other: &ContextStack) -> bool {
    self.0.starts_with(&other.0) || other.0.starts_with(&self.0)
  }
}

impl fmt::Display for ContextStack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, frame) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, " > ")?;
      }
      write!(f, "{}", frame.kind)?;
      if !frame.details.is_empty() {
        let pairs: Vec<String> =
          frame.details.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "({})", pairs.join(", "))?;
      }
    }
    Ok(())
  }
}

// ─── Activity ────────────────────────────────────────────────────────────────

/// One entry in the log. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
  pub severity:    Severity,
  pub message:     String,
  pub recorded_at: DateTime<Utc>,
  pub contexts:    ContextStack,
  /// Present on [`Severity::Need`] activities only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub need:        Option<Need>,
}

/// Traverses a log, e.g. for persistence or translation into messages.
pub trait ActivityVisitor {
  fn visit(&mut self, activity: &Activity);
}

impl<F> ActivityVisitor for F
where
  F: FnMut(&Activity),
{
  fn visit(&mut self, activity: &Activity) { self(activity) }
}

// ─── ActivityLog ─────────────────────────────────────────────────────────────

/// Append-only list of activities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityLog {
  activities: Vec<Activity>,
}

impl ActivityLog {
  pub fn new() -> Self { Self::default() }

  /// Rehydrate a log from persisted activities.
  pub fn from_activities(activities: Vec<Activity>) -> Self { Self { activities } }

  /// Record a non-need activity.
  ///
  /// A [`Severity::Severe`] record is appended and then returned as an
  /// [`Error::Severe`]; the caller must abort the unit of work.
  pub fn record(
    &mut self,
    severity: Severity,
    contexts: &ContextStack,
    message: impl Into<String>,
  ) -> Result<(), Error> {
    let message = message.into();
    self.push(severity, contexts, message.clone(), None);
    if severity == Severity::Severe {
      return Err(Error::Severe(SevereFailure {
        message,
        contexts: contexts.clone(),
      }));
    }
    Ok(())
  }

  pub fn info(&mut self, contexts: &ContextStack, message: impl Into<String>) {
    self.push(Severity::Info, contexts, message.into(), None);
  }

  pub fn warn(&mut self, contexts: &ContextStack, message: impl Into<String>) {
    self.push(Severity::Warn, contexts, message.into(), None);
  }

  pub fn error(&mut self, contexts: &ContextStack, message: impl Into<String>) {
    self.push(Severity::Error, contexts, message.into(), None);
  }

  /// Record a severe activity and hand back the failure to propagate:
  /// `return Err(log.severe(&contexts, "..."))`.
  pub fn severe(
    &mut self,
    contexts: &ContextStack,
    message: impl Into<String>,
  ) -> Error {
    let message = message.into();
    self.push(Severity::Severe, contexts, message.clone(), None);
    Error::Severe(SevereFailure { message, contexts: contexts.clone() })
  }

  pub fn needed(
    &mut self,
    contexts: &ContextStack,
    kind: NeedKind,
    message: impl Into<String>,
    details: Map<String, Value>,
  ) {
    self.push(
      Severity::Need,
      contexts,
      message.into(),
      Some(Need { kind, details }),
    );
  }

  fn push(
    &mut self,
    severity: Severity,
    contexts: &ContextStack,
    message: String,
    need: Option<Need>,
  ) {
    self.activities.push(Activity {
      severity,
      message,
      recorded_at: Utc::now(),
      contexts: contexts.clone(),
      need,
    });
  }

  pub fn accept(&self, visitor: &mut impl ActivityVisitor) {
    for activity in &self.activities {
      visitor.visit(activity);
    }
  }

  /// Move every activity of `other` to the end of this log.
  pub fn absorb(&mut self, other: ActivityLog) {
    self.activities.extend(other.activities);
  }

  pub fn activities(&self) -> &[Activity] { &self.activities }

  pub fn len(&self) -> usize { self.activities.len() }

  pub fn is_empty(&self) -> bool { self.activities.is_empty() }

  pub fn has_errors(&self) -> bool {
    self.activities.iter().any(|a| a.severity.is_error())
  }

  pub fn has_warnings(&self) -> bool {
    self.activities.iter().any(|a| a.severity == Severity::Warn)
  }

  pub fn has_messages(&self) -> bool {
    self
      .activities
      .iter()
      .any(|a| matches!(a.severity, Severity::Info | Severity::Warn))
  }

  /// All activities carrying a need, in the order they were raised.
  pub fn needs(&self) -> impl Iterator<Item = (&Activity, &Need)> {
    self
      .activities
      .iter()
      .filter_map(|a| a.need.as_ref().map(|n| (a, n)))
  }

  pub fn warnings(&self) -> impl Iterator<Item = &Activity> {
    self.activities.iter().filter(|a| a.severity == Severity::Warn)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stack() -> ContextStack {
    ContextStack::new()
      .push(ContextFrame::new("person").with("ident", "12345678901"))
      .push(ContextFrame::new("application").with("application_id", "a-1"))
  }

  #[test]
  fn push_leaves_the_parent_stack_untouched() {
    let parent = stack();
    let child = parent.push(ContextFrame::new("state").with("state", "x"));
    assert_eq!(parent.frames().len(), 2);
    assert_eq!(child.frames().len(), 3);
    assert!(child.is_related(&parent));
    assert!(parent.is_related(&child));
  }

  #[test]
  fn sibling_stacks_are_unrelated() {
    let base = stack();
    let a = base.push(ContextFrame::new("submission").with("submission_id", "s-1"));
    let b = base.push(ContextFrame::new("submission").with("submission_id", "s-2"));
    assert!(!a.is_related(&b));
  }

  #[test]
  fn key_merges_all_frames() {
    let key = stack().key();
    assert_eq!(key.get("ident").map(String::as_str), Some("12345678901"));
    assert_eq!(key.get("application_id").map(String::as_str), Some("a-1"));
  }

  #[test]
  fn non_fatal_records_accumulate() {
    let mut log = ActivityLog::new();
    log.info(&stack(), "hello");
    log.warn(&stack(), "careful");
    assert!(log.has_messages());
    assert!(log.has_warnings());
    assert!(!log.has_errors());

    log.error(&stack(), "bad answer");
    assert!(log.has_errors());
    assert_eq!(log.len(), 3);
  }

  #[test]
  fn severe_record_raises_with_the_context_stack() {
    let mut log = ActivityLog::new();
    let err = log
      .record(Severity::Severe, &stack(), "invariant broken")
      .unwrap_err();

    match err {
      Error::Severe(failure) => {
        assert_eq!(failure.message, "invariant broken");
        assert_eq!(failure.contexts, stack());
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(log.has_errors());
    assert_eq!(log.activities()[0].severity, Severity::Severe);
  }

  #[test]
  fn needs_carry_kind_and_details() {
    let mut log = ActivityLog::new();
    let mut details = Map::new();
    details.insert("language".into(), Value::from("nb"));
    log.needed(&stack(), NeedKind::ProvisionEmptyApplication, "need shell", details);

    let (activity, need) = log.needs().next().unwrap();
    assert_eq!(activity.severity, Severity::Need);
    assert_eq!(need.kind, NeedKind::ProvisionEmptyApplication);
    assert_eq!(need.details["language"], "nb");
  }

  #[test]
  fn visitor_sees_every_activity_in_order() {
    let mut log = ActivityLog::new();
    log.info(&stack(), "one");
    log.warn(&stack(), "two");

    let mut seen = Vec::new();
    log.accept(&mut |a: &Activity| seen.push(a.message.clone()));
    assert_eq!(seen, ["one", "two"]);
  }

  #[test]
  fn log_survives_a_json_roundtrip() {
    let mut log = ActivityLog::new();
    log.info(&stack(), "one");
    log.needed(&stack(), NeedKind::ClassifySubmission, "classify", Map::new());

    let json = serde_json::to_string(&log).unwrap();
    let back: ActivityLog = serde_json::from_str(&json).unwrap();
    assert_eq!(back, log);
  }

  #[test]
  fn severity_and_need_kind_names_are_snake_case() {
    assert_eq!(Severity::Severe.as_ref(), "severe");
    assert_eq!(NeedKind::RenderArchivableCopy.to_string(), "render_archivable_copy");
    assert_eq!(
      "register_case_file".parse::<NeedKind>().unwrap(),
      NeedKind::RegisterCaseFile
    );
  }
}
