//! Document requirements ("krav") and their reconciliation against the
//! probabilizations supplied by the form service.
//!
//! A [`Requirement`] is keyed on the full [`Probabilization`] value, not only
//! its id. When the supporting facts behind an id change, the old requirement
//! goes inactive and a fresh one (empty answer, no files) takes its place.
//! That policy lives in [`reconcile`] and nowhere else.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Result,
  activity::{ActivityLog, ContextFrame, ContextStack, Contextual},
  submission::{Document, Rendition, RenditionKind},
};

// ─── Facts ───────────────────────────────────────────────────────────────────

/// One answered question from the form.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fact {
  pub id:             String,
  /// The text key of the question, e.g. `faktum.arbeidsforhold`.
  pub description_id: String,
  #[serde(default)]
  pub answer:         Option<String>,
}

/// A fact that implies its supporting facts probably need documentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probabilization {
  pub id:         String,
  pub fact:       Fact,
  #[serde(default)]
  pub supporting: BTreeSet<Fact>,
}

// ─── Answer ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
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
pub enum Choice {
  #[default]
  Unanswered,
  SendNow,
  SendLater,
  OthersWillSend,
  AlreadySent,
  WillNotSend,
}

/// An uploaded file attached to a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
  pub filename:    String,
  pub urn:         String,
  pub size:        u64,
  pub uploaded_at: DateTime<Utc>,
  /// Set once the file has been merged into the requirement's bundle.
  #[serde(default)]
  pub bundled:     bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
  pub choice:            Choice,
  pub justification:     Option<String>,
  #[serde(default)]
  pub files:             Vec<File>,
  /// URN of the bundled PDF that merges all attached files.
  pub bundle:            Option<String>,
  #[serde(default)]
  pub already_submitted: bool,
}

// ─── Requirement ─────────────────────────────────────────────────────────────

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
pub enum RequirementStatus {
  Active,
  Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
  pub probabilization: Probabilization,
  pub status:          RequirementStatus,
  pub answer:          Answer,
}

impl Requirement {
  pub fn new(probabilization: Probabilization) -> Self {
    Self {
      probabilization,
      status: RequirementStatus::Active,
      answer: Answer::default(),
    }
  }

  pub fn id(&self) -> &str { &self.probabilization.id }

  pub fn is_active(&self) -> bool { self.status == RequirementStatus::Active }

  /// Bundled but not yet part of any submission.
  pub fn pending_resend(&self) -> bool {
    self.is_active() && self.answer.bundle.is_some() && !self.answer.already_submitted
  }

  /// The bundle as a supporting document for a submission.
  pub fn document(&self) -> Option<Document> {
    let urn = self.answer.bundle.as_ref()?;
    Some(Document {
      name:       self.id().to_owned(),
      form_code:  None,
      renditions: vec![Rendition {
        filename:   format!("{}.pdf", self.id()),
        urn:        urn.clone(),
        kind:       RenditionKind::Gross,
        media_type: "application/pdf".to_owned(),
      }],
    })
  }
}

impl Contextual for Requirement {
  fn context(&self) -> ContextFrame {
    ContextFrame::new("requirement").with("requirement_id", self.id())
  }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// Bring `current` in line with the probabilizations the form now implies.
///
/// - an existing requirement is active iff its exact probabilization is
///   still present, inactive otherwise (answers and files are kept);
/// - every incoming probabilization not carried by an existing requirement
///   becomes a new active requirement with an empty answer.
///
/// Nothing is removed. The function is idempotent.
pub fn reconcile(
  current: &[Requirement],
  incoming: &[Probabilization],
) -> Vec<Requirement> {
  let mut next: Vec<Requirement> = current
    .iter()
    .map(|existing| {
      let mut updated = existing.clone();
      updated.status = if incoming.contains(&existing.probabilization) {
        RequirementStatus::Active
      } else {
        RequirementStatus::Inactive
      };
      updated
    })
    .collect();

  for probabilization in incoming {
    if !next.iter().any(|r| &r.probabilization == probabilization) {
      next.push(Requirement::new(probabilization.clone()));
    }
  }

  next
}

// ─── Requirements ────────────────────────────────────────────────────────────

/// All requirements of one application, active and inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requirements(Vec<Requirement>);

impl Requirements {
  pub fn new(requirements: Vec<Requirement>) -> Self { Self(requirements) }

  /// See [`reconcile`].
  pub fn reconcile(&self, incoming: &[Probabilization]) -> Self {
    Self(reconcile(&self.0, incoming))
  }

  pub fn all(&self) -> &[Requirement] { &self.0 }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn active(&self) -> impl Iterator<Item = &Requirement> {
    self.0.iter().filter(|r| r.is_active())
  }

  pub fn inactive(&self) -> impl Iterator<Item = &Requirement> {
    self.0.iter().filter(|r| !r.is_active())
  }

  pub fn active_ids(&self) -> Vec<String> {
    self.active().map(|r| r.id().to_owned()).collect()
  }

  /// The requirement currently answering to `id`: the active one if there is
  /// one, otherwise the most recent inactive one.
  pub fn get(&self, id: &str) -> Option<&Requirement> {
    self
      .0
      .iter()
      .find(|r| r.is_active() && r.id() == id)
      .or_else(|| self.0.iter().rev().find(|r| r.id() == id))
  }

  fn get_mut(&mut self, id: &str) -> Option<&mut Requirement> {
    let index = self
      .0
      .iter()
      .position(|r| r.is_active() && r.id() == id)
      .or_else(|| self.0.iter().rposition(|r| r.id() == id))?;
    self.0.get_mut(index)
  }

  fn expect_mut(
    &mut self,
    id: &str,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<&mut Requirement> {
    match self.get_mut(id) {
      Some(requirement) => Ok(requirement),
      None => Err(log.severe(contexts, format!("no requirement with id {id}"))),
    }
  }

  pub fn attach_file(
    &mut self,
    id: &str,
    file: File,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let requirement = self.expect_mut(id, contexts, log)?;
    let contexts = contexts.enter(&*requirement);
    log.info(&contexts, format!("attached {}", file.filename));
    requirement.answer.files.push(file);
    requirement.answer.choice = Choice::SendNow;
    Ok(())
  }

  pub fn remove_file(
    &mut self,
    id: &str,
    urn: &str,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let requirement = self.expect_mut(id, contexts, log)?;
    let contexts = contexts.enter(&*requirement);
    let before = requirement.answer.files.len();
    requirement.answer.files.retain(|f| f.urn != urn);
    if requirement.answer.files.len() == before {
      log.warn(&contexts, format!("no file {urn} to remove"));
    } else {
      log.info(&contexts, format!("removed {urn}"));
    }
    Ok(())
  }

  /// Answer without uploading: send later, others will send, and so on.
  pub fn set_answer(
    &mut self,
    id: &str,
    choice: Choice,
    justification: Option<String>,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let requirement = self.expect_mut(id, contexts, log)?;
    let contexts = contexts.enter(&*requirement);
    if choice == Choice::SendNow && requirement.answer.files.is_empty() {
      log.error(&contexts, "send_now requires at least one attached file");
      return Ok(());
    }
    requirement.answer.choice = choice;
    requirement.answer.justification = justification;
    log.info(&contexts, format!("answered {choice}"));
    Ok(())
  }

  /// Record the bundle that merges all attached files. A new bundle after
  /// submission clears `already_submitted` so the bundle gets resent.
  pub fn set_bundle(
    &mut self,
    id: &str,
    urn: String,
    contexts: &ContextStack,
    log: &mut ActivityLog,
  ) -> Result<()> {
    let requirement = self.expect_mut(id, contexts, log)?;
    let contexts = contexts.enter(&*requirement);
    for file in &mut requirement.answer.files {
      file.bundled = true;
    }
    log.info(&contexts, format!("bundled as {urn}"));
    requirement.answer.bundle = Some(urn);
    requirement.answer.already_submitted = false;
    Ok(())
  }

  /// Flag every active requirement as part of a submission.
  pub fn mark_submitted(&mut self) {
    for requirement in self.0.iter_mut().filter(|r| r.is_active()) {
      requirement.answer.already_submitted = true;
    }
  }

  /// Flag the active requirements named in `ids` as part of a submission.
  pub fn mark_submitted_ids(&mut self, ids: &[String]) {
    for requirement in self
      .0
      .iter_mut()
      .filter(|r| r.is_active() && ids.iter().any(|id| id == r.id()))
    {
      requirement.answer.already_submitted = true;
    }
  }

  pub fn pending_resend(&self) -> impl Iterator<Item = &Requirement> {
    self.0.iter().filter(|r| r.pending_resend())
  }

  /// Supporting documents for every active, bundled requirement.
  pub fn documents(&self) -> Vec<Document> {
    self.active().filter_map(Requirement::document).collect()
  }
}


#[cfg(test)]
mod properties {
  use proptest::prelude::*;

  use super::*;

  fn arb_fact() -> impl Strategy<Value = Fact> {
    ("[a-c]", prop::option::of("[xy]")).prop_map(|(id, answer)| Fact {
      description_id: format!("faktum.{id}"),
      id,
      answer,
    })
  }

  // Few ids and facts, so rounds keep hitting the same requirements.
  fn arb_probabilization() -> impl Strategy<Value = Probabilization> {
    ("[1-4]", arb_fact(), prop::collection::btree_set(arb_fact(), 0..3)).prop_map(
      |(id, fact, supporting)| Probabilization { id, fact, supporting },
    )
  }

  fn arb_round() -> impl Strategy<Value = Vec<Probabilization>> {
    prop::collection::vec(arb_probabilization(), 0..6)
  }

  fn arb_choice() -> impl Strategy<Value = Choice> {
    prop_oneof![
      Just(Choice::Unanswered),
      Just(Choice::SendLater),
      Just(Choice::OthersWillSend),
      Just(Choice::AlreadySent),
      Just(Choice::WillNotSend),
    ]
  }

  /// Requirements as left behind by a few earlier form updates, with
  /// whatever answers the applicant gave in between.
  fn arb_current() -> impl Strategy<Value = Vec<Requirement>> {
    (
      prop::collection::vec(arb_round(), 0..4),
      prop::collection::vec(arb_choice(), 0..12),
    )
      .prop_map(|(rounds, choices)| {
        let mut current = rounds
          .iter()
          .fold(Vec::new(), |current, round| reconcile(&current, round));
        for (requirement, choice) in current.iter_mut().zip(choices) {
          requirement.answer.choice = choice;
        }
        current
      })
  }

  proptest! {
    #[test]
    fn reconciling_twice_changes_nothing(current in arb_current(), incoming in arb_round()) {
      let once = reconcile(&current, &incoming);
      prop_assert_eq!(reconcile(&once, &incoming), once);
    }

    #[test]
    fn requirements_keep_their_place_and_answer(
      current in arb_current(),
      incoming in arb_round(),
    ) {
      let next = reconcile(&current, &incoming);
      prop_assert!(next.len() >= current.len());
      for (before, after) in current.iter().zip(&next) {
        prop_assert_eq!(&before.probabilization, &after.probabilization);
        prop_assert_eq!(&before.answer, &after.answer);
      }
    }

    #[test]
    fn active_exactly_when_present(current in arb_current(), incoming in arb_round()) {
      let next = reconcile(&current, &incoming);
      for requirement in &next {
        prop_assert_eq!(
          requirement.is_active(),
          incoming.contains(&requirement.probabilization)
        );
      }
      for probabilization in &incoming {
        prop_assert!(next.iter().any(|r| &r.probabilization == probabilization));
      }
    }
  }
}
