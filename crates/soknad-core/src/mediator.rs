//! Turns the needs collected in an activity log into outbound messages.
//!
//! Needs are grouped by the merged identifying fields of their context
//! stack; each group becomes one [`NeedMessage`]. A context can ask for each
//! need kind at most once per event, and nothing is emitted for a context
//! that already holds an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  activity::{ActivityLog, ContextStack, Need, NeedKind},
};

/// One outbound request for external information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedMessage {
  /// Stable across redeliveries of the same inbound event.
  pub message_id: String,
  /// Partition key; every message for one owner shares it.
  pub key:        String,
  pub needs:      Vec<NeedKind>,
  /// True when the context has exactly one open need.
  #[serde(rename = "final")]
  pub is_final:   bool,
  /// Context fields merged with one entry per need kind holding its details.
  pub payload:    Map<String, Value>,
}

/// Build the messages for one processed event.
///
/// Fails with [`Error::DuplicateNeed`] before producing anything if any
/// context raised the same need kind twice.
pub fn mediate(
  log: &ActivityLog,
  key: &str,
  event_id: Uuid,
) -> Result<Vec<NeedMessage>> {
  let failed: Vec<&ContextStack> = log
    .activities()
    .iter()
    .filter(|a| a.severity.is_error())
    .map(|a| &a.contexts)
    .collect();

  let mut groups: BTreeMap<BTreeMap<String, String>, Vec<&Need>> = BTreeMap::new();
  for (activity, need) in log.needs() {
    if failed.iter().any(|f| f.is_related(&activity.contexts)) {
      continue;
    }
    groups.entry(activity.contexts.key()).or_default().push(need);
  }

  groups
    .into_iter()
    .map(|(context, needs)| message(key, event_id, context, &needs))
    .collect()
}

fn message(
  key: &str,
  event_id: Uuid,
  context: BTreeMap<String, String>,
  needs: &[&Need],
) -> Result<NeedMessage> {
  let mut payload: Map<String, Value> = context
    .iter()
    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
    .collect();

  let mut kinds = Vec::with_capacity(needs.len());
  for need in needs {
    if kinds.contains(&need.kind) {
      return Err(Error::DuplicateNeed {
        kind:    need.kind,
        context: format!("{context:?}"),
      });
    }
    kinds.push(need.kind);
    payload.insert(need.kind.to_string(), Value::Object(need.details.clone()));
  }

  Ok(NeedMessage {
    message_id: message_id(event_id, &context, &kinds),
    key: key.to_owned(),
    is_final: kinds.len() == 1,
    needs: kinds,
    payload,
  })
}

fn message_id(
  event_id: Uuid,
  context: &BTreeMap<String, String>,
  kinds: &[NeedKind],
) -> String {
  let mut hasher = Sha256::new();
  hasher.update(event_id.as_bytes());
  for (k, v) in context {
    hasher.update(k.as_bytes());
    hasher.update([0u8]);
    hasher.update(v.as_bytes());
    hasher.update([0u8]);
  }
  for kind in kinds {
    hasher.update(kind.as_ref().as_bytes());
    hasher.update([0u8]);
  }
  hex::encode(hasher.finalize())
}
