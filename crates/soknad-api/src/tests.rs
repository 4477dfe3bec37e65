//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
  body::{Body, to_bytes},
  http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use soknad_mediator::{Mediator, MemoryPublisher};
use soknad_store_sqlite::SqliteStore;
use tower::ServiceExt as _;

use crate::{AppState, api_router};

const IDENT: &str = "12345678901";

async fn make_state() -> AppState<SqliteStore, MemoryPublisher> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  Arc::new(Mediator::new(Arc::new(store), Arc::new(MemoryPublisher::new())))
}

async fn call(
  state:  &AppState<SqliteStore, MemoryPublisher>,
  method: &str,
  uri:    &str,
  body:   Option<Value>,
) -> (StatusCode, Value) {
  let builder = Request::builder().method(method).uri(uri);
  let req = match body {
    Some(body) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };
  let resp = api_router(state.clone()).oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

async fn post_event(
  state: &AppState<SqliteStore, MemoryPublisher>,
  application_id: Option<&str>,
  kind: Value,
) -> (StatusCode, Value) {
  let mut event = json!({ "ident": IDENT, "kind": kind });
  if let Some(id) = application_id {
    event["application_id"] = json!(id);
  }
  call(state, "POST", "/events", Some(event)).await
}

/// Create an application and move it to `in_progress`; returns its id.
async fn in_progress(state: &AppState<SqliteStore, MemoryPublisher>) -> String {
  let (status, outcome) = post_event(
    state,
    None,
    json!({ "type": "new_application_wanted", "language": "nb" }),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  let id = outcome["application_id"].as_str().unwrap().to_owned();

  let (status, _) = post_event(
    state,
    Some(&id),
    json!({
      "type": "application_created",
      "process_version": { "name": "Dagpenger", "version": 1 }
    }),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  id
}

fn probabilization(id: &str) -> Value {
  json!({
    "id": id,
    "fact": { "id": format!("f-{id}"), "description_id": "faktum.arbeidsforhold", "answer": null },
    "supporting": []
  })
}

// ── POST /events ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn posting_a_new_application_returns_its_messages() {
  let state = make_state().await;
  let (status, outcome) = post_event(
    &state,
    None,
    json!({ "type": "new_application_wanted", "language": "nb" }),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(outcome["state"], "being_created");
  let messages = outcome["messages"].as_array().unwrap();
  assert_eq!(messages.len(), 1);
  assert_eq!(messages[0]["needs"], json!(["provision_empty_application"]));
  assert_eq!(messages[0]["final"], true);
  assert_eq!(messages[0]["key"], IDENT);
}

#[tokio::test]
async fn severe_events_are_unprocessable() {
  let state = make_state().await;
  let id = in_progress(&state).await;

  let (status, body) = post_event(
    &state,
    Some(&id),
    json!({
      "type": "set_answer",
      "requirement_id": "missing",
      "choice": "will_not_send",
      "justification": null
    }),
  )
  .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body["error"].as_str().unwrap().contains("severe"));
}

#[tokio::test]
async fn events_without_an_application_are_bad_requests() {
  let state = make_state().await;
  let (status, _) =
    post_event(&state, None, json!({ "type": "applicant_finished_form" })).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = post_event(
    &state,
    Some("00000000-0000-0000-0000-000000000000"),
    json!({ "type": "applicant_finished_form" }),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── GET /applications ─────────────────────────────────────────────────────────

#[tokio::test]
async fn get_application_view() {
  let state = make_state().await;
  let id = in_progress(&state).await;

  let (status, view) = call(&state, "GET", &format!("/applications/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["id"], id);
  assert_eq!(view["state"], "in_progress");
  assert_eq!(view["process_version"]["name"], "Dagpenger");
  assert_eq!(view["submissions"], json!([]));
}

#[tokio::test]
async fn get_unknown_application_returns_404() {
  let state = make_state().await;
  let (status, body) = call(
    &state,
    "GET",
    "/applications/00000000-0000-0000-0000-000000000000",
    None,
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].is_string());
}

#[tokio::test]
async fn requirements_filter_by_status() {
  let state = make_state().await;
  let id = in_progress(&state).await;
  for (version, ids) in [(1, vec!["1", "2"]), (2, vec!["2"])] {
    let probabilizations: Vec<Value> = ids.into_iter().map(probabilization).collect();
    post_event(
      &state,
      Some(&id),
      json!({
        "type": "form_answer_updated",
        "version": version,
        "answers": {},
        "probabilizations": probabilizations
      }),
    )
    .await;
  }

  let uri = format!("/applications/{id}/requirements");
  let (_, all) = call(&state, "GET", &uri, None).await;
  assert_eq!(all.as_array().unwrap().len(), 2);

  let (_, active) = call(&state, "GET", &format!("{uri}?status=active"), None).await;
  let active = active.as_array().unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0]["probabilization"]["id"], "2");

  let (_, inactive) = call(&state, "GET", &format!("{uri}?status=inactive"), None).await;
  assert_eq!(inactive[0]["probabilization"]["id"], "1");
}

#[tokio::test]
async fn answers_respect_min_version() {
  let state = make_state().await;
  let id = in_progress(&state).await;
  let uri = format!("/applications/{id}/answers");

  let (status, _) = call(&state, "GET", &uri, None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  post_event(
    &state,
    Some(&id),
    json!({
      "type": "form_answer_updated",
      "version": 2,
      "answers": { "barn": false }
    }),
  )
  .await;

  let (status, answers) = call(&state, "GET", &format!("{uri}?min_version=2"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(answers["version"], 2);
  assert_eq!(answers["answers"]["barn"], false);

  let (status, _) = call(&state, "GET", &format!("{uri}?min_version=3"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── GET /owners ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn owners_list_their_applications() {
  let state = make_state().await;
  let id = in_progress(&state).await;

  let (status, list) =
    call(&state, "GET", &format!("/owners/{IDENT}/applications"), None).await;
  assert_eq!(status, StatusCode::OK);
  let list = list.as_array().unwrap();
  assert_eq!(list.len(), 1);
  assert_eq!(list[0]["id"], id);

  let (_, none) = call(&state, "GET", "/owners/99999999999/applications", None).await;
  assert_eq!(none, json!([]));
}
