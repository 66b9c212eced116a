//! Admin REST adapter tests, driven through the router with oneshot
//! requests.

use axum::{
  body::Body,
  http::{Request, StatusCode},
  Router,
};
use fastport_server::{get_router, AppConfig};
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn test_router() -> Router {
  let (router, _state) = get_router(AppConfig::default()).await.unwrap();
  router
}

async fn request(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
  let response = router
    .clone()
    .oneshot(
      Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap(),
    )
    .await
    .unwrap();

  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, value)
}

#[tokio::test]
async fn create_session_returns_credentials_once() {
  let router = test_router().await;

  let (status, body) = request(
    &router,
    "POST",
    "/api/sessions",
    json!({"sessionName": "s1", "password": "pw"}),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);
  assert_eq!(body["sessionName"], "s1");
  assert_eq!(body["secretKey"].as_str().unwrap().len(), 64);

  // duplicate name conflicts
  let (status, body) = request(
    &router,
    "POST",
    "/api/sessions",
    json!({"sessionName": "s1", "password": "pw"}),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["success"], false);

  // the listing never leaks credentials
  let (status, body) = request(&router, "GET", "/api/sessions", Value::Null).await;
  assert_eq!(status, StatusCode::OK);
  let sessions = body["sessions"].as_array().unwrap();
  assert_eq!(sessions.len(), 1);
  assert!(sessions[0].get("password").is_none());
  assert!(sessions[0].get("secretKey").is_none());
  assert_eq!(sessions[0]["retryInterval"], 5000);
}

#[tokio::test]
async fn suspend_and_drop_require_both_credentials() {
  let router = test_router().await;

  let (_, created) = request(
    &router,
    "POST",
    "/api/sessions",
    json!({"sessionName": "s1", "password": "pw"}),
  )
  .await;
  let secret = created["secretKey"].as_str().unwrap().to_string();

  let (status, _) = request(
    &router,
    "PATCH",
    "/api/sessions/s1/suspend",
    json!({"password": "pw", "secretKey": "wrong", "suspend": true}),
  )
  .await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, body) = request(
    &router,
    "PATCH",
    "/api/sessions/s1/suspend",
    json!({"password": "pw", "secretKey": secret, "suspend": true}),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["suspended"], true);

  let (status, body) = request(
    &router,
    "DELETE",
    "/api/sessions/s1",
    json!({"password": "pw", "secretKey": secret}),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);

  let (_, body) = request(&router, "GET", "/api/sessions", Value::Null).await;
  assert_eq!(body["sessions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn suspending_missing_session_is_not_found() {
  let router = test_router().await;
  let (status, _) = request(
    &router,
    "PATCH",
    "/api/sessions/ghost/suspend",
    json!({"password": "pw", "secretKey": "sk", "suspend": true}),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}
