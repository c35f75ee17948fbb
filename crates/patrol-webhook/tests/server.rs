use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use patrol_webhook::dispatch::{Job, JobKind, RouteSettings};
use patrol_core::PatrolConfig;
use patrol_webhook::server::{route_settings, router, AppState, JobRunner};
use patrol_webhook::signature::sign;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

const PATH: &str = "/webhooks/github";
const SECRET: &str = "hunter2";

struct ChannelRunner(mpsc::UnboundedSender<Job>);

#[async_trait]
impl JobRunner for ChannelRunner {
    async fn run(&self, job: Job) {
        let _ = self.0.send(job);
    }
}

fn build_app(secret: Option<&str>) -> (Router, mpsc::UnboundedReceiver<Job>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = AppState::new(
        Arc::new(ChannelRunner(tx)),
        RouteSettings::default(),
        secret.map(String::from),
    );
    (router(state, PATH), rx)
}

struct TokenRunner(mpsc::UnboundedSender<Job>);

#[async_trait]
impl JobRunner for TokenRunner {
    async fn run(&self, job: Job) {
        let _ = self.0.send(job);
    }

    fn own_logins(&self) -> Vec<String> {
        vec!["patrol-bot".into()]
    }
}

fn comment_payload(body: &str) -> Vec<u8> {
    comment_payload_by("dev", body)
}

fn comment_payload_by(login: &str, body: &str) -> Vec<u8> {
    json!({
        "action": "created",
        "issue": {"number": 8, "state": "open", "pull_request": {"url": "u"}},
        "comment": {"id": 77, "body": body, "user": {"login": login, "type": "User"}},
        "repository": {"name": "api", "full_name": "acme/api", "owner": {"login": "acme"}},
        "installation": {"id": 9}
    })
    .to_string()
    .into_bytes()
}

fn delivery(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut request = Request::post(PATH)
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958");
    if let Some(signature) = signature {
        request = request.header("x-hub-signature-256", signature);
    }
    request.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _rx) = build_app(None);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn ping_returns_pong() {
    let (app, _rx) = build_app(None);
    let body = br#"{"zen":"Design for failure.","hook_id":123}"#.to_vec();
    let response = app.oneshot(delivery("ping", body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["message"], "pong");
    assert_eq!(json["hook_id"], 123);
}

#[tokio::test]
async fn signed_review_comment_is_accepted_and_run() {
    let (app, mut rx) = build_app(Some(SECRET));
    let body = comment_payload("@byte-patrol review --areas performance");
    let signature = sign(SECRET, &body).unwrap();

    let response = app
        .oneshot(delivery("issue_comment", body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.pr.to_string(), "acme/api#8");
    assert_eq!(job.installation_id, Some(9));
    assert_eq!(job.comment_id, Some(77));
    let JobKind::Review(command) = job.kind else {
        panic!("expected a review job");
    };
    assert!(command.areas.contains("performance"));
}

#[tokio::test]
async fn bad_or_missing_signature_is_unauthorized() {
    let body = comment_payload("@byte-patrol review");

    let (app, mut rx) = build_app(Some(SECRET));
    let forged = sign("not-the-secret", &body).unwrap();
    let response = app
        .oneshot(delivery("issue_comment", body.clone(), Some(forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (app, _rx2) = build_app(Some(SECRET));
    let response = app
        .oneshot(delivery("issue_comment", body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsigned_delivery_accepted_without_secret() {
    let (app, mut rx) = build_app(None);
    let response = app
        .oneshot(delivery("issue_comment", comment_payload("@byte-patrol help"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.kind, JobKind::Help);
}

#[tokio::test]
async fn irrelevant_comment_is_ignored() {
    let (app, mut rx) = build_app(None);
    let response = app
        .oneshot(delivery("issue_comment", comment_payload("ship it"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let message = json_body(response).await["message"].as_str().unwrap().to_string();
    assert!(message.starts_with("ignored: "), "{message}");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_payload_is_bad_request() {
    let (app, _rx) = build_app(None);
    let response = app
        .oneshot(delivery("issue_comment", b"{not json".to_vec(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_event_header_is_bad_request() {
    let (app, _rx) = build_app(None);
    let request = Request::post(PATH).body(Body::from("{}")).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn runner_own_comments_are_ignored() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = TokenRunner(tx);
    let routes = route_settings(&PatrolConfig::default(), &runner);
    let app = router(AppState::new(Arc::new(runner), routes, None), PATH);

    let own = comment_payload_by("Patrol-Bot", "@byte-patrol review --areas tests");
    let response = app
        .clone()
        .oneshot(delivery("issue_comment", own, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(rx.try_recv().is_err());

    let response = app
        .oneshot(delivery("issue_comment", comment_payload("@byte-patrol help"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.kind, JobKind::Help);
}
