//! End-to-end tests for `put` against mocked GitHub and Google Chat endpoints.
//!
//! All tests use wiremock; no real API calls are made.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use beacon_core::{BuildContext, Resource, RetryPolicy};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHA: &str = "0123456789abcdef0123456789abcdef01234567";
const STATUS_PATH: &str =
    "/api/v3/repos/the-owner/the-repo/statuses/0123456789abcdef0123456789abcdef01234567";
const CHAT_PATH: &str = "/v1/spaces/SPACE/messages";

/// Lay out a build directory with one checkout of the-owner/the-repo.
fn build_dir(origin: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let git = dir.path().join("repo/.git");
    fs::create_dir_all(git.join("refs/heads")).unwrap();
    fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(git.join("refs/heads/main"), format!("{SHA}\n")).unwrap();
    fs::write(
        git.join("config"),
        format!("[remote \"origin\"]\n\turl = {origin}\n"),
    )
    .unwrap();
    fs::create_dir(dir.path().join("notes")).unwrap();
    dir
}

fn default_build_dir() -> tempfile::TempDir {
    build_dir("git@github.com:the-owner/the-repo.git")
}

fn concourse_build() -> BuildContext {
    BuildContext {
        build_id: Some("1234".to_string()),
        build_name: Some("42".to_string()),
        job_name: Some("unit-tests".to_string()),
        pipeline_name: Some("beacon".to_string()),
        team_name: Some("main".to_string()),
        atc_external_url: Some("https://ci.example.com".to_string()),
        ..Default::default()
    }
}

fn resource() -> Resource {
    Resource::new(concourse_build()).with_retry_policy(RetryPolicy::immediate(3))
}

fn source(server: &MockServer) -> Value {
    json!({
        "owner": "the-owner",
        "repo": "the-repo",
        "access_token": "the-token",
        "github_hostname": server.uri(),
    })
}

fn webhook(server: &MockServer) -> String {
    format!("{}{CHAT_PATH}?key=the-key&token=the-chat-token", server.uri())
}

async fn put(resource: &Resource, request: &Value, dir: &Path) -> Result<Value, String> {
    let mut out: Vec<u8> = Vec::new();
    resource
        .put(request.to_string().as_bytes(), &mut out, Some(dir))
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::from_slice(&out).unwrap())
}

fn metadata(response: &Value, name: &str) -> Option<String> {
    response["metadata"]
        .as_array()?
        .iter()
        .find(|m| m["name"] == name)
        .and_then(|m| m["value"].as_str())
        .map(str::to_string)
}

async fn mount_status(server: &MockServer, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

// ============================================================================
// Status sink
// ============================================================================

#[tokio::test]
async fn test_put_posts_commit_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .and(header("authorization", "Bearer the-token"))
        .and(header("accept", "application/vnd.github+json"))
        .and(body_partial_json(json!({
            "state": "success",
            "context": "unit-tests",
            "description": "Build 42",
            "target_url": "https://ci.example.com/teams/main/pipelines/beacon/jobs/unit-tests/builds/42",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let response = put(&resource(), &request, dir.path()).await.unwrap();

    assert_eq!(response["version"], json!({"ref": SHA}));
    assert_eq!(metadata(&response, "state").as_deref(), Some("success"));
    assert_eq!(metadata(&response, "commit").as_deref(), Some(SHA));
    assert_eq!(metadata(&response, "context").as_deref(), Some("unit-tests"));
    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_abort_is_reported_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .and(body_partial_json(json!({"state": "error"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "abort"}});
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(metadata(&response, "state").as_deref(), Some("abort"));
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "pending"}});
    let first = put(&resource(), &request, dir.path()).await.unwrap();
    let second = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(first["version"], second["version"]);
}

#[tokio::test]
async fn test_unseen_commit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "No commit found for SHA: 0123456789abcdef0123456789abcdef01234567",
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_retry_after_delays_next_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    // No backoff of its own, so any wait comes from the header.
    let policy = RetryPolicy {
        max_delay: Duration::from_secs(5),
        ..RetryPolicy::immediate(2)
    };
    let resource = Resource::new(concourse_build()).with_retry_policy(policy);
    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});

    let started = Instant::now();
    let response = put(&resource, &request, dir.path()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_retry_after_capped_by_max_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "3600"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let started = Instant::now();
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_server_errors_exhaust_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert_eq!(
        err,
        "put: sink github: giving up after 3 attempts: HTTP 503: Service Unavailable"
    );
}

#[tokio::test]
async fn test_bad_credentials_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert_eq!(
        err,
        "put: sink github: HTTP 401: Bad credentials (access_token is invalid or expired)"
    );
}

#[tokio::test]
async fn test_origin_must_match_source() {
    let server = MockServer::start().await;
    let dir = build_dir("https://github.com/someone-else/fork.git");
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert_eq!(
        err,
        "put: repository: git remote origin https://github.com/someone-else/fork.git does not match source the-owner/the-repo"
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_checkout_in_build_dir() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert!(err.starts_with("put: repository: found no git checkout in"));
}

// ============================================================================
// Chat sink
// ============================================================================

#[tokio::test]
async fn test_chat_failure_does_not_fail_put() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let mut source = source(&server);
    source["gchat_webhook"] = json!(webhook(&server));
    let dir = default_build_dir();
    let request = json!({"source": source, "params": {"state": "failure"}});
    let response = put(&resource(), &request, dir.path()).await.unwrap();

    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
    let chat = metadata(&response, "sink.gchat").unwrap();
    assert_eq!(chat, "failed after 3 attempts: HTTP 500: Internal Server Error");
    assert!(!response.to_string().contains("the-chat-token"));
}

#[tokio::test]
async fn test_params_webhook_alone_enables_chat() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    let request = json!({
        "source": source(&server),
        "params": {"state": "failure", "gchat_webhook": webhook(&server)},
    });
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(metadata(&response, "sink.github").as_deref(), Some("delivered"));
    assert_eq!(metadata(&response, "sink.gchat").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_chat_threads_and_renders_template() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("key", "the-key"))
        .and(query_param("threadKey", format!("beacon {SHA}")))
        .and(query_param(
            "messageReplyOption",
            "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD",
        ))
        .and(body_string_contains("unit-tests #42 failure on 0123456, ask ${ONCALL}"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "m"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = source(&server);
    source["gchat_webhook"] = json!(webhook(&server));
    let dir = default_build_dir();
    let request = json!({
        "source": source,
        "params": {
            "state": "failure",
            "chat_message": "${BUILD_JOB_NAME} #${BUILD_NAME} ${STATE} on ${SHORT_COMMIT}, ask ${ONCALL}",
        },
    });
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(metadata(&response, "sink.gchat").as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_chat_message_file_relative_to_build_dir() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_string_contains("release notes for beacon"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = default_build_dir();
    fs::write(
        dir.path().join("notes/message.txt"),
        "release notes for ${BUILD_PIPELINE_NAME}\n",
    )
    .unwrap();

    let mut source = source(&server);
    source["gchat_webhook"] = json!(webhook(&server));
    source["chat_always"] = json!(true);
    let request = json!({
        "source": source,
        "params": {"state": "success", "chat_message_file": "notes/message.txt"},
    });
    put(&resource(), &request, dir.path()).await.unwrap();
}

#[tokio::test]
async fn test_chat_skipped_for_quiet_states() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut source = source(&server);
    source["gchat_webhook"] = json!(webhook(&server));
    let dir = default_build_dir();
    let request = json!({"source": source, "params": {"state": "success"}});
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(
        metadata(&response, "sink.gchat").as_deref(),
        Some("skipped: state success not in chat_notify_on_states")
    );
}

#[tokio::test]
async fn test_chat_only_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // The origin does not matter without the status sink.
    let dir = build_dir("https://example.com/unrelated.git");
    let request = json!({
        "source": {"sinks": ["gchat"], "gchat_webhook": webhook(&server)},
        "params": {"state": "error"},
    });
    let response = put(&resource(), &request, dir.path()).await.unwrap();
    assert_eq!(response["version"], json!({"ref": SHA}));
    assert_eq!(metadata(&response, "context"), None);
    assert_eq!(metadata(&response, "sink.github"), None);
}

#[tokio::test]
async fn test_params_select_sinks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = source(&server);
    source["gchat_webhook"] = json!(webhook(&server));
    let dir = default_build_dir();
    let request = json!({
        "source": source,
        "params": {"state": "failure", "sinks": ["gchat"]},
    });
    put(&resource(), &request, dir.path()).await.unwrap();
}

// ============================================================================
// Validation and output
// ============================================================================

#[tokio::test]
async fn test_unknown_sink_rejected_before_any_request() {
    let server = MockServer::start().await;
    let dir = default_build_dir();
    let mut source = source(&server);
    source["sinks"] = json!(["github", "ghost"]);
    let request = json!({"source": source, "params": {"state": "success"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert_eq!(err, "put: source: invalid sink(s): [ghost]");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_param_rejected() {
    let server = MockServer::start().await;
    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success", "colour": "red"}});
    let err = put(&resource(), &request, dir.path()).await.unwrap_err();
    assert!(err.starts_with("put: parsing JSON from stdin: unknown field `colour`"));
}

struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "test write error"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_output_failure_reported() {
    let server = MockServer::start().await;
    mount_status(&server, 201, json!({})).await;
    let dir = default_build_dir();
    let request = json!({"source": source(&server), "params": {"state": "success"}});
    let err = resource()
        .put(request.to_string().as_bytes(), &mut FailingWriter, Some(dir.path()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "put: preparing output: test write error");
}
