//! Integration tests for the webhook dispatcher.
//!
//! These tests run the real router against real git repositories: each
//! fixture creates a bare "remote" seeded with a kustomization file, and the
//! server clones from and pushes to it over the local transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use prometheus::Registry;
use tempfile::TempDir;
use tower::util::ServiceExt;

use capstan::config::{DeploymentConfig, RepositoryConfig};
use capstan::repo::Repository;
use capstan::server::{self, AppState, Deployment, HookMetrics};
use capstan::sync::SyncConfig;

const MANIFEST: &str = "\
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization

resources:
  - deployment.yaml

images:
  - name: app
    newTag: \"1.0\"
";

/// Test fixture wrapping a bare remote seeded with one manifest commit.
struct TestRemote {
    dir: TempDir,
}

impl TestRemote {
    fn new(manifest: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let remote = dir.path().join("remote.git");
        let seed = dir.path().join("seed");

        run_git(dir.path(), &["init", "--bare", "remote.git"]);
        run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        run_git(dir.path(), &["clone", remote.to_str().unwrap(), "seed"]);
        run_git(&seed, &["config", "user.email", "seed@example.com"]);
        run_git(&seed, &["config", "user.name", "Seed"]);
        run_git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(seed.join("kustomization.yaml"), manifest).unwrap();
        run_git(&seed, &["add", "kustomization.yaml"]);
        run_git(&seed, &["commit", "-m", "Seed manifest"]);
        run_git(&seed, &["push", "origin", "main"]);

        Self { dir }
    }

    fn url(&self) -> String {
        format!("file://{}", self.remote_path().display())
    }

    fn remote_path(&self) -> PathBuf {
        self.dir.path().join("remote.git")
    }

    /// Number of commits on main.
    fn commit_count(&self) -> usize {
        let output = git_output(
            &self.remote_path(),
            &["rev-list", "--count", "refs/heads/main"],
        );
        output.trim().parse().unwrap()
    }

    /// Manifest contents at the tip of main.
    fn manifest(&self) -> String {
        git_output(&self.remote_path(), &["show", "main:kustomization.yaml"])
    }

    /// Subject line of the tip commit.
    fn tip_message(&self) -> String {
        git_output(&self.remote_path(), &["log", "-1", "--format=%s", "main"])
            .trim()
            .to_string()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
}

fn repository_config(name: &str, url: &str) -> RepositoryConfig {
    RepositoryConfig {
        name: name.to_string(),
        url: url.to_string(),
        branch: "main".to_string(),
        username: "bot".to_string(),
        password: "unused-for-local-transport".to_string(),
        committer_name: "Capstan".to_string(),
        committer_email: "capstan@example.com".to_string(),
    }
}

fn deployment_config(name: &str, repository: &str, images: &[&str]) -> DeploymentConfig {
    DeploymentConfig {
        name: name.to_string(),
        repository: repository.to_string(),
        path: None,
        images: images.iter().map(|s| s.to_string()).collect(),
        message: None,
        argocd_app: None,
    }
}

fn state_for(
    repositories: Vec<RepositoryConfig>,
    deployments: Vec<DeploymentConfig>,
    secret_key: Option<&str>,
) -> Arc<AppState> {
    let repositories: HashMap<_, _> = repositories
        .into_iter()
        .map(|cfg| (cfg.name.clone(), Arc::new(Repository::new(cfg))))
        .collect();
    let deployments: HashMap<_, _> = deployments
        .into_iter()
        .map(|cfg| {
            let deployment = Deployment::new(cfg).unwrap();
            (deployment.name.clone(), Arc::new(deployment))
        })
        .collect();
    Arc::new(AppState {
        listen_address: "127.0.0.1:0".to_string(),
        deployments,
        repositories,
        argo: None,
        sync_config: SyncConfig::default(),
        metrics: HookMetrics::new(Registry::new()).unwrap(),
        secret_key: secret_key.map(String::from),
        allowed_ips: Vec::new(),
    })
}

fn hook_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, String) {
    let response = server::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

// =============================================================================
// Update Scenarios
// =============================================================================

#[tokio::test]
async fn update_commits_and_pushes_the_new_tag() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app"])],
        None,
    );

    let (status, body) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(remote.commit_count(), 2);
    assert_eq!(
        remote.manifest(),
        MANIFEST.replace("newTag: \"1.0\"", "newTag: \"2.0\"")
    );
    assert_eq!(remote.tip_message(), "[api] Version bumped to 2.0 by alice");
}

#[tokio::test]
async fn same_tag_is_a_no_op_without_a_commit() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app"])],
        None,
    );

    let (status, _) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"1.0","authorized_by":"alice"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert_eq!(remote.commit_count(), 1);
}

#[tokio::test]
async fn unmatched_required_image_fails_without_a_commit() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app", "sidecar"])],
        None,
    );

    let (status, body) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // Detail stays in the logs
    assert_eq!(body, "Internal server error");
    assert_eq!(remote.commit_count(), 1);
}

#[tokio::test]
async fn glob_pattern_with_no_match_still_updates_the_rest() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app", "worker-*"])],
        None,
    );

    let (status, _) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(remote.commit_count(), 2);
}

// =============================================================================
// Request Validation
// =============================================================================

#[tokio::test]
async fn unknown_json_field_is_rejected() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app"])],
        None,
    );

    let (status, body) = send(
        &state,
        hook_request(
            r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice","extra":1}"#,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("failed to decode payload"));
    assert_eq!(remote.commit_count(), 1);
}

#[tokio::test]
async fn missing_field_is_named_in_the_response() {
    let state = state_for(vec![], vec![], None);
    let (status, body) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"","authorized_by":"alice"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "missing field: tag_name");
}

#[tokio::test]
async fn whitespace_tag_is_rejected() {
    let state = state_for(vec![], vec![], None);
    let (status, body) = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"2 0","authorized_by":"alice"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid field: tag_name");
}

#[tokio::test]
async fn unknown_deployment_is_not_found() {
    let state = state_for(vec![], vec![], None);
    let (status, body) = send(
        &state,
        hook_request(r#"{"deployment":"ghost","tag_name":"2.0","authorized_by":"alice"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Deployment not found");
}

#[tokio::test]
async fn non_post_method_is_rejected() {
    let state = state_for(vec![], vec![], None);
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Gating and Ancillary Routes
// =============================================================================

#[tokio::test]
async fn missing_secret_key_is_forbidden() {
    let state = state_for(vec![], vec![], Some("swordfish"));
    let (status, _) = send(&state, hook_request("{}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn correct_secret_key_is_admitted() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app"])],
        Some("swordfish"),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("X-Key", "swordfish")
        .body(Body::from(
            r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice"}"#,
        ))
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn secret_key_does_not_guard_health() {
    let state = state_for(vec![], vec![], Some("swordfish"));
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn metrics_reflect_handled_hooks() {
    let state = state_for(vec![], vec![], None);
    let (status, _) = send(
        &state,
        hook_request(r#"{"deployment":"ghost","tag_name":"2.0","authorized_by":"alice"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("capstan_http_hooks_received{code=\"404\"} 1"));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn same_repository_requests_serialize() {
    let remote = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![repository_config("infra", &remote.url())],
        vec![deployment_config("api", "infra", &["app"])],
        None,
    );

    let first = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"2.0","authorized_by":"alice"}"#),
    );
    let second = send(
        &state,
        hook_request(r#"{"deployment":"api","tag_name":"3.0","authorized_by":"bob"}"#),
    );
    let ((status_a, _), (status_b, _)) = tokio::join!(first, second);

    // Interleaved fetch/push would make one push non-fast-forward; the
    // per-repository lock means both must land.
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(remote.commit_count(), 3);
    // Whichever request won the lock last is the tip
    let manifest = remote.manifest();
    assert!(manifest.contains("newTag: \"2.0\"") || manifest.contains("newTag: \"3.0\""));
}

#[tokio::test]
async fn different_repositories_proceed_independently() {
    let remote_a = TestRemote::new(MANIFEST);
    let remote_b = TestRemote::new(MANIFEST);
    let state = state_for(
        vec![
            repository_config("infra-a", &remote_a.url()),
            repository_config("infra-b", &remote_b.url()),
        ],
        vec![
            deployment_config("api-a", "infra-a", &["app"]),
            deployment_config("api-b", "infra-b", &["app"]),
        ],
        None,
    );

    let first = send(
        &state,
        hook_request(r#"{"deployment":"api-a","tag_name":"2.0","authorized_by":"alice"}"#),
    );
    let second = send(
        &state,
        hook_request(r#"{"deployment":"api-b","tag_name":"2.0","authorized_by":"alice"}"#),
    );
    let ((status_a, _), (status_b, _)) = tokio::join!(first, second);

    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(remote_a.commit_count(), 2);
    assert_eq!(remote_b.commit_count(), 2);
}
