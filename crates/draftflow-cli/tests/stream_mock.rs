use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_url(server: &MockServer) -> String {
    format!("{}/api", server.uri())
}

#[tokio::test]
async fn test_generate_streams_text_and_reports_content_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/write/stream"))
        .and(body_partial_json(serde_json::json!({
            "system_prompt": "You are a travel writer.",
            "user_instructions": "Keep it short."
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("清晨的古城很安静。\n[CONTENT_ID:5f2a9b10]", "text/plain"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    let out = home.path().join("article.txt");

    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .args(["generate", "--prompt", "You are a travel writer."])
        .args(["--instructions", "Keep it short."])
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("清晨的古城很安静。"))
        .stdout(predicate::str::contains("CONTENT_ID").not())
        .stderr(predicate::str::contains("Content id: 5f2a9b10"));

    assert_eq!(fs::read_to_string(&out).unwrap(), "清晨的古城很安静。");
}

#[tokio::test]
async fn test_generate_applies_plan_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/write/stream"))
        .and(body_partial_json(serde_json::json!({
            "selected_options": {"use_markdown": true, "tone": "轻松"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    let plan = home.path().join("plan.json");
    fs::write(
        &plan,
        serde_json::json!({
            "persona": "作者",
            "article_type": "随笔",
            "system_prompt": "你是一名作者。",
            "content_outline": [],
            "writing_options": [
                {"id": "use_markdown", "label": "是否使用Markdown语法", "type": "toggle", "default": "否"},
                {"id": "tone", "label": "语气", "type": "select", "options": ["正式", "轻松"]}
            ]
        })
        .to_string(),
    )
    .unwrap();

    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .arg("generate")
        .arg("--plan")
        .arg(&plan)
        .args(["--option", "use_markdown=是", "--option", "tone=轻松"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let prompt = body["system_prompt"].as_str().unwrap();
    assert!(prompt.starts_with("你是一名作者。\n\n【用户选择的配置】\n"));
    assert!(prompt.contains("是否使用Markdown语法: true\n"));
    assert!(prompt.contains("语气: 轻松\n"));
}

#[tokio::test]
async fn test_generate_backend_error_exits_nonzero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/write/stream"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(serde_json::json!({"detail": "model offline"})),
        )
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .args(["generate", "--prompt", "anything"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("HTTP 500: model offline"));
}

#[tokio::test]
async fn test_expand_in_place_splices_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/expand"))
        .and(body_partial_json(serde_json::json!({
            "selected_text": "a short middle part"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("a long and vivid middle part", "text/plain"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    let doc = home.path().join("draft.md");
    fs::write(&doc, "Start. a short middle part. End.").unwrap();

    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .arg("expand")
        .arg("--file")
        .arg(&doc)
        .args(["--start", "7", "--end", "26", "--in-place"])
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(&doc).unwrap(),
        "Start. 【扩展内容开始】\na long and vivid middle part\n【扩展内容结束】. End."
    );
}

#[tokio::test]
async fn test_expand_failure_leaves_file_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/expand"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    let doc = home.path().join("draft.md");
    fs::write(&doc, "Start. a short middle part. End.").unwrap();

    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .arg("expand")
        .arg("--file")
        .arg(&doc)
        .args(["--start", "7", "--end", "26", "--in-place"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("left unchanged"));

    assert_eq!(
        fs::read_to_string(&doc).unwrap(),
        "Start. a short middle part. End."
    );
}

#[test]
fn test_expand_rejects_short_selection() {
    let home = tempdir().unwrap();
    let doc = home.path().join("draft.md");
    fs::write(&doc, "Start. a short middle part. End.").unwrap();

    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", "http://127.0.0.1:9/api")
        .arg("expand")
        .arg("--file")
        .arg(&doc)
        .args(["--start", "7", "--end", "12"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least 10 characters"));
}

#[tokio::test]
async fn test_generate_timeout_cancels_with_exit_130() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/write/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("never shown", "text/plain")
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let home = tempdir().unwrap();
    cargo_bin_cmd!("draftflow")
        .env("DRAFTFLOW_HOME", home.path())
        .env("DRAFTFLOW_BASE_URL", base_url(&server))
        .args(["generate", "--prompt", "slow", "--timeout-secs", "1"])
        .assert()
        .code(130)
        .stderr(predicate::str::contains("Cancelled."));
}
