use axum::http::StatusCode;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use stitch_server::state::ServerConfig;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a small template library on disk and load it as a catalog.
fn test_catalog(dir: &TempDir) -> stitch_core::catalog::Catalog {
    let write = |category: &str, slug: &str, descriptor: serde_json::Value| {
        let template_dir = dir.path().join(category).join(slug);
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(
            template_dir.join("template.json"),
            serde_json::to_vec_pretty(&descriptor).unwrap(),
        )
        .unwrap();
        std::fs::write(template_dir.join("README.md"), b"# {{system_name}}\n").unwrap();
    };
    write(
        "backend",
        "fastapi",
        serde_json::json!({ "slug": "fastapi", "category": "backend", "templated": ["README.md"] }),
    );
    write(
        "ai-agent",
        "research",
        serde_json::json!({ "slug": "research", "category": "ai-agent" }),
    );
    stitch_core::catalog::Catalog::load(dir.path()).unwrap()
}

fn test_app(dir: &TempDir) -> axum::Router {
    stitch_server::build_router(test_catalog(dir), ServerConfig::default())
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_raw(app, uri, serde_json::to_vec(&body).unwrap()).await
}

async fn post_raw(
    app: axum::Router,
    uri: &str,
    body: Vec<u8>,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn demo_manifest() -> serde_json::Value {
    serde_json::json!({
        "manifest_version": "1.0",
        "system_name": "demo-x",
        "org": "acme",
        "components": {
            "backend": { "template": "fastapi" },
            "ai_agents": [
                { "template": "research" },
                { "template": "orchestrator", "instance_name": "wf" }
            ]
        }
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_service_and_version() {
    let dir = TempDir::new().unwrap();
    let (status, json) = get(test_app(&dir), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "stitch-server");
    assert!(json["version"].is_string());
    assert!(json["timestamp"].is_string());
}

// ---------------------------------------------------------------------------
// Discover
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_discover_lists_operations_and_catalog_hash() {
    let dir = TempDir::new().unwrap();
    let (status, json) = get(test_app(&dir), "/discover").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["catalog_version"].as_str().unwrap().len() == 64);
    let ops: Vec<&str> = json["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["operation"].as_str().unwrap())
        .collect();
    for expected in [
        "list_categories",
        "list_templates",
        "get_template",
        "compose_system",
        "get_pipeline_stage",
        "get_capabilities",
        "get_blueprint",
    ] {
        assert!(ops.contains(&expected), "missing operation {expected}");
    }
}

#[tokio::test]
async fn discover_list_categories_counts_templates() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "list_categories" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let categories = json["categories"].as_array().unwrap();
    assert!(categories
        .iter()
        .any(|c| c["category"] == "backend" && c["count"] == 1));
}

#[tokio::test]
async fn discover_list_templates_requires_category_param() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "list_templates" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("category"));
}

#[tokio::test]
async fn discover_list_templates_returns_descriptors() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "list_templates", "params": { "category": "backend" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["templates"][0]["slug"], "fastapi");
}

#[tokio::test]
async fn discover_get_template_resolves_and_404s() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_template", "params": { "template_id": "backend:fastapi" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["slug"], "fastapi");

    let (status, _) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_template", "params": { "template_id": "backend:express" } }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn discover_unknown_operation_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "teleport" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("teleport"));
}

#[tokio::test]
async fn discover_malformed_json_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, _) = post_raw(test_app(&dir), "/discover", b"{nope".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn discover_pipeline_stage_and_capabilities() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_pipeline_stage", "params": { "stage": "scale" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["next_stage"], "discovery");

    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_capabilities" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "stitch");
    assert_eq!(json["pipeline_stages"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn discover_blueprint_returns_valid_manifest() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_blueprint", "params": { "blueprint_name": "research-stack" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["manifest"]["system_name"], "research-stack");

    let (status, _) = post_json(
        test_app(&dir),
        "/discover",
        serde_json::json!({ "operation": "get_blueprint", "params": { "blueprint_name": "nope" } }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Compose
// ---------------------------------------------------------------------------

#[tokio::test]
async fn compose_accepts_manifest_and_reports_skipped_dispatch() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(test_app(&dir), "/compose", demo_manifest()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "dispatched");
    assert_eq!(json["system_name"], "demo-x");
    assert_eq!(json["dispatch_event"], "scaffold-system");
    assert_eq!(json["dispatch_status"], "skipped");
    assert_eq!(json["manifest_path"], "manifests/demo-x.json");
    assert!(json["initiated_at"].is_string());
    assert!(json["note"].as_str().unwrap().contains("skipped"));
}

#[tokio::test]
async fn compose_malformed_json_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_raw(test_app(&dir), "/compose", b"{not json".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("malformed"));
}

#[tokio::test]
async fn compose_bad_system_name_is_422_with_field() {
    let dir = TempDir::new().unwrap();
    let mut manifest = demo_manifest();
    manifest["system_name"] = serde_json::json!("Bad_Name");
    let (status, json) = post_json(test_app(&dir), "/compose", manifest).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["kind"], "manifest_invalid");
    let fields = json["fields"].as_array().unwrap();
    assert!(fields.iter().any(|f| f["field"] == "system_name"));
}

#[tokio::test]
async fn compose_missing_required_fields_listed_in_error_map() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/compose",
        serde_json::json!({ "components": {} }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = json["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    for expected in ["manifest_version", "system_name", "org"] {
        assert!(fields.contains(&expected), "missing field {expected}");
    }
}

#[tokio::test]
async fn compose_duplicate_agent_instances_is_422() {
    let dir = TempDir::new().unwrap();
    let mut manifest = demo_manifest();
    manifest["components"]["ai_agents"] = serde_json::json!([
        { "template": "research" },
        { "template": "research" }
    ]);
    let (status, json) = post_json(test_app(&dir), "/compose", manifest).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["kind"], "manifest_invalid");
    let fields = json["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|f| f["field"] == "components.ai_agents[1].instance_name"
            && f["message"].as_str().unwrap().contains("'research'")));
}

/// Local listener that answers 401 to every request, standing in for a
/// worker that rejects the configured credentials.
async fn spawn_unauthorized_worker() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new()
        .fallback(|| async { axum::http::StatusCode::UNAUTHORIZED });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn compose_unauthorized_dispatch_reports_failed_on_the_wire() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        template_repo: Some("acme/worker".into()),
        dispatch_token: Some("revoked-token".into()),
        dispatch_api_base: spawn_unauthorized_worker().await,
        state_dir: dir.path().join("state"),
        ..ServerConfig::default()
    };
    let app = stitch_server::build_router(test_catalog(&dir), config);

    let (status, json) = post_json(app, "/compose", demo_manifest()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "dispatched");
    // The wire field never says "unauthorized"; the note carries the detail.
    assert_eq!(json["dispatch_status"], "failed");
    assert!(json["note"].as_str().unwrap().contains("credentials"));
}

#[tokio::test]
async fn compose_unknown_enum_slug_is_422() {
    let dir = TempDir::new().unwrap();
    let mut manifest = demo_manifest();
    manifest["components"]["backend"]["template"] = serde_json::json!("nodejs");
    let (status, json) = post_json(test_app(&dir), "/compose", manifest).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields = json["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|f| f["field"] == "components.backend.template"));
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_routes_compose_intent() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/chat",
        serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "be helpful" },
                { "role": "user", "content": "please scaffold a new saas system" }
            ]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "gpt-4o-mini");
    assert_eq!(json["intent"], "compose");
    assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));
    let content = json["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("/compose"));
    // Advisory word-count usage.
    assert_eq!(json["usage"]["prompt_tokens"], 8);
    assert!(json["usage_note"].as_str().unwrap().contains("advisory"));
}

#[tokio::test]
async fn chat_general_fallback() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/chat",
        serde_json::json!({
            "messages": [{ "role": "user", "content": "who are you?" }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["intent"], "general");
}

#[tokio::test]
async fn chat_without_user_message_is_422() {
    let dir = TempDir::new().unwrap();
    let (status, json) = post_json(
        test_app(&dir),
        "/chat",
        serde_json::json!({ "messages": [{ "role": "system", "content": "hi" }] }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["fields"][0]["field"] == "messages");
}

#[tokio::test]
async fn chat_malformed_body_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, _) = post_json(
        test_app(&dir),
        "/chat",
        serde_json::json!({ "messages": "not an array" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn configured_api_key_gates_compose() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        api_key: Some("secret".into()),
        ..ServerConfig::default()
    };
    let app = stitch_server::build_router(test_catalog(&dir), config);

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/compose")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(&demo_manifest()).unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn configured_api_key_accepts_valid_bearer() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        api_key: Some("secret".into()),
        ..ServerConfig::default()
    };
    let app = stitch_server::build_router(test_catalog(&dir), config);

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/compose")
        .header("content-type", "application/json")
        .header("authorization", "Bearer secret")
        .body(axum::body::Body::from(
            serde_json::to_vec(&demo_manifest()).unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
