use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use stitch_core::catalog::{TemplateCategory, TemplateDescriptor, TemplateRef};
use stitch_core::registry;

/// Discovery operations enumerated for GET and accepted by POST.
const OPERATIONS: &[(&str, &str)] = &[
    ("list_categories", "categories with template counts"),
    ("list_templates", "descriptors in one category; params: {category}"),
    ("get_template", "one descriptor; params: {template_id: \"category:slug\"}"),
    ("compose_system", "pointer to POST /compose; params: {system_name}"),
    ("get_pipeline_stage", "one pipeline stage; params: {stage}"),
    ("get_capabilities", "capability catalog"),
    ("get_blueprint", "sample manifest; params: {blueprint_name}"),
];

/// GET /discover
pub async fn get_discover(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "stitch-server",
        "catalog_version": app.catalog.snapshot(),
        "operations": OPERATIONS
            .iter()
            .map(|(name, description)| serde_json::json!({
                "operation": name,
                "description": description,
            }))
            .collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub operation: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

type DiscoverResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

fn not_found(message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

fn string_param(params: &serde_json::Value, name: &str, operation: &str) -> Result<String, (StatusCode, Json<serde_json::Value>)> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| bad_request(format!("operation '{operation}' requires string param '{name}'")))
}

fn descriptor_view(descriptor: &TemplateDescriptor) -> serde_json::Value {
    serde_json::json!({
        "slug": descriptor.slug,
        "category": descriptor.category,
        "variables": descriptor.variables,
        "outputs": descriptor.outputs,
        "dependencies": descriptor.dependencies,
    })
}

/// POST /discover
pub async fn post_discover(
    State(app): State<AppState>,
    body: Result<Json<DiscoverRequest>, axum::extract::rejection::JsonRejection>,
) -> DiscoverResult {
    let Json(request) = body.map_err(|e| bad_request(format!("malformed request: {e}")))?;

    match request.operation.as_str() {
        "list_categories" => {
            let categories: Vec<serde_json::Value> = app
                .catalog
                .categories()
                .into_iter()
                .map(|(category, count)| {
                    serde_json::json!({ "category": category, "count": count })
                })
                .collect();
            Ok(Json(serde_json::json!({ "categories": categories })))
        }

        "list_templates" => {
            let raw = string_param(&request.params, "category", "list_templates")?;
            let category: TemplateCategory =
                raw.parse().map_err(|e: String| bad_request(e))?;
            let templates: Vec<serde_json::Value> = app
                .catalog
                .templates_in(category)
                .into_iter()
                .map(descriptor_view)
                .collect();
            Ok(Json(serde_json::json!({
                "category": category,
                "templates": templates,
            })))
        }

        "get_template" => {
            let raw = string_param(&request.params, "template_id", "get_template")?;
            let template_ref: TemplateRef =
                raw.parse().map_err(|e: String| bad_request(e))?;
            match app.catalog.resolve(template_ref.category, &template_ref.slug) {
                Some(descriptor) => Ok(Json(descriptor_view(descriptor))),
                None => Err(not_found(format!("template '{template_ref}' not in catalog"))),
            }
        }

        "compose_system" => {
            let system_name = string_param(&request.params, "system_name", "compose_system")?;
            Ok(Json(serde_json::json!({
                "system_name": system_name,
                "status": "use_compose_endpoint",
                "compose_endpoint": "/compose",
                "note": "POST the full manifest to /compose; discovery does not run compositions",
            })))
        }

        "get_pipeline_stage" => {
            let stage = string_param(&request.params, "stage", "get_pipeline_stage")?;
            match registry::pipeline_stage(&stage) {
                Some(stage) => Ok(Json(serde_json::to_value(stage).map_err(|e| {
                    bad_request(format!("stage serialization failed: {e}"))
                })?)),
                None => Err(not_found(format!("unknown pipeline stage '{stage}'"))),
            }
        }

        "get_capabilities" => Ok(Json(registry::capabilities())),

        "get_blueprint" => {
            let name = string_param(&request.params, "blueprint_name", "get_blueprint")?;
            match registry::blueprint(&name) {
                Some(manifest) => Ok(Json(serde_json::json!({
                    "blueprint_name": name,
                    "manifest": manifest,
                }))),
                None => Err(not_found(format!(
                    "unknown blueprint '{name}', available: {}",
                    registry::BLUEPRINT_NAMES.join(", ")
                ))),
            }
        }

        other => Err(bad_request(format!("unknown operation '{other}'"))),
    }
}
