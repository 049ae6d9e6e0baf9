use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use stitch_core::dispatch::{DispatchRecord, DispatchStatus};
use stitch_core::manifest::Manifest;
use stitch_core::{FieldError, StitchError};

type ComposeResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn unprocessable(errors: Vec<FieldError>) -> (StatusCode, Json<serde_json::Value>) {
    let err = StitchError::ManifestInvalid(errors);
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({
            "error": err.to_string(),
            "kind": err.kind(),
            "suggestion": err.suggestion(),
            "fields": err.field_errors(),
        })),
    )
}

/// POST /compose
///
/// Validates the manifest with the engine's schema and hands a dispatch
/// record to the worker. Dispatch failures do not fail the request: the
/// manifest was accepted, and the caller can retry delivery later, so the
/// response is 200 with `dispatch_status` reflecting the first attempt.
pub async fn post_compose(State(app): State<AppState>, body: Bytes) -> ComposeResult {
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("malformed JSON: {e}") })),
        )
    })?;

    let manifest = Manifest::from_value(&value).map_err(unprocessable)?;
    let errors = manifest.validate();
    if !errors.is_empty() {
        return Err(unprocessable(errors));
    }

    // Bounded work queue: all permits busy means the dispatcher is saturated.
    let _permit = app.dispatch_gate.clone().try_acquire_owned().map_err(|_| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "dispatch queue full, retry shortly",
                "kind": "dispatch_queue_full",
            })),
        )
    })?;

    let record = DispatchRecord::scaffold_system(manifest);
    let system_name = record.system_name().to_string();
    let manifest_path = record.payload.manifest_path.clone();
    let initiated_at = record.payload.initiated_at;
    let dispatch_event = record.event_type.clone();

    let status = app.dispatcher.clone().dispatch_detached(record).await;
    let note = match status {
        DispatchStatus::Delivered => "dispatched to the composition worker",
        DispatchStatus::Skipped => {
            "no worker credentials configured (TEMPLATE_REPO/DISPATCH_TOKEN); manifest accepted, dispatch skipped"
        }
        DispatchStatus::Failed => {
            "first dispatch attempt failed; retries continue in the background and land in the dispatch log"
        }
        DispatchStatus::Unauthorized => {
            "worker rejected the configured credentials; manifest accepted, re-dispatch after rotating DISPATCH_TOKEN"
        }
    };
    // The wire field takes only delivered|skipped|failed; a credential
    // rejection reports as failed, with the distinction carried in `note`.
    let wire_status = match status {
        DispatchStatus::Unauthorized => DispatchStatus::Failed,
        other => other,
    };

    Ok(Json(serde_json::json!({
        "status": "dispatched",
        "system_name": system_name,
        "dispatch_event": dispatch_event,
        "dispatch_status": wire_status,
        "initiated_at": initiated_at.to_rfc3339(),
        "manifest_path": manifest_path,
        "note": note,
    })))
}
