use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use stitch_core::intent;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

fn default_model() -> String {
    "stitch-intent-router".to_string()
}

type ChatResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

/// POST /chat
///
/// OpenAI-shaped completions backed by the deterministic intent classifier,
/// not a language model. Usage numbers are whitespace word counts; the
/// response marks them advisory so clients do not bill against them.
pub async fn post_chat(
    body: Result<Json<ChatRequest>, axum::extract::rejection::JsonRejection>,
) -> ChatResult {
    let Json(request) = body.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("malformed request: {e}") })),
        )
    })?;

    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .ok_or_else(|| {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({
                    "error": "messages must contain at least one user message",
                    "fields": [{ "field": "messages", "message": "no user role present" }],
                })),
            )
        })?;

    let classified = intent::classify(&last_user.content);
    let content = intent::respond(classified);

    let prompt_tokens: usize = request
        .messages
        .iter()
        .map(|m| intent::approx_tokens(&m.content))
        .sum();
    let completion_tokens = intent::approx_tokens(&content);

    Ok(Json(serde_json::json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
        "usage_note": "token counts are word-count approximations, advisory only",
        "intent": classified,
    })))
}
