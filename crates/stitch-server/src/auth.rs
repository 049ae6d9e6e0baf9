use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Bearer-token middleware. With no `API_KEY` configured the middleware is a
/// transparent no-op (development mode). `/health` stays reachable without
/// credentials so external probes keep working.
pub async fn auth_middleware(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let Some(ref expected) = app.config.api_key else {
        return next.run(req).await;
    };

    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if presented == Some(expected.as_str()) {
        return next.run(req).await;
    }

    Response::builder()
        .status(401)
        .header("Content-Type", "application/json")
        .body(Body::from(
            r#"{"error":"unauthorized","kind":"authentication","suggestion":"send Authorization: Bearer <API_KEY>"}"#,
        ))
        .expect("infallible: all header values are valid ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppState, ServerConfig};
    use axum::http::StatusCode;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use stitch_core::catalog::Catalog;
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn test_app(api_key: Option<&str>) -> Router {
        let config = ServerConfig {
            api_key: api_key.map(String::from),
            ..ServerConfig::default()
        };
        let state = AppState::new(Catalog::empty(), config);
        Router::new()
            .route("/health", get(ok_handler))
            .route("/discover", get(ok_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
    }

    #[tokio::test]
    async fn no_key_passes_through() {
        let resp = test_app(None)
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn valid_bearer_passes_through() {
        let resp = test_app(Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_token_is_401() {
        let resp = test_app(Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_header_is_401() {
        let resp = test_app(Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_bypasses_auth() {
        let resp = test_app(Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
