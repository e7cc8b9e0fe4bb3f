use axum::response::IntoResponse;

pub async fn health_check() -> impl IntoResponse {
    crate::response::ok(serde_json::json!({ "status": "ok" }))
}
