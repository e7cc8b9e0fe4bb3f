// Minimal bearer-token owner resolution: the presented token is the API key's own
// uuid. Full identity/RBAC (users, roles, JWTs) is out of scope for this backbone.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use common::errors::AuthError;
use common::models::Owner;
use uuid::Uuid;

use crate::response::ApiErrorResponse;
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(common::errors::ApiError::from(AuthError::MissingToken))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(common::errors::ApiError::from(AuthError::MissingToken))?;
    let api_key_id =
        Uuid::parse_str(token).map_err(|_| common::errors::ApiError::from(AuthError::InvalidApiKey))?;

    let api_key = state
        .api_keys
        .find_by_id(api_key_id)
        .await
        .map_err(|_| common::errors::ApiError::from(AuthError::InvalidApiKey))?;

    request.extensions_mut().insert(Owner { api_key_id: api_key.id, user_id: None });
    request.extensions_mut().insert(api_key);

    Ok(next.run(request).await)
}
