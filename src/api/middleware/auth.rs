use crate::AppState;
use crate::models::SessionValidation;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// Validates the bearer session token and attaches an `AuthContext` to
/// the request. Every rejection reason collapses to a bare 401 here so
/// callers cannot probe which check failed; the precise reason stays in
/// the logs.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let token = if let Some(t) = auth_header {
        Some(t)
    } else {
        // Try query parameter
        let query = req.uri().query().unwrap_or_default();
        serde_urlencoded::from_str::<AuthQuery>(query)
            .ok()
            .and_then(|q| q.token)
    };

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match state.sessions.validate(&token).await {
        Ok(SessionValidation::Valid(context)) => {
            req.extensions_mut().insert(context);
            Ok(next.run(req).await)
        }
        Ok(SessionValidation::Invalid(reason)) => {
            tracing::debug!(
                reason = %reason,
                token_fingerprint = %crate::utils::token::fingerprint(&token),
                "session rejected"
            );
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            tracing::error!("session validation failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
