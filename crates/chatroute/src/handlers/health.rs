use axum::extract::State;
use axum::http::StatusCode;

use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Ready once the startup provider has credentials.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, String) {
    let status = state.context.validate();
    match status.error {
        None => (StatusCode::OK, "ok".to_string()),
        Some(error) => (StatusCode::SERVICE_UNAVAILABLE, error),
    }
}
