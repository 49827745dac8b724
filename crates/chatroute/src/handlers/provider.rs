use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::llm::{ModelIds, Provider, ProviderStatus};
use crate::server::AppState;

#[derive(Serialize)]
pub struct ProviderStatusResponse {
    provider: Provider,
    model: String,
    models: ModelIds,
    base_url: String,
    status: ProviderStatus,
}

/// GET /api/provider
pub async fn provider_status(State(state): State<AppState>) -> Json<ProviderStatusResponse> {
    let context = &state.context;
    let model = context.default_model();
    let config = context.registry().provider_config(Some(context.current_provider()));

    Json(ProviderStatusResponse {
        provider: context.current_provider(),
        model: model.model_id().to_string(),
        models: config.models,
        base_url: model.base_url().to_string(),
        status: context.validate(),
    })
}
