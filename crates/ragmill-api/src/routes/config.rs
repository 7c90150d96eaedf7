//! Export/import endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use ragmill_core::ConfigDocument;

use super::ApiResult;
use crate::state::AppState;

pub async fn export_config(State(state): State<AppState>) -> ApiResult<Json<ConfigDocument>> {
    let document = state.service.export_config().await?;
    Ok(Json(document))
}

pub async fn import_config(
    State(state): State<AppState>,
    Json(document): Json<ConfigDocument>,
) -> ApiResult<Json<serde_json::Value>> {
    let imported = state.service.import_config(document).await?;
    Ok(Json(
        json!({ "message": format!("Successfully imported {} jobs", imported), "imported": imported }),
    ))
}
