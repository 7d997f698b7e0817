use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::models::DEFAULT_USER;
use crate::rate_limit::{QuotaStatus, Service};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct QuotaQuery {
    pub user_id: Option<String>,
}

pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(query): Query<QuotaQuery>,
) -> Result<Json<QuotaStatus>, GatewayError> {
    let service: Service = service.parse()?;
    let user_id = query.user_id.as_deref().unwrap_or(DEFAULT_USER);
    Ok(Json(state.limiter.usage(service, user_id)))
}
