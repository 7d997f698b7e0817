use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::models::ConversationView;
use crate::state::AppState;

pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<ConversationView> {
    let messages = state.conversations.history(&user_id);
    Json(ConversationView { user_id, messages })
}

pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.conversations.reset(&user_id);
    StatusCode::NO_CONTENT
}
