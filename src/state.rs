use std::sync::Arc;
use tokio::sync::mpsc;

use crate::conversation::ConversationStore;
use crate::models::ChatJob;
use crate::rate_limit::RateLimiter;

// app's shared state

pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub conversations: Arc<ConversationStore>,
    pub chat_tx: mpsc::Sender<ChatJob>,
}
