use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::cache::SearchCache;
use crate::clock::Clock;
use crate::completion::CompletionClient;
use crate::config::Args;
use crate::conversation::ConversationStore;
use crate::error::{GatewayError, Result};
use crate::handlers::{
    chat_handler, chat_stream_handler, health_handler, history_handler, metrics_handler,
    quota_handler, reset_handler,
};
use crate::models::ChatJob;
use crate::rate_limit::RateLimiter;
use crate::search::{SearchClient, WebSearch};
use crate::state::AppState;
use crate::worker::ChatWorker;

/// Builds the shared state and the chat worker that drains its queue.
pub fn build(
    args: &Args,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<AppState>, ChatWorker, mpsc::Receiver<ChatJob>)> {
    if args.api_key.trim().is_empty() {
        return Err(GatewayError::Config("completion API key is empty".to_string()));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.request_timeout))
        .build()
        .map_err(|e| GatewayError::Config(format!("cannot build HTTP client: {e}")))?;

    let completion = CompletionClient::new(
        client.clone(),
        &args.completion_url,
        args.api_key.clone(),
        args.model.clone(),
        args.sampling(),
    );

    let search = args.search_credentials().map(|(key, cx)| {
        Arc::new(SearchClient::new(
            client.clone(),
            args.search_url.clone(),
            key,
            cx,
            args.search_results,
        )) as Arc<dyn WebSearch>
    });
    if search.is_none() {
        info!("search credentials not set - web search disabled");
    }

    let limiter = Arc::new(RateLimiter::new(args.rate_limits(), clock.clone()));
    let conversations = Arc::new(ConversationStore::new(args.system_prompt.clone()));
    let (chat_tx, chat_rx) = mpsc::channel::<ChatJob>(args.queue_size.max(1));

    let worker = ChatWorker {
        limiter: limiter.clone(),
        conversations: conversations.clone(),
        completion: Arc::new(completion),
        search,
        cache: SearchCache::new(Duration::from_secs(args.cache_ttl), clock),
        cards_site: args.search_site.clone(),
    };

    let state = Arc::new(AppState {
        limiter,
        conversations,
        chat_tx,
    });
    Ok((state, worker, chat_rx))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route(
            "/api/conversations/{user_id}",
            get(history_handler).delete(reset_handler),
        )
        .route("/api/quota/{service}", get(quota_handler))
        .with_state(state)
}

// build, spawn the worker, hand back the router
pub fn spawn(args: &Args, clock: Arc<dyn Clock>) -> Result<Router> {
    let (state, worker, chat_rx) = build(args, clock)?;
    tokio::spawn(worker.run(chat_rx));
    Ok(router(state))
}
