use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::error::GatewayError;
use crate::metrics::{CHAT_LATENCY, CHAT_REQUESTS};
use crate::models::{ChatJob, ChatReply, ChatRequest};
use crate::state::AppState;

type WorkerReply = Result<Result<ChatReply, GatewayError>, oneshot::error::RecvError>;

async fn enqueue(
    state: &AppState,
    request: ChatRequest,
    fragments: Option<mpsc::UnboundedSender<String>>,
) -> Result<oneshot::Receiver<Result<ChatReply, GatewayError>>, GatewayError> {
    let (response_tx, response_rx) = oneshot::channel();
    let job = ChatJob {
        request,
        fragments,
        response_tx,
    };

    state
        .chat_tx
        .send(job)
        .await
        .map_err(|_| GatewayError::Unavailable("chat queue is closed".to_string()))?;
    Ok(response_rx)
}

fn worker_gone(_: oneshot::error::RecvError) -> GatewayError {
    GatewayError::Unavailable("chat worker failed to respond".to_string())
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, GatewayError> {
    CHAT_REQUESTS.inc();
    let start_time = Instant::now();

    let response_rx = enqueue(&state, payload, None).await?;
    let result = response_rx.await.map_err(worker_gone)?;

    CHAT_LATENCY.observe(start_time.elapsed().as_secs_f64());
    result.map(Json)
}

enum Progress {
    Streaming(
        mpsc::UnboundedReceiver<String>,
        oneshot::Receiver<Result<ChatReply, GatewayError>>,
    ),
    Finished,
}

/// Same turn as `chat_handler`, answered as server-sent events: a `token`
/// event per fragment, then a single `done` or `error` event.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    CHAT_REQUESTS.inc();
    let start_time = Instant::now();

    let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
    let response_rx = enqueue(&state, payload, Some(fragment_tx)).await?;

    let events = stream::unfold(
        Progress::Streaming(fragment_rx, response_rx),
        move |progress| async move {
            match progress {
                Progress::Streaming(mut fragments, response_rx) => match fragments.recv().await {
                    Some(text) => Some((
                        Ok(Event::default().event("token").data(text)),
                        Progress::Streaming(fragments, response_rx),
                    )),
                    None => {
                        let reply = response_rx.await;
                        CHAT_LATENCY.observe(start_time.elapsed().as_secs_f64());
                        Some((Ok(final_event(reply)), Progress::Finished))
                    }
                },
                Progress::Finished => None,
            }
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn final_event(reply: WorkerReply) -> Event {
    let outcome = reply.map_err(worker_gone).and_then(|r| r);
    let event = match &outcome {
        Ok(reply) => Event::default().event("done").json_data(reply),
        Err(e) => Event::default().event("error").json_data(e.body()),
    };
    event.unwrap_or_else(|e| {
        error!(error = %e, "could not encode final stream event");
        Event::default().event("error").data("internal error")
    })
}

