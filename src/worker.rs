use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{SearchCache, make_cache_key};
use crate::completion::Completion;
use crate::conversation::ConversationStore;
use crate::error::{GatewayError, Result};
use crate::metrics::{QUOTA_DENIALS, SEARCH_CACHE_HITS, UPSTREAM_CALLS};
use crate::models::{ChatJob, ChatReply, ChatRequest, SearchHit};
use crate::prompt::{self, Topic};
use crate::rate_limit::{RateLimiter, Service};
use crate::search::WebSearch;

/// Handles chat turns one at a time, so each check-then-log against the
/// limiter completes before the next turn looks at the ledger.
pub struct ChatWorker {
    pub limiter: Arc<RateLimiter>,
    pub conversations: Arc<ConversationStore>,
    pub completion: Arc<dyn Completion>,
    // None when no search credentials are configured
    pub search: Option<Arc<dyn WebSearch>>,
    pub cache: SearchCache,
    pub cards_site: Option<String>,
}

struct Augmentation {
    hits: Vec<SearchHit>,
    notice: Option<String>,
}

impl Augmentation {
    fn skipped(notice: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            notice: Some(notice.into()),
        }
    }
}

impl ChatWorker {
    pub async fn run(self, mut rx: mpsc::Receiver<ChatJob>) {
        info!("chat worker started - processing turns sequentially");

        while let Some(job) = rx.recv().await {
            let ChatJob {
                request,
                fragments,
                response_tx,
            } = job;
            let result = self.handle(&request, fragments.as_ref()).await;
            // close the fragment stream before the final result goes out
            drop(fragments);
            let _ = response_tx.send(result);
        }

        info!("chat queue closed, worker stopping");
    }

    pub async fn handle(
        &self,
        request: &ChatRequest,
        fragments: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ChatReply> {
        let user = request.user_id.as_str();
        let question = request.message.trim();
        if question.is_empty() {
            return Err(GatewayError::InvalidRequest("message must not be empty".to_string()));
        }

        if !self.limiter.can_call(Service::Completion, user) {
            return Err(GatewayError::QuotaExceeded {
                service: Service::Completion,
                retry_after_secs: self.denied(Service::Completion, user),
            });
        }

        let topic = prompt::select_topic(question);
        let augmentation = if request.search {
            self.augment(question, topic, user).await
        } else {
            Augmentation {
                hits: Vec::new(),
                notice: None,
            }
        };

        let mut messages = self.conversations.transcript(user, question);
        if let Some(last) = messages.last_mut() {
            last.content = prompt::augment(question, &augmentation.hits);
        }

        UPSTREAM_CALLS.with_label_values(&[Service::Completion.as_str()]).inc();
        let answer = match fragments {
            Some(sink) => self.completion.complete_stream(&messages, sink).await,
            None => self.completion.complete(&messages).await,
        };
        // the attempt counts even when it failed
        self.limiter.log_call(Service::Completion, user);

        let answer = answer.inspect_err(|e| warn!(user, error = %e, "completion failed"))?;
        self.conversations.record_turn(user, question, &answer);
        info!(user, ?topic, sources = augmentation.hits.len(), "chat turn answered");

        Ok(ChatReply {
            reply: answer,
            topic,
            sources: augmentation.hits,
            notice: augmentation.notice,
        })
    }

    async fn augment(&self, question: &str, topic: Topic, user: &str) -> Augmentation {
        let Some(search) = &self.search else {
            return Augmentation::skipped("web search is not configured");
        };

        let site = prompt::site_filter(topic, self.cards_site.as_deref());
        let key = make_cache_key(question, site);
        if let Some(hits) = self.cache.get(&key) {
            SEARCH_CACHE_HITS.inc();
            return Augmentation { hits, notice: None };
        }

        if !self.limiter.can_call(Service::Search, user) {
            let retry_after_secs = self.denied(Service::Search, user);
            return Augmentation::skipped(format!(
                "search quota exhausted, answered without web results (retry in {retry_after_secs}s)"
            ));
        }

        UPSTREAM_CALLS.with_label_values(&[Service::Search.as_str()]).inc();
        let result = search.search(question, site).await;
        self.limiter.log_call(Service::Search, user);

        match result {
            Ok(hits) => {
                self.cache.insert(key, hits.clone());
                Augmentation { hits, notice: None }
            }
            Err(e) => {
                warn!(user, error = %e, "search failed, answering without it");
                Augmentation::skipped(format!("web search failed: {e}"))
            }
        }
    }

    // counts the refusal and returns seconds until a slot frees up
    fn denied(&self, service: Service, user: &str) -> u64 {
        QUOTA_DENIALS.with_label_values(&[service.as_str()]).inc();
        let status = self.limiter.usage(service, user);
        warn!(%service, user, retry_after_secs = status.retry_after_secs, "quota exhausted");
        status.retry_after_secs
    }
}
