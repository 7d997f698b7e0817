use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    pub static ref CHAT_REQUESTS: Counter =
        register_counter!("advisor_chat_requests_total", "Total number of chat turns received").unwrap();
    pub static ref UPSTREAM_CALLS: CounterVec = register_counter_vec!(
        "advisor_upstream_calls_total",
        "External API calls by service",
        &["service"]
    )
    .unwrap();
    pub static ref QUOTA_DENIALS: CounterVec = register_counter_vec!(
        "advisor_quota_denials_total",
        "Calls refused by the rate limiter by service",
        &["service"]
    )
    .unwrap();
    pub static ref SEARCH_CACHE_HITS: Counter =
        register_counter!("advisor_search_cache_hits_total", "Total search cache hits").unwrap();
    pub static ref SEARCH_CACHE_SIZE: Gauge =
        register_gauge!("advisor_search_cache_size", "Current number of cached searches").unwrap();
    pub static ref CHAT_LATENCY: Histogram = register_histogram!(
        "advisor_chat_latency_seconds",
        "Chat turn latency in seconds"
    )
    .unwrap();
}
