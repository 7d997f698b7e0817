use clap::Parser;
use std::time::Duration;

use crate::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL, Sampling};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::rate_limit::{RateLimits, ServiceLimit};
use crate::search::DEFAULT_SEARCH_URL;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "card-advisor-gateway")]
#[command(about = "Rate-limited chat gateway for a credit card recommendation assistant")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Completion API base url (Together / OpenAI compatible)
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub completion_url: String,

    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.7)]
    pub top_p: f32,

    #[arg(long, default_value_t = 50)]
    pub top_k: u32,

    #[arg(long, default_value_t = 1.0)]
    pub repetition_penalty: f32,

    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    // Search API endpoint (Google Custom Search compatible)
    #[arg(long, default_value = DEFAULT_SEARCH_URL)]
    pub search_url: String,

    // Search is disabled unless both key and engine id are set
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub search_key: Option<String>,

    #[arg(long, env = "GOOGLE_CSE_ID")]
    pub search_engine_id: Option<String>,

    // Site filter applied to card questions, e.g. "nerdwallet.com"
    #[arg(long)]
    pub search_site: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub search_results: u8,

    // Search cache TTL in seconds
    #[arg(short, long, default_value_t = 300)]
    pub cache_ttl: u64,

    // Completion calls allowed per user per window
    #[arg(long, default_value_t = 60)]
    pub completion_rate_limit: usize,

    // Completion window in seconds
    #[arg(long, default_value_t = 3600)]
    pub completion_rate_window: u64,

    #[arg(long, default_value_t = 100)]
    pub search_rate_limit: usize,

    #[arg(long, default_value_t = 86400)]
    pub search_rate_window: u64,

    // Timeout for each external call in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout: u64,

    // Chat turns that may wait for the worker
    #[arg(long, default_value_t = 100)]
    pub queue_size: usize,
}

impl Args {
    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            completion: ServiceLimit::new(
                self.completion_rate_limit,
                Duration::from_secs(self.completion_rate_window),
            ),
            search: ServiceLimit::new(
                self.search_rate_limit,
                Duration::from_secs(self.search_rate_window),
            ),
        }
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repetition_penalty: self.repetition_penalty,
        }
    }

    pub fn search_credentials(&self) -> Option<(&str, &str)> {
        match (self.search_key.as_deref(), self.search_engine_id.as_deref()) {
            (Some(key), Some(cx)) if !key.is_empty() && !cx.is_empty() => Some((key, cx)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_quotas() {
        let args = Args::parse_from(["gateway", "--api-key", "k"]);
        assert_eq!(args.rate_limits(), RateLimits::default());
        assert_eq!(args.sampling(), Sampling::default());
        assert_eq!(args.model, DEFAULT_MODEL);
    }

    #[test]
    fn search_needs_key_and_engine() {
        let args = Args::parse_from([
            "gateway",
            "--api-key",
            "k",
            "--search-key",
            "sk",
            "--search-engine-id",
            "",
        ]);
        assert_eq!(args.search_credentials(), None);

        let args = Args::parse_from([
            "gateway",
            "--api-key",
            "k",
            "--search-key",
            "sk",
            "--search-engine-id",
            "cx",
        ]);
        assert_eq!(args.search_credentials(), Some(("sk", "cx")));
    }
}
