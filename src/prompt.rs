use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::SearchHit;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful credit card recommendation assistant. \
Always provide at least one credit card recommendation regardless of the question. \
Focus on explaining the benefits and features of the recommended card.";

const CARD_KEYWORDS: &[&str] = &[
    "card",
    "credit",
    "cashback",
    "cash back",
    "rewards",
    "annual fee",
    "points",
    "miles",
    "balance transfer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Cards,
    General,
}

// Cards questions get the configured site filter, anything else searches the open web
pub fn select_topic(question: &str) -> Topic {
    let lower = question.to_lowercase();
    if CARD_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Topic::Cards
    } else {
        Topic::General
    }
}

pub fn site_filter(topic: Topic, cards_site: Option<&str>) -> Option<&str> {
    match topic {
        Topic::Cards => cards_site.filter(|s| !s.trim().is_empty()),
        Topic::General => None,
    }
}

pub fn format_hits(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i + 1, hit.title.trim());
        if !hit.snippet.trim().is_empty() {
            let _ = writeln!(out, "{}", hit.snippet.trim());
        }
        let _ = writeln!(out, "Source: {}", hit.link);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Question as sent to the model. Without hits it is the question itself.
pub fn augment(question: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return question.to_string();
    }
    format!(
        "Use the following web search results to answer. Cite sources by their number.\n\n\
         {}\n\nQuestion: {}",
        format_hits(hits),
        question
    )
}
