pub mod app;
pub mod cache;
pub mod clock;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod rate_limit;
pub mod search;
pub mod state;
pub mod worker;
