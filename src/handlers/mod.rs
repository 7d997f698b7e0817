mod chat;
mod conversations;
mod health;
mod metrics;
mod quota;

pub use chat::{chat_handler, chat_stream_handler};
pub use conversations::{history_handler, reset_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use quota::quota_handler;
