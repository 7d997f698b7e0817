use dashmap::DashMap;

use crate::models::{ChatMessage, Role};

// Chat history per user, each seeded with the system prompt
pub struct ConversationStore {
    system_prompt: String,
    conversations: DashMap<String, Vec<ChatMessage>>,
}

impl ConversationStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            conversations: DashMap::new(),
        }
    }

    /// Messages sent to the model: system prompt, every earlier turn, then
    /// `question` as the newest user message.
    pub fn transcript(&self, user_id: &str, question: &str) -> Vec<ChatMessage> {
        let mut messages = match self.conversations.get(user_id) {
            Some(history) => history.clone(),
            None => vec![ChatMessage::system(&self.system_prompt)],
        };
        messages.push(ChatMessage::user(question));
        messages
    }

    pub fn record_turn(&self, user_id: &str, question: &str, answer: &str) {
        let mut history = self
            .conversations
            .entry(user_id.to_string())
            .or_insert_with(|| vec![ChatMessage::system(&self.system_prompt)]);
        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(answer));
    }

    // Visible history, system prompt left out
    pub fn history(&self, user_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .get(user_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn reset(&self, user_id: &str) -> bool {
        self.conversations.remove(user_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_starts_with_system_prompt() {
        let store = ConversationStore::new("be helpful");
        let transcript = store.transcript("default", "hi");
        assert_eq!(transcript, vec![ChatMessage::system("be helpful"), ChatMessage::user("hi")]);
        assert!(store.history("default").is_empty());
    }

    #[test]
    fn turns_accumulate_per_user() {
        let store = ConversationStore::new("sys");
        store.record_turn("alice", "q1", "a1");
        store.record_turn("alice", "q2", "a2");
        store.record_turn("bob", "other", "reply");

        let transcript = store.transcript("alice", "q3");
        assert_eq!(transcript.len(), 6);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[4], ChatMessage::assistant("a2"));

        let history = store.history("alice");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ChatMessage::user("q1"));
    }

    #[test]
    fn reset_drops_history() {
        let store = ConversationStore::new("sys");
        store.record_turn("alice", "q", "a");
        assert!(store.reset("alice"));
        assert!(!store.reset("alice"));
        assert!(store.history("alice").is_empty());
    }
}
