use std::collections::VecDeque;

use crate::capability::ChatMessage;
use crate::events::Exchange;

pub const DEFAULT_HISTORY_LIMIT: usize = 24;

/// Messages exchanged during the session, oldest first. Lives only as long as
/// the session.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn record(&mut self, exchange: &Exchange) {
        if let Some(user) = exchange.user.as_deref().filter(|t| !t.is_empty()) {
            self.push(ChatMessage::user(user));
        }
        let reply = exchange.reply.trim();
        if !reply.is_empty() {
            self.push(ChatMessage::assistant(reply));
        }
    }

    fn push(&mut self, message: ChatMessage) {
        if self.limit == 0 {
            return;
        }
        while self.messages.len() >= self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Role;

    #[test]
    fn keeps_the_most_recent_messages() {
        let mut history = ConversationHistory::new(3);
        for i in 0..3 {
            history.record(&Exchange {
                user: Some(format!("q{i}")),
                reply: format!("a{i}"),
            });
        }

        let texts: Vec<_> = history.snapshot().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["a1", "q2", "a2"]);
    }

    #[test]
    fn skips_empty_sides() {
        let mut history = ConversationHistory::default();
        history.record(&Exchange {
            user: None,
            reply: "Welcome.".into(),
        });
        history.record(&Exchange {
            user: Some(String::new()),
            reply: "  ".into(),
        });

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, Role::Assistant);
    }
}
