use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::bus::{EngineEvent, EventBus, EventSource};
use shared::logger::sanitize_for_log;
use shared::{EngineError, EngineResult};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 1000;
const HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Dispatcher chat history, oldest first.
pub struct ChatLog {
    messages: RwLock<VecDeque<ChatMessage>>,
    bus: Arc<EventBus>,
}

impl ChatLog {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            bus,
        }
    }

    pub fn post(&self, sender: &str, text: &str) -> EngineResult<ChatMessage> {
        let sender = sender.trim();
        let text = text.trim();
        if sender.is_empty() {
            return Err(EngineError::InvalidMessage("sender is required".to_string()));
        }
        if text.is_empty() {
            return Err(EngineError::InvalidMessage("message is empty".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::InvalidMessage(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };

        {
            let mut messages = self.messages.write();
            messages.push_back(message.clone());
            while messages.len() > HISTORY_LIMIT {
                messages.pop_front();
            }
        }

        tracing::debug!(sender = %sanitize_for_log(&message.sender), text = %sanitize_for_log(&message.text), "Chat message");
        self.bus.publish(
            EventSource::Chat,
            EngineEvent::MessagePosted {
                id: message.id,
                sender: message.sender.clone(),
            },
        );
        Ok(message)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}
