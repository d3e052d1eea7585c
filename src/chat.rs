//! One question-and-answer exchange inside a conversation.

use std::sync::Arc;
use tracing::{info, warn};

use crate::client::{ImageSource, ReplySource};
use crate::domain::conversation::{ConversationStore, ExchangeGuard};
use crate::domain::settings::SettingsService;
use crate::error::{ClientError, ClientResult};
use crate::models::{ChatMessage, Message, Role};

/// A stored assistant reply, ready to hand to the presenter.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message_id: String,
    pub text: String,
}

pub struct ChatService<R> {
    conversations: ConversationStore,
    settings: SettingsService,
    guard: Arc<ExchangeGuard>,
    source: Arc<R>,
}

impl<R> Clone for ChatService<R> {
    fn clone(&self) -> Self {
        Self {
            conversations: self.conversations.clone(),
            settings: self.settings.clone(),
            guard: self.guard.clone(),
            source: self.source.clone(),
        }
    }
}

impl<R: ReplySource> ChatService<R> {
    pub fn new(conversations: ConversationStore, settings: SettingsService, source: R) -> Self {
        Self {
            conversations,
            settings,
            guard: Arc::new(ExchangeGuard::new()),
            source: Arc::new(source),
        }
    }

    pub fn guard(&self) -> &ExchangeGuard {
        &self.guard
    }

    pub async fn send(&self, conversation_id: &str, text: &str, image: Option<ImageSource>) -> ClientResult<Reply> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(ClientError::Validation("type a question or attach an image".to_string()));
        }

        let settings = self.settings.load()?;
        let conversation = self.conversations.get(conversation_id)?;
        let placeholder = Message::new(Role::Assistant, "", None);
        let ticket = self.guard.begin(conversation_id, &placeholder.id)?;

        let preview = image.as_ref().map(ImageSource::preview);
        let mut history: Vec<ChatMessage> = conversation
            .messages
            .iter()
            .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
            .map(Message::to_chat_message)
            .collect();
        history.push(ChatMessage {
            role: Role::User,
            content: text.to_string(),
            image: preview.clone(),
        });

        self.conversations.append_message(conversation_id, Role::User, text, preview)?;
        self.conversations.push_message(conversation_id, placeholder.clone())?;

        info!(conversation = conversation_id, history = history.len(), "awaiting assistant reply");
        let outcome = self.source.reply(&history, &settings, image.as_ref()).await;
        let result = match outcome {
            Ok(reply) => self
                .conversations
                .update_message(conversation_id, &placeholder.id, &reply)
                .map(|_| Reply {
                    message_id: placeholder.id.clone(),
                    text: reply,
                }),
            Err(e) => {
                warn!(conversation = conversation_id, error = %e, "assistant reply failed");
                if let Err(cleanup) = self.conversations.remove_message(conversation_id, &placeholder.id) {
                    warn!(error = %cleanup, "could not remove reply placeholder");
                }
                Err(e)
            }
        };
        ticket.finish();
        result
    }
}
