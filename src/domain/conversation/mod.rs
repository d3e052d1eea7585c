use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::models::{Conversation, Message, Role};
use crate::storage::{self, KvStore, CONVERSATIONS_KEY};

pub const DEFAULT_CONVERSATION_NAME: &str = "New chat";
const TITLE_CHARS: usize = 20;

fn title_from(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_CHARS).collect();
    if content.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    title
}

type WriteLock<'a> = std::sync::MutexGuard<'a, ()>;

/// Conversation history kept in the client store, newest first.
///
/// All conversations live under one key, so every change is a
/// read-modify-write of the whole list. Clones share one write lock that
/// serializes those cycles.
#[derive(Clone)]
pub struct ConversationStore {
    store: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl ConversationStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock_writes(&self) -> ClientResult<WriteLock<'_>> {
        self.write_lock
            .lock()
            .map_err(|e| ClientError::Storage(format!("conversation lock poisoned: {e}")))
    }

    pub fn list(&self) -> ClientResult<Vec<Conversation>> {
        Ok(storage::read_json(self.store.as_ref(), CONVERSATIONS_KEY)?.unwrap_or_default())
    }

    fn write_all(&self, conversations: &[Conversation]) -> ClientResult<()> {
        storage::write_json(self.store.as_ref(), CONVERSATIONS_KEY, &conversations)
    }

    pub fn get(&self, conversation_id: &str) -> ClientResult<Conversation> {
        self.list()?
            .into_iter()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| ClientError::NotFound(format!("conversation {conversation_id}")))
    }

    pub fn create(&self) -> ClientResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_CONVERSATION_NAME.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&conversation)?;
        Ok(conversation)
    }

    /// Replaces a stored conversation in place, or prepends a new one.
    pub fn save(&self, conversation: &Conversation) -> ClientResult<()> {
        let _writes = self.lock_writes()?;
        let mut conversations = self.list()?;
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => conversations.insert(0, conversation.clone()),
        }
        self.write_all(&conversations)
    }

    pub fn rename(&self, conversation_id: &str, name: &str) -> ClientResult<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("conversation name cannot be empty".to_string()));
        }
        self.modify(conversation_id, |c| {
            c.name = name.to_string();
            Ok(())
        })
    }

    pub fn delete(&self, conversation_id: &str) -> ClientResult<()> {
        let _writes = self.lock_writes()?;
        let mut conversations = self.list()?;
        conversations.retain(|c| c.id != conversation_id);
        self.write_all(&conversations)
    }

    pub fn search(&self, query: &str) -> ClientResult<Vec<Conversation>> {
        let needle = query.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.messages.iter().any(|m| m.content.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Appends a message; the first message of an untitled conversation names it.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        image: Option<String>,
    ) -> ClientResult<Message> {
        let message = Message::new(role, content, image);
        self.push_message(conversation_id, message.clone())?;
        Ok(message)
    }

    pub fn push_message(&self, conversation_id: &str, message: Message) -> ClientResult<()> {
        self.modify(conversation_id, move |c| {
            if c.messages.is_empty() && c.name == DEFAULT_CONVERSATION_NAME && !message.content.trim().is_empty() {
                c.name = title_from(&message.content);
            }
            c.messages.push(message);
            Ok(())
        })
        .map(|_| ())
    }

    pub fn update_message(&self, conversation_id: &str, message_id: &str, content: &str) -> ClientResult<()> {
        self.modify(conversation_id, |c| {
            let message = c
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| ClientError::NotFound(format!("message {message_id}")))?;
            message.content = content.to_string();
            Ok(())
        })
        .map(|_| ())
    }

    pub fn remove_message(&self, conversation_id: &str, message_id: &str) -> ClientResult<()> {
        self.modify(conversation_id, |c| {
            c.messages.retain(|m| m.id != message_id);
            Ok(())
        })
        .map(|_| ())
    }

    fn modify<F>(&self, conversation_id: &str, f: F) -> ClientResult<Conversation>
    where
        F: FnOnce(&mut Conversation) -> ClientResult<()>,
    {
        let _writes = self.lock_writes()?;
        let mut conversations = self.list()?;
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| ClientError::NotFound(format!("conversation {conversation_id}")))?;
        f(conversation)?;
        conversation.updated_at = Utc::now();
        let updated = conversation.clone();
        self.write_all(&conversations)?;
        Ok(updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    AwaitingResponse { placeholder_id: String },
}

/// At most one reply may be outstanding per conversation.
#[derive(Default)]
pub struct ExchangeGuard {
    in_flight: Mutex<HashMap<String, String>>,
}

type InFlight<'a> = std::sync::MutexGuard<'a, HashMap<String, String>>;

impl ExchangeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ClientResult<InFlight<'_>> {
        self.in_flight
            .lock()
            .map_err(|e| ClientError::Storage(format!("exchange lock poisoned: {e}")))
    }

    pub fn state(&self, conversation_id: &str) -> ClientResult<ExchangeState> {
        Ok(match self.lock()?.get(conversation_id) {
            Some(placeholder_id) => ExchangeState::AwaitingResponse {
                placeholder_id: placeholder_id.clone(),
            },
            None => ExchangeState::Idle,
        })
    }

    /// Idle -> AwaitingResponse. Fails with `Busy` when a reply is already pending.
    ///
    /// The conversation returns to Idle when the ticket is finished or dropped.
    pub fn begin(self: &Arc<Self>, conversation_id: &str, placeholder_id: &str) -> ClientResult<ExchangeTicket> {
        let mut in_flight = self.lock()?;
        if in_flight.contains_key(conversation_id) {
            return Err(ClientError::Busy {
                conversation_id: conversation_id.to_string(),
            });
        }
        in_flight.insert(conversation_id.to_string(), placeholder_id.to_string());
        Ok(ExchangeTicket {
            guard: Arc::clone(self),
            conversation_id: Some(conversation_id.to_string()),
        })
    }

    fn release(&self, conversation_id: &str) -> Option<String> {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.remove(conversation_id),
            Err(poisoned) => poisoned.into_inner().remove(conversation_id),
        }
    }
}

/// Proof that a conversation is awaiting a reply.
pub struct ExchangeTicket {
    guard: Arc<ExchangeGuard>,
    conversation_id: Option<String>,
}

impl ExchangeTicket {
    /// AwaitingResponse -> Idle, handing back the placeholder that was waiting.
    pub fn finish(mut self) -> Option<String> {
        self.conversation_id.take().and_then(|id| self.guard.release(&id))
    }
}

impl Drop for ExchangeTicket {
    fn drop(&mut self) {
        if let Some(id) = self.conversation_id.take() {
            self.guard.release(&id);
        }
    }
}
