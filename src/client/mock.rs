//! Mock backend for testing. No real HTTP calls.

use super::traits::*;
use crate::models::fallback_models;
use crate::stream::StreamEvent;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Mock chat backend. Each `stream_chat` call plays the next script.
///
/// A script that completes under a conversation id the mock doesn't know
/// yet adds that conversation, titled from the prompt, the way the server
/// persists a new chat.
pub struct MockBackend {
    scripts: std::sync::Mutex<Vec<Vec<StreamEvent>>>,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
    conversations: std::sync::Mutex<HashMap<i64, Conversation>>,
    models: Vec<ModelInfo>,
}

impl MockBackend {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: std::sync::Mutex::new(scripts),
            requests: std::sync::Mutex::new(Vec::new()),
            conversations: std::sync::Mutex::new(HashMap::new()),
            models: fallback_models(),
        }
    }

    /// Convenience: one exchange that streams `chunks` then completes.
    pub fn reply(conversation_id: i64, message_id: i64, chunks: &[&str]) -> Self {
        let mut script = vec![StreamEvent::Init { conversation_id }];
        script.extend(chunks.iter().map(|c| StreamEvent::content(*c)));
        script.push(StreamEvent::Complete {
            conversation_id: Some(conversation_id),
            message_id,
        });
        Self::new(vec![script])
    }

    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id, conversation);
        self
    }

    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let title = title_from_prompt(&request.message);
        self.requests.lock().unwrap().push(request);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![StreamEvent::error("(no more mock responses)")]
            } else {
                scripts.remove(0)
            }
        };

        for event in script {
            if cancel.is_cancelled() {
                return;
            }
            if let StreamEvent::Complete {
                conversation_id: Some(id),
                ..
            } = &event
            {
                self.conversations
                    .lock()
                    .unwrap()
                    .entry(*id)
                    .or_insert_with(|| Conversation::new(*id, title.clone()));
            }
            let _ = tx.send(event);
            tokio::task::yield_now().await;
        }
    }

    async fn load_conversation(&self, id: i64) -> Result<Conversation, ClientError> {
        self.conversations
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn recent_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let mut listing: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .map(|c| Conversation::new(c.id, c.title.clone()))
            .collect();
        listing.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(listing)
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        self.conversations
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }

    async fn models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }
}

fn not_found(id: i64) -> ClientError {
    ClientError::Http {
        status: 404,
        message: format!("Conversation not found with id: {id}"),
    }
}
