//! Headless chat state: the message list, model choice and error banner a
//! UI renders, updated live while an exchange streams in.

use crate::client::{ChatBackend, ClientError};
use crate::models::{is_image_generation_model, pick_default_model, DEFAULT_MODEL_ID};
use crate::stream::StreamEvent;
use crate::types::*;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long an error banner stays up before clearing itself.
pub const ERROR_TIMEOUT: Duration = Duration::from_secs(10);

/// Sees every stream event before it is applied.
pub type EventObserver = Box<dyn FnMut(&StreamEvent) + Send>;

/// How one [`ChatSession::send`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed {
        /// `None` only if neither the server nor the session knew it.
        conversation_id: Option<i64>,
        message_id: i64,
    },
    Failed {
        message: String,
    },
    /// The stream ended or was cancelled before completing.
    Interrupted,
}

/// A transient error message.
#[derive(Debug, Clone)]
pub struct ErrorBanner {
    message: String,
    shown_at: Instant,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            shown_at: Instant::now(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_rate_limit(&self) -> bool {
        self.message.contains("429") || self.message.contains("Too Many Requests")
    }

    pub fn title(&self) -> &'static str {
        if self.is_rate_limit() {
            "Rate Limit Exceeded"
        } else {
            "Error"
        }
    }

    pub fn is_expired(&self) -> bool {
        self.shown_at.elapsed() >= ERROR_TIMEOUT
    }
}

/// Models sometimes emit HTML line breaks inside prose.
fn clean_chunk(text: &str) -> Cow<'_, str> {
    static LINE_BREAK: OnceLock<Regex> = OnceLock::new();
    LINE_BREAK
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern compiles"))
        .replace_all(text, "\n")
}

struct Exchange {
    placeholder: i64,
    prompt: String,
    seen_text: bool,
    outcome: Option<SendOutcome>,
}

#[derive(Debug, Default)]
struct ViewState {
    messages: Vec<Message>,
    conversations: Vec<Conversation>,
    conversation_id: Option<i64>,
    title: Option<String>,
    is_loading: bool,
    is_thinking: bool,
    error: Option<ErrorBanner>,
}

impl ViewState {
    fn message_mut(&mut self, id: i64) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn settle(&mut self) {
        self.is_loading = false;
        self.is_thinking = false;
    }

    fn apply(&mut self, exchange: &mut Exchange, event: &StreamEvent) {
        // Nothing after completion or a server error belongs to this exchange.
        if exchange.outcome.is_some() {
            debug!("Ignoring event after exchange ended: {:?}", event);
            return;
        }

        match event {
            StreamEvent::Content { text } => {
                let text = clean_chunk(text);
                if !exchange.seen_text && !text.trim().is_empty() {
                    exchange.seen_text = true;
                    self.settle();
                }
                if let Some(message) = self.message_mut(exchange.placeholder) {
                    message.content.push_str(&text);
                }
            }
            StreamEvent::Init { conversation_id } => {
                if self.conversation_id.is_none() {
                    self.conversation_id = Some(*conversation_id);
                    self.title = Some(title_from_prompt(&exchange.prompt));
                }
            }
            StreamEvent::Complete {
                conversation_id,
                message_id,
            } => {
                if let Some(message) = self.message_mut(exchange.placeholder) {
                    message.id = *message_id;
                    message.is_streaming = false;
                }
                if self.conversation_id.is_none() {
                    self.conversation_id = *conversation_id;
                }
                self.settle();
                exchange.outcome = Some(SendOutcome::Completed {
                    conversation_id: conversation_id.or(self.conversation_id),
                    message_id: *message_id,
                });
            }
            StreamEvent::Error { message } => {
                self.settle();
                self.messages.retain(|m| m.id != exchange.placeholder);
                self.error = Some(ErrorBanner::new(message.clone()));
                exchange.outcome = Some(SendOutcome::Failed {
                    message: message.clone(),
                });
            }
        }
    }
}

/// One user's chat screen, minus the screen.
///
/// Local messages get negative ids until the server assigns real ones, so
/// they never collide with persisted messages.
pub struct ChatSession {
    backend: Box<dyn ChatBackend>,
    model: String,
    models: Vec<ModelInfo>,
    view: ViewState,
    pending_image: Option<String>,
    observer: Option<EventObserver>,
    next_local_id: i64,
}

impl ChatSession {
    pub fn new(backend: impl ChatBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            model: DEFAULT_MODEL_ID.to_string(),
            models: Vec::new(),
            view: ViewState::default(),
            pending_image: None,
            observer: None,
            next_local_id: -1,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn on_event(mut self, observer: impl FnMut(&StreamEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    // -- state ---------------------------------------------------------------

    pub fn messages(&self) -> &[Message] {
        &self.view.messages
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.view.conversation_id
    }

    pub fn title(&self) -> &str {
        self.view
            .title
            .as_deref()
            .unwrap_or(DEFAULT_CONVERSATION_TITLE)
    }

    pub fn is_loading(&self) -> bool {
        self.view.is_loading
    }

    /// True until the first visible text of a reply arrives.
    pub fn is_thinking(&self) -> bool {
        self.view.is_thinking
    }

    /// The current banner, unless it has timed out.
    pub fn error(&self) -> Option<&ErrorBanner> {
        self.view.error.as_ref().filter(|b| !b.is_expired())
    }

    pub fn dismiss_error(&mut self) {
        self.view.error = None;
    }

    // -- models --------------------------------------------------------------

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// Fetch the model list and pick a default from it.
    pub async fn load_models(&mut self) {
        self.models = self.backend.models().await;
        self.model = pick_default_model(&self.models);
        debug!("Loaded {} models, selected {}", self.models.len(), self.model);
    }

    pub fn model_generates_images(&self) -> bool {
        is_image_generation_model(&self.model)
    }

    // -- conversations -------------------------------------------------------

    /// Sidebar listing, newest first. Empty until the first refresh.
    pub fn conversations(&self) -> &[Conversation] {
        &self.view.conversations
    }

    /// Reload the sidebar listing. On failure the old listing stays.
    pub async fn refresh_conversations(&mut self) -> Result<(), ClientError> {
        match self.backend.recent_conversations().await {
            Ok(conversations) => {
                debug!("Loaded {} conversations", conversations.len());
                self.view.conversations = conversations;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                Err(e)
            }
        }
    }

    /// Delete a conversation and refresh the listing. Deleting the open
    /// conversation also clears the chat.
    pub async fn delete_conversation(&mut self, id: i64) -> Result<(), ClientError> {
        if let Err(e) = self.backend.delete_conversation(id).await {
            warn!("Failed to delete conversation {}: {}", id, e);
            return Err(e);
        }
        if self.view.conversation_id == Some(id) {
            self.new_conversation();
        }
        self.view.conversations.retain(|c| c.id != id);
        self.refresh_conversations().await
    }

    pub async fn select_conversation(&mut self, id: i64) -> Result<(), ClientError> {
        let conversation = match self.backend.load_conversation(id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!("Failed to load conversation {}: {}", id, e);
                return Err(e);
            }
        };
        self.view.conversation_id = Some(conversation.id);
        self.view.title = Some(conversation.title);
        self.view.messages = conversation.messages;
        Ok(())
    }

    /// Start over; the next send creates a new conversation.
    pub fn new_conversation(&mut self) {
        self.view.messages.clear();
        self.view.conversation_id = None;
        self.view.title = None;
    }

    // -- sending -------------------------------------------------------------

    /// Attach a base64 image to the next message only.
    pub fn attach_image(&mut self, image_base64: impl Into<String>) {
        self.pending_image = Some(image_base64.into());
    }

    /// Send `text` and apply the streamed reply as it arrives.
    pub async fn send(&mut self, text: impl Into<String>, cancel: CancellationToken) -> SendOutcome {
        let text = text.into();
        let mut request = ChatRequest::new(text.clone(), self.model.clone());
        if let Some(id) = self.view.conversation_id {
            request = request.with_conversation(id);
        }

        let mut user_message = Message::user(self.allocate_id(), text.clone(), self.model.clone());
        if let Some(image) = self.pending_image.take() {
            user_message.image_url = Some(format!("{IMAGE_DATA_PREFIX}{image}"));
            request = request.with_image_base64(image);
        }
        let placeholder = self.allocate_id();
        self.view.messages.push(user_message);
        self.view
            .messages
            .push(Message::placeholder(placeholder, self.model.clone()));
        self.view.is_loading = true;
        self.view.is_thinking = true;
        self.view.error = None;

        let mut exchange = Exchange {
            placeholder,
            prompt: text,
            seen_text: false,
            outcome: None,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let Self {
            backend,
            view,
            observer,
            ..
        } = self;
        let produce = backend.stream_chat(request, tx, cancel);
        let consume = async {
            while let Some(event) = rx.recv().await {
                if let Some(observer) = observer.as_mut() {
                    observer(&event);
                }
                view.apply(&mut exchange, &event);
            }
        };
        tokio::join!(produce, consume);

        match exchange.outcome {
            Some(outcome @ SendOutcome::Completed { .. }) => {
                // The listing is a convenience; a failed refresh already logged.
                let _ = self.refresh_conversations().await;
                outcome
            }
            Some(outcome) => outcome,
            None => {
                debug!("Exchange ended without completion");
                view.settle();
                let empty = view.message_mut(placeholder).map(|message| {
                    message.is_streaming = false;
                    message.content.is_empty()
                });
                if empty == Some(true) {
                    view.messages.retain(|m| m.id != placeholder);
                }
                SendOutcome::Interrupted
            }
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_local_id;
        self.next_local_id -= 1;
        id
    }
}
