use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";
pub const MAX_TITLE_LENGTH: usize = 50;
pub const TITLE_ELLIPSIS: &str = "...";

/// Prefix the backend stores in front of base64 image payloads.
pub const IMAGE_DATA_PREFIX: &str = "data:image/jpeg;base64,";

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    /// Base64 image payload, without the `data:` prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model: model.into(),
            conversation_id: None,
            image: None,
        }
    }

    /// Continue an existing conversation instead of starting a new one.
    pub fn with_conversation(mut self, conversation_id: i64) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_image_base64(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_image_bytes(self, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.with_image_base64(encoded)
    }

    pub fn with_image_file(self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(self.with_image_bytes(&bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: i64,
    pub message_id: i64,
}

// ---------------------------------------------------------------------------
// Conversations & messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Set while the assistant reply is still arriving. Never sent over the wire.
    #[serde(skip)]
    pub is_streaming: bool,
}

impl Message {
    pub fn user(id: i64, content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            model: Some(model.into()),
            image_url: None,
            created_at: None,
            is_streaming: false,
        }
    }

    /// Empty assistant message that stream fragments are appended to.
    pub fn placeholder(id: i64, model: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            model: Some(model.into()),
            image_url: None,
            created_at: None,
            is_streaming: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// An empty conversation with no timestamps, as a sidebar entry.
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            created_at: None,
            updated_at: None,
            messages: Vec::new(),
        }
    }
}

/// Title the backend assigns a fresh conversation from its first prompt.
pub fn title_from_prompt(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }
    if prompt.chars().count() > MAX_TITLE_LENGTH {
        let head: String = prompt.chars().take(MAX_TITLE_LENGTH).collect();
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        prompt.to_string()
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    /// Wrap a bare array so callers see one shape.
    pub fn single(content: Vec<T>) -> Self {
        let len = content.len();
        Self {
            content,
            total_elements: len as u64,
            total_pages: 1,
            number: 0,
            size: len as u32,
        }
    }

    pub fn is_last(&self) -> bool {
        self.number + 1 >= self.total_pages
    }
}

/// Listings come back either paged or as a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Listing<T> {
    Paged(Page<T>),
    Plain(Vec<T>),
}

impl<T> From<Listing<T>> for Page<T> {
    fn from(listing: Listing<T>) -> Self {
        match listing {
            Listing::Paged(page) => page,
            Listing::Plain(items) => Page::single(items),
        }
    }
}

// ---------------------------------------------------------------------------
// Models & errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub free: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, free: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            free,
        }
    }
}

/// JSON body the backend returns for failed REST calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}
