//! HTTP client for the chat backend (REST endpoints + streamed chat).

use super::config::ClientConfig;
use super::traits::*;
use crate::models::fallback_models;
use crate::retry::with_retry;
use crate::stream::{read_stream, StreamEvent, StreamHandler};
use crate::types::*;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const CHAT_PATH: &str = "/chat";
const CHAT_STREAM_PATH: &str = "/chat/stream";
const CONVERSATIONS_PATH: &str = "/conversations";
const MODELS_PATH: &str = "/models";
const MODELS_REFRESH_PATH: &str = "/models/refresh";

pub const DEFAULT_CONVERSATION_PAGE_SIZE: u32 = 20;
pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 50;

/// Client for one signed-in user. Credentials live in memory only.
pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
    user: Option<User>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            user: None,
        })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.config.token = Some(token.into());
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.config.token.is_some()
    }

    /// Forget the token and user.
    pub fn logout(&mut self) {
        self.config.token = None;
        self.user = None;
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    pub async fn login(&mut self, credentials: &LoginRequest) -> Result<AuthResponse, ClientError> {
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(credentials)
            .send()
            .await?;
        let auth: AuthResponse = parse_json(resp).await?;
        self.store_auth(&auth);
        Ok(auth)
    }

    pub async fn register(&mut self, details: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        let resp = self
            .http
            .post(self.url(REGISTER_PATH))
            .json(details)
            .send()
            .await?;
        let auth: AuthResponse = parse_json(resp).await?;
        self.store_auth(&auth);
        Ok(auth)
    }

    fn store_auth(&mut self, auth: &AuthResponse) {
        debug!("Signed in as {}", auth.user.username);
        self.config.token = Some(auth.token.clone());
        self.user = Some(auth.user.clone());
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    /// Non-streaming exchange: waits for the whole reply.
    pub async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let resp = self
            .authorized(self.http.post(self.url(CHAT_PATH)))
            .json(request)
            .send()
            .await?;
        parse_json(resp).await
    }

    /// Open `POST /chat/stream` and hand back the raw body.
    ///
    /// Fails before any byte is read when there is no token, when the
    /// token is rejected, on any other non-success status, or when the
    /// response has no body.
    pub async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>, ClientError> {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or_else(|| ClientError::Auth(SESSION_MISSING.into()))?;

        debug!(
            "Chat stream request: model={}, conversation={:?}, image={}",
            request.model,
            request.conversation_id,
            request.image.is_some()
        );

        let resp = self
            .http
            .post(self.url(CHAT_STREAM_PATH))
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if matches!(
            resp.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(ClientError::Auth(SESSION_EXPIRED.into()));
        }
        let resp = check_status(resp).await?;
        if resp.content_length() == Some(0) {
            return Err(ClientError::NoBody);
        }
        Ok(resp.bytes_stream())
    }

    /// Stream one exchange into `handler`.
    ///
    /// Never fails: every error, including ones raised before streaming
    /// starts, is reported once through `handler.on_error`. Cancelling the
    /// token drops the connection and returns without reporting anything.
    pub async fn send_message_stream<H>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
        cancel: CancellationToken,
    ) where
        H: StreamHandler + Send + ?Sized,
    {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Chat stream cancelled");
                return;
            }
            result = self.open_and_read(request, handler) => result,
        };

        if let Err(e) = result {
            warn!("Chat stream failed: {}", e);
            handler.on_error(&e.to_string());
        }
    }

    async fn open_and_read<H>(&self, request: &ChatRequest, handler: &mut H) -> Result<(), ClientError>
    where
        H: StreamHandler + Send + ?Sized,
    {
        let body = self.open_stream(request).await?;
        read_stream(body, handler).await
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    pub async fn create_conversation(&self) -> Result<Conversation, ClientError> {
        let resp = self
            .authorized(self.http.post(self.url(CONVERSATIONS_PATH)))
            .send()
            .await?;
        parse_json(resp).await
    }

    pub async fn list_conversations(&self, page: u32, size: u32) -> Result<Page<Conversation>, ClientError> {
        let path = format!("{CONVERSATIONS_PATH}?page={page}&size={size}");
        let listing: Listing<Conversation> = self.get_json(&path).await?;
        Ok(listing.into())
    }

    /// First page of the user's conversations, newest first.
    pub async fn recent_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        Ok(self
            .list_conversations(0, DEFAULT_CONVERSATION_PAGE_SIZE)
            .await?
            .content)
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Conversation, ClientError> {
        self.get_json(&format!("{CONVERSATIONS_PATH}/{id}")).await
    }

    pub async fn conversation_messages(
        &self,
        id: i64,
        page: u32,
        size: u32,
    ) -> Result<Page<Message>, ClientError> {
        let path = format!("{CONVERSATIONS_PATH}/{id}/messages?page={page}&size={size}");
        let listing: Listing<Message> = self.get_json(&path).await?;
        Ok(listing.into())
    }

    /// First page of a conversation's messages, oldest first.
    pub async fn conversation_history(&self, id: i64) -> Result<Vec<Message>, ClientError> {
        Ok(self
            .conversation_messages(id, 0, DEFAULT_MESSAGE_PAGE_SIZE)
            .await?
            .content)
    }

    pub async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        let resp = self
            .authorized(self.http.delete(self.url(&format!("{CONVERSATIONS_PATH}/{id}"))))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    /// Available models, or the built-in fallback list when the backend
    /// can't provide them.
    pub async fn models(&self) -> Vec<ModelInfo> {
        match self.get_json::<Vec<ModelInfo>>(MODELS_PATH).await {
            Ok(models) => models,
            Err(e) => {
                warn!("Model list unavailable, using fallback: {}", e);
                fallback_models()
            }
        }
    }

    /// Ask the backend to drop its cached model list.
    pub async fn refresh_models(&self) -> Result<String, ClientError> {
        let resp = self
            .authorized(self.http.post(self.url(MODELS_REFRESH_PATH)))
            .send()
            .await?;
        Ok(check_status(resp).await?.text().await?)
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        let url = url.as_str();
        let this = self;
        with_retry(&self.config.retry, move || async move {
            let resp = this.authorized(this.http.get(url)).send().await?;
            parse_json(resp).await
        })
        .await
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        mut tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        self.send_message_stream(&request, &mut tx, cancel).await;
    }

    async fn load_conversation(&self, id: i64) -> Result<Conversation, ClientError> {
        self.get_conversation(id).await
    }

    async fn recent_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        ChatClient::recent_conversations(self).await
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        ChatClient::delete_conversation(self, id).await
    }

    async fn models(&self) -> Vec<ModelInfo> {
        ChatClient::models(self).await
    }
}

/// Map a non-success response to a [`ClientError`].
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        return Err(ClientError::RateLimited { retry_after_ms });
    }

    let body = resp.text().await.unwrap_or_default();
    let server_message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ClientError::Auth(
            server_message.unwrap_or_else(|| SESSION_EXPIRED.to_string()),
        ));
    }

    let message = server_message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            body
        }
    });
    Err(ClientError::Http {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    check_status(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}
