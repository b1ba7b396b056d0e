pub mod client;
pub mod models;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

pub use client::{ChatBackend, ChatClient, ClientConfig, ClientError, MockBackend};
pub use retry::RetryConfig;
pub use session::{ChatSession, ErrorBanner, SendOutcome};
pub use stream::{read_stream, StreamDecoder, StreamEvent, StreamHandler};
pub use types::*;
