//! Stream one reply from a running chat backend.
//!
//! Run with:
//!   CHAT_API_BASE_URL=http://localhost:8080/api CHAT_API_TOKEN=... \
//!     cargo run --example chat -- "Explain ownership in two sentences"

use chatstream::*;
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Hello! Who are you?".into());

    let client = match ChatClient::from_env() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build client: {}", e);
            return;
        }
    };

    let mut session = ChatSession::new(client).on_event(|event| {
        if let StreamEvent::Content { text } = event {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
    });
    session.load_models().await;
    println!("Using model {}\n", session.model());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match session.send(prompt, cancel).await {
        SendOutcome::Completed {
            conversation_id: Some(conversation_id),
            message_id,
        } => println!("\n\n--- saved as message {message_id} in conversation {conversation_id} ---"),
        SendOutcome::Completed { message_id, .. } => {
            println!("\n\n--- saved as message {message_id} ---")
        }
        SendOutcome::Failed { message } => eprintln!("\n{}", message),
        SendOutcome::Interrupted => eprintln!("\n(interrupted)"),
    }
}
