//! Drives a [`StreamDecoder`] over a chunked response body.

use super::decoder::{StreamDecoder, StreamEvent};
use crate::client::ClientError;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Reported when a read fails without a usable message.
pub const STREAM_FAILED: &str = "Streaming failed";

/// Receives decoded events in arrival order.
pub trait StreamHandler {
    /// Assistant text to append.
    fn on_chunk(&mut self, text: &str);
    fn on_init(&mut self, _conversation_id: i64) {}
    fn on_complete(&mut self, _conversation_id: Option<i64>, _message_id: i64) {}
    fn on_error(&mut self, message: &str);
}

impl StreamEvent {
    /// Invoke the handler callback matching this event.
    pub fn dispatch<H: StreamHandler + ?Sized>(&self, handler: &mut H) {
        match self {
            Self::Content { text } => handler.on_chunk(text),
            Self::Init { conversation_id } => handler.on_init(*conversation_id),
            Self::Complete {
                conversation_id,
                message_id,
            } => handler.on_complete(*conversation_id, *message_id),
            Self::Error { message } => handler.on_error(message),
        }
    }
}

/// Forwards events to a channel. A dropped receiver is not an error.
impl StreamHandler for mpsc::UnboundedSender<StreamEvent> {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.send(StreamEvent::content(text));
    }

    fn on_init(&mut self, conversation_id: i64) {
        let _ = self.send(StreamEvent::Init { conversation_id });
    }

    fn on_complete(&mut self, conversation_id: Option<i64>, message_id: i64) {
        let _ = self.send(StreamEvent::Complete {
            conversation_id,
            message_id,
        });
    }

    fn on_error(&mut self, message: &str) {
        let _ = self.send(StreamEvent::error(message));
    }
}

/// Read `body` to the end, dispatching every decoded event to `handler`.
///
/// Server-reported `error` events are dispatched and reading continues so
/// the connection is fully drained. A read failure before the stream
/// completed is returned as [`ClientError::Stream`]; once the completion
/// payload has been seen, read failures only end the loop.
///
/// There is no timeout here. Cancel by dropping the future, which drops
/// the transport.
pub async fn read_stream<S, B, E, H>(body: S, handler: &mut H) -> Result<(), ClientError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    H: StreamHandler + ?Sized,
{
    futures::pin_mut!(body);
    let mut decoder = StreamDecoder::new();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.feed(bytes.as_ref()) {
                    event.dispatch(handler);
                }
            }
            Err(e) if decoder.has_completed() => {
                debug!("Read error after completion ignored: {}", e);
                break;
            }
            Err(e) => {
                let message = e.to_string();
                if message.is_empty() {
                    return Err(ClientError::Stream(STREAM_FAILED.into()));
                }
                return Err(ClientError::Stream(message));
            }
        }
    }

    decoder.finish();
    Ok(())
}
