//! Incremental decoder for the chat backend's event stream.
//!
//! The backend frames its response as newline-delimited `event:` / `data:`
//! records. Bytes arrive in arbitrary chunks, so both UTF-8 decoding and
//! line splitting carry state across reads: a multi-byte character or a
//! logical line may straddle two network reads.

use serde_json::Value;
use tracing::{debug, warn};

/// Event label for assistant text. An absent label means the same thing.
pub const CONTENT_EVENT: &str = "content";
/// Event label whose data is a plain-text failure message.
pub const ERROR_EVENT: &str = "error";

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// One decoded unit of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fragment of assistant text, whitespace preserved.
    Content { text: String },
    /// The server created or resolved the conversation for this exchange.
    Init { conversation_id: i64 },
    /// The assistant message is finalized and persisted. The conversation
    /// comes from the payload, else from the stream's init payload; it is
    /// `None` only when the server named neither.
    Complete {
        conversation_id: Option<i64>,
        message_id: i64,
    },
    /// Server-reported failure partway through the stream.
    Error { message: String },
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Per-stream decoder state. Never shared between requests.
#[derive(Debug, Clone, Default)]
pub struct ParserState {
    pending_bytes: Vec<u8>,
    pending_line: String,
    current_event: String,
    has_completed: bool,
    conversation_id: Option<i64>,
}

impl ParserState {
    /// Bytes of a UTF-8 sequence cut off by the last read.
    pub fn pending_bytes(&self) -> &[u8] {
        &self.pending_bytes
    }

    /// Text after the last line separator.
    pub fn pending_line(&self) -> &str {
        &self.pending_line
    }

    /// Label from the most recent `event:` line not yet consumed by a `data:` line.
    pub fn current_event(&self) -> &str {
        &self.current_event
    }

    pub fn has_completed(&self) -> bool {
        self.has_completed
    }

    /// Conversation announced by the stream's init payload, if any.
    pub fn conversation_id(&self) -> Option<i64> {
        self.conversation_id
    }
}

/// Turns raw response bytes into [`StreamEvent`]s.
///
/// Feed every chunk read from the transport through [`feed`](Self::feed);
/// events come back in the order their framing lines were received.
/// Splitting the same bytes differently across calls yields the same events.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    state: ParserState,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn has_completed(&self) -> bool {
        self.state.has_completed
    }

    /// Decode one chunk and return every event its complete lines produce.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let text = self.decode_utf8(chunk);
        self.state.pending_line.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.state.pending_line.find('\n') {
            let mut line: String = self.state.pending_line.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// End of stream. A trailing partial line is dropped, never dispatched.
    pub fn finish(&mut self) {
        if !self.state.pending_line.is_empty() || !self.state.pending_bytes.is_empty() {
            debug!(
                "Discarding {} chars of unterminated stream data",
                self.state.pending_line.len()
            );
        }
        self.state.pending_line.clear();
        self.state.pending_bytes.clear();
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.state.pending_bytes);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        // Truncated sequence: wait for the next read.
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }
        self.state.pending_bytes = rest.to_vec();
        out
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.state.current_event = name.trim().to_string();
            return None;
        }

        let raw = line.strip_prefix(DATA_PREFIX)?;
        let data = raw.strip_prefix(' ').unwrap_or(raw);

        if data.is_empty() {
            // Blank data line inside prose is an intentional line break.
            let event = &self.state.current_event;
            if event.is_empty() || event == CONTENT_EVENT {
                self.state.current_event.clear();
                return Some(StreamEvent::content("\n"));
            }
            return None;
        }

        let event = std::mem::take(&mut self.state.current_event);
        if event == ERROR_EVENT {
            return Some(StreamEvent::error(data));
        }

        // Any well-formed JSON object is a control record, even one
        // carrying no ids we recognise.
        if data.starts_with('{') {
            match serde_json::from_str::<Value>(data) {
                Ok(payload) => return self.control(&payload),
                Err(e) => debug!("Data is not a control payload ({}), treating as content", e),
            }
        }

        Some(StreamEvent::content(data))
    }

    fn control(&mut self, payload: &Value) -> Option<StreamEvent> {
        let conversation_id = id_field(payload, "conversationId");
        if let Some(message_id) = id_field(payload, "messageId") {
            return self.complete(conversation_id, message_id);
        }
        if let Some(conversation_id) = conversation_id {
            self.state.conversation_id = Some(conversation_id);
            return Some(StreamEvent::Init { conversation_id });
        }
        debug!("Control payload without ids ignored: {}", payload);
        None
    }

    fn complete(&mut self, conversation_id: Option<i64>, message_id: i64) -> Option<StreamEvent> {
        if self.state.has_completed {
            warn!("Ignoring duplicate completion for message {}", message_id);
            return None;
        }
        self.state.has_completed = true;
        let conversation_id = conversation_id.or(self.state.conversation_id);
        if conversation_id.is_none() {
            warn!("Completion for message {} names no conversation", message_id);
        }
        Some(StreamEvent::Complete {
            conversation_id,
            message_id,
        })
    }
}

/// A present, non-zero integer id. Zero, null and non-numbers count as absent.
fn id_field(payload: &Value, key: &str) -> Option<i64> {
    payload
        .get(key)
        .and_then(Value::as_i64)
        .filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(input);
        decoder.finish();
        events
    }

    fn decode_split(input: &[u8], sizes: &[usize]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        let mut rest = input;
        let mut sizes = sizes.iter().cycle();
        while !rest.is_empty() {
            let n = (*sizes.next().unwrap()).min(rest.len()).max(1);
            let (head, tail) = rest.split_at(n);
            events.extend(decoder.feed(head));
            rest = tail;
        }
        decoder.finish();
        events
    }

    const TRANSCRIPT: &str = "event:init\ndata:{\"conversationId\":42}\n\n\
        event:content\ndata:Merhaba dünya, \n\n\
        event:content\ndata:日本語のテキスト 🦀\n\n\
        event:content\ndata:\n\n\
        : keep-alive\n\
        event:content\ndata:{not json\n\n\
        event:complete\ndata:{\"messageId\":7,\"conversationId\":42}\n\n";

    #[test]
    fn test_full_transcript() {
        let events = decode_all(TRANSCRIPT.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Init { conversation_id: 42 },
                StreamEvent::content("Merhaba dünya, "),
                StreamEvent::content("日本語のテキスト 🦀"),
                StreamEvent::content("\n"),
                StreamEvent::content("{not json"),
                StreamEvent::Complete {
                    conversation_id: Some(42),
                    message_id: 7
                },
            ]
        );
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let whole = decode_all(TRANSCRIPT.as_bytes());
        let splits: [&[usize]; 6] = [&[1], &[2], &[3], &[5, 1], &[7, 2, 13], &[64]];
        for sizes in splits {
            assert_eq!(
                decode_split(TRANSCRIPT.as_bytes(), sizes),
                whole,
                "split sizes {:?}",
                sizes
            );
        }
    }

    #[test]
    fn test_multibyte_split_is_buffered() {
        let mut decoder = StreamDecoder::new();
        let bytes = "data:ü\n".as_bytes();
        // Cut inside the two-byte 'ü'.
        assert!(decoder.feed(&bytes[..6]).is_empty());
        assert_eq!(decoder.state().pending_bytes().len(), 1);
        assert_eq!(decoder.feed(&bytes[6..]), vec![StreamEvent::content("ü")]);
        assert!(decoder.state().pending_bytes().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let events = decode_all(b"data:a\xffb\n");
        assert_eq!(events, vec![StreamEvent::content("a\u{FFFD}b")]);
    }

    #[test]
    fn test_partial_line_waits_for_separator() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: Hel").is_empty());
        assert_eq!(decoder.state().pending_line(), "data: Hel");
        assert_eq!(
            decoder.feed(b"lo\n"),
            vec![StreamEvent::content("Hello")]
        );
    }

    #[test]
    fn test_unterminated_tail_is_dropped() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: never finished").is_empty());
        decoder.finish();
        assert!(decoder.state().pending_line().is_empty());
    }

    #[test]
    fn test_plain_content_preserves_whitespace() {
        assert_eq!(
            decode_all(b"data: Hello, world!\n"),
            vec![StreamEvent::content("Hello, world!")]
        );
        assert_eq!(
            decode_all(b"data:  two leading and trailing  \n"),
            vec![StreamEvent::content(" two leading and trailing  ")]
        );
        assert_eq!(
            decode_all(b"data:word \n"),
            vec![StreamEvent::content("word ")]
        );
    }

    #[test]
    fn test_empty_data_is_line_break_under_content() {
        assert_eq!(decode_all(b"data:\n"), vec![StreamEvent::content("\n")]);
        assert_eq!(
            decode_all(b"event: content\ndata:\n"),
            vec![StreamEvent::content("\n")]
        );
        assert!(decode_all(b"event: init\ndata:\n").is_empty());
    }

    #[test]
    fn test_init_payload() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"conversationId\": 42}\n");
        assert_eq!(events, vec![StreamEvent::Init { conversation_id: 42 }]);
        assert_eq!(decoder.state().conversation_id(), Some(42));
        assert!(!decoder.has_completed());
    }

    #[test]
    fn test_complete_payload_sets_latch() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"conversationId\": 42, \"messageId\": 7}\n");
        assert_eq!(
            events,
            vec![StreamEvent::Complete {
                conversation_id: Some(42),
                message_id: 7
            }]
        );
        assert!(decoder.has_completed());
    }

    #[test]
    fn test_complete_at_most_once() {
        let events = decode_all(
            b"data:{\"conversationId\":1,\"messageId\":2}\ndata:{\"conversationId\":1,\"messageId\":3}\n",
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_complete_borrows_init_conversation() {
        let events = decode_all(b"data:{\"conversationId\":5}\ndata:{\"messageId\":9}\n");
        assert_eq!(
            events[1],
            StreamEvent::Complete {
                conversation_id: Some(5),
                message_id: 9
            }
        );
    }

    #[test]
    fn test_complete_without_any_conversation_still_latches() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"event:complete\ndata:{\"messageId\":7}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::Complete {
                conversation_id: None,
                message_id: 7
            }]
        );
        assert!(decoder.has_completed());
    }

    #[test]
    fn test_error_event_is_verbatim() {
        let events = decode_all(b"event: error\ndata: rate limited\n");
        assert_eq!(events, vec![StreamEvent::error("rate limited")]);

        // Plain text even when it looks like JSON.
        let events = decode_all(b"event:error\ndata:{\"messageId\":1}\n");
        assert_eq!(events, vec![StreamEvent::error("{\"messageId\":1}")]);
    }

    #[test]
    fn test_event_label_resets_after_dispatch() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"event: error\ndata: boom\ndata: after\n");
        assert_eq!(
            events,
            vec![StreamEvent::error("boom"), StreamEvent::content("after")]
        );
        assert_eq!(decoder.state().current_event(), "");
    }

    #[test]
    fn test_malformed_json_is_content() {
        assert_eq!(
            decode_all(b"data: {not json\n"),
            vec![StreamEvent::content("{not json")]
        );
        assert_eq!(
            decode_all(b"data: {\"a\": 1,}\n"),
            vec![StreamEvent::content("{\"a\": 1,}")]
        );
    }

    #[test]
    fn test_json_without_ids_is_swallowed() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"event:content\ndata:{\"answer\":1}\n").is_empty());
        assert_eq!(decoder.state().current_event(), "");
        assert!(!decoder.has_completed());

        // Ids of the wrong type, or zero, don't count.
        assert!(decode_all(b"data: {\"conversationId\": \"abc\"}\n").is_empty());
        assert!(decode_all(b"data: {\"messageId\": 0}\n").is_empty());
    }

    #[test]
    fn test_only_leading_brace_triggers_parse() {
        assert_eq!(
            decode_all(b"data:x {\"conversationId\":1}\n"),
            vec![StreamEvent::content("x {\"conversationId\":1}")]
        );
    }

    #[test]
    fn test_crlf_and_unknown_lines() {
        let events = decode_all(b": comment\r\nid: 3\r\nretry: 100\r\ndata: hi\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::content("hi")]);
    }
}
