pub mod decoder;
pub mod reader;

pub use decoder::{ParserState, StreamDecoder, StreamEvent, CONTENT_EVENT, ERROR_EVENT};
pub use reader::{read_stream, StreamHandler, STREAM_FAILED};
