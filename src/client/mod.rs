pub mod config;
pub mod http;
pub mod mock;
pub mod traits;

pub use config::ClientConfig;
pub use http::ChatClient;
pub use mock::MockBackend;
pub use traits::*;
