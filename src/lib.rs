pub mod branch;
pub mod cli;
pub mod config;
pub mod error;
pub mod locale;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod store;
pub mod sync;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{ConversationSession, ConversationView, SessionEvent, SessionSettings, TurnOutcome, TurnState};
pub use store::{ConversationRepository, SqliteStore};
pub use tree::{Message, MessageStore, Role};
