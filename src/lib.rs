//! Conversation engine for a roleplay chat front end.
//!
//! [`ChatEngine`] owns contacts and message history, groups messages into
//! turns, assembles the system prompt from persona, world-book and preset
//! documents, and talks to an OpenAI-compatible completions endpoint.
//! Renderers subscribe with [`ChatEngine::on_change`].

pub mod chat_manager;
pub mod config;
pub mod error;
pub mod logger;
pub mod providers;
pub mod serde_utils;
pub mod storage_manager;
pub mod utils;

pub use chat_manager::types::{
    Channel, Contact, DeleteTurnArgs, EngineState, Message, MessageMeta, MessageQuery, RerollArgs,
    Role, SendArgs,
};
pub use chat_manager::{ChangeEvent, ChangeKind, ChatEngine, Subscription};
pub use config::EngineConfig;
pub use error::{AppError, AppResult};
pub use logger::{init_logging, LogManager};
pub use storage_manager::{FileStore, KeyValueStore, MemoryStore};
