mod commands;
pub mod client;
pub mod contacts;
pub mod context;
pub mod engine;
pub mod memory;
pub mod messages;
pub mod notifier;
pub mod postprocess;
pub mod prompt_engine;
pub mod render;
pub mod request;
pub mod types;

pub use client::CompletionClient;
pub use contacts::default_contacts;
pub use engine::ChatEngine;
pub use notifier::{ChangeEvent, ChangeKind, ChangeNotifier, Subscription};
