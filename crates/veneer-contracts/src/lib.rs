pub mod console;
pub mod events;
pub mod messages;
pub mod placeholder;
pub mod prompts;
pub mod settings;
pub mod storage;
