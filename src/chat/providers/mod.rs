//! Concrete chat client implementations.

pub mod openai;

pub use openai::OpenAiChatClient;
