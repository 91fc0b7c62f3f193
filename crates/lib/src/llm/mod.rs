//! LLM abstraction and Ollama client.
//!
//! Supports listing models and streaming chat completion against a local Ollama instance.

mod backend;
mod directory;
mod ollama;

pub use backend::{ChatBackend, ChatMessage, ChunkStream, LlmError, ModelDescriptor};
pub use directory::{install_hint, ModelDirectory, ModelListing, ModelReport, NO_MODELS_WARNING};
pub use ollama::{NdjsonDecoder, OllamaClient};
