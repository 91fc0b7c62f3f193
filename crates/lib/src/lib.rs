//! Pulse core library: sessions, chat orchestration, archives, the Ollama client,
//! and the browser server, shared by the `pulse` binary.

pub mod archive;
pub mod chat;
pub mod config;
pub mod init;
pub mod llm;
pub mod session;
pub mod web;
