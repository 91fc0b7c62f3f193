//! Browser-facing HTTP server.
//!
//! One port serves the chat page, the archive page, and a JSON API. Chat replies are
//! streamed to the page as server-sent events.

mod pages;
mod protocol;
mod server;

pub use protocol::{
    ApiError, ArchiveList, ArchiveRows, Archived, ChatParams, JsonBody, SessionCreated, TurnList,
};
pub use server::{router, run_server, AppState};
