//! Streaming job-control client for the VJTS plate-tracking service.
//!
//! Provides the SSE decoder, typed event parsing, the HTTP API wrapper,
//! the background event channel, and the [`session::SessionController`]
//! state machine that ties them together.

pub mod api;
pub mod channel;
pub mod config;
pub mod messages;
pub mod session;
pub mod sse;
pub mod view;
