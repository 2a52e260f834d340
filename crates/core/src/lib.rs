//! Domain types and pure logic for the VJTS plate-tracking client.
//!
//! Nothing in this crate performs I/O. The session controller in
//! `vjts-client` drives these types from network events.

pub mod error;
pub mod format;
pub mod gallery;
pub mod job;
pub mod trajectory;
