//! Line-oriented TCP chat relay.
//!
//! Clients connect, answer a nickname prompt and then exchange newline
//! terminated messages that are broadcast to everyone currently connected.
//!
//! - [`coordinator`] owns the set of connected clients and serializes
//!   register, unregister and broadcast on a single task.
//! - [`connection`] runs the reader and writer halves of one session.
//! - [`server`] accepts TCP connections and spawns sessions.
//! - [`message`] holds the plain-text wire format and line framing helpers.
//! - [`clock`] supplies the local time stamped onto chat lines.
//! - [`client`] is a small terminal client speaking the same protocol.
//! - [`cli`] parses the command line for both modes.

pub mod cli;
pub mod client;
pub mod clock;
pub mod connection;
pub mod coordinator;
pub mod message;
pub mod server;
