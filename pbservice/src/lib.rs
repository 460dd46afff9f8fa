//! A primary/backup replicated key/value service.
//!
//! An external view service decides which server is primary and which is
//! backup. Every server pings it each tick and derives its role from the view
//! it gets back (`view`). Only the primary answers clients; it applies each
//! put once, keyed by client and sequence number (`store`), then forwards the
//! resolved write to the backup in the background. Whenever the primary sees
//! a new backup it pushes its whole state there with `backup_sync`. Outbound
//! calls are bounded by a `RetryPolicy` (`retry`).
//!
//! `Node` in `server` handles the rpc; `Clerk` in `client` is the client
//! library. Code in `do_*` functions shows how each request is treated.

#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;

pub mod client;
#[cfg(test)]
mod config;
pub mod errors;
pub mod proto;
pub mod retry;
pub mod server;
pub mod store;
pub mod view;

pub use self::client::Clerk;
pub use self::errors::{Error, Result};
pub use self::retry::RetryPolicy;
pub use self::server::{Node, PbServer, ServerConfig};
pub use self::view::{Role, View, ViewCache};
