//! A simulated RPC network for testing replicated services in one process.
//!
//! Servers register services declared with [`service!`]; clients are named
//! endpoints that the [`Network`] connects to servers, partitions, and makes
//! lossy on demand. Payloads are protobuf messages, see [`codec`].

#![allow(clippy::new_without_default)]

pub mod codec;

mod client;
mod error;
#[macro_use]
mod macros;
mod network;
mod server;

pub use self::client::{Client, Rpc, RpcHooks};
pub use self::error::{Error, Result};
pub use self::network::Network;
pub use self::server::{Handler, HandlerFactory, RpcFuture, Server, ServerBuilder};
