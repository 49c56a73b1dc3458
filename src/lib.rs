//! A standalone RFC 6455 WebSocket server.
//!
//! Everything runs on a single coordinator task built on top of Tokio:
//! accepting connections, reading frames, and housekeeping all happen in
//! one event loop, with one [`ClientSession`](session::ClientSession) per
//! connected socket. A host program supplies a [`Handler`](handler::Handler)
//! implementation and gets called back for connects, messages, and
//! disconnects — see [`Server`](server::Server) for the entry point.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod lock;
pub mod opcode;
pub mod request;
pub mod server;
pub mod session;
pub mod stream;
#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::Handler;
pub use server::{Server, ServerHandle};
pub use session::ClientSession;
