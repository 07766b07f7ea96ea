//! NNTP protocol implementation, connection pooling and the
//! per-server client
//!
//! A connection is a strict one-command-at-a-time state machine over a
//! single (optionally TLS) socket; the pool bounds how many of them a
//! server gets; the client ties both to the server's credentials and
//! TLS settings.

mod client;
mod connection;
mod pool;

pub use client::NntpClient;
pub use connection::{GroupStatus, NntpConnection};
pub use pool::{NntpPool, NntpPoolBuilder, NntpPoolExt, PooledConnection};
