//! nzbfetch - concurrent NZB downloader library
//!
//! Downloads binary payloads from Usenet: an NZB index names the
//! articles, a pooled NNTP client fetches them, a streaming yEnc
//! decoder writes each article straight into a memory-mapped
//! destination file at the offset its part header declares.
//!
//! # Features
//!
//! - Async/await via Tokio, one task per segment
//! - Per-server connection pooling with a hard connection cap
//! - Streaming yEnc decode with per-part CRC-32 verification
//! - TLS with an optional cipher-suite allowlist
//! - Cooperative cancellation down to the socket level
//!
//! # Example
//!
//! ```no_run
//! use nzbfetch::{Config, DownloadEngine, Nzb};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let nzb = Nzb::from_file("file.nzb")?;
//!     let engine = DownloadEngine::new(&config)?;
//!     engine.download(&nzb).await?;
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod progress;
pub mod sink;
pub mod yenc;

// Feature modules organized by functionality
pub mod download;
pub mod nntp;

// Re-export commonly used types
pub use config::{Config, ServerConfig};
pub use download::{DownloadEngine, Nzb};
pub use error::{NzbFetchError, Result};
pub use nntp::{NntpClient, NntpPool, NntpPoolBuilder, NntpPoolExt};
