//! Download orchestration and NZB index handling
//!
//! The engine turns one parsed NZB into a fan-out of segment tasks
//! writing into memory-mapped destination files.

mod engine;
mod nzb;

pub use engine::DownloadEngine;
pub use nzb::{Nzb, NzbFile, NzbGroups, NzbSegment, NzbSegments};
