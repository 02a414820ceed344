//! keysweep: parallel private-key range sweeper.
//!
//! The search core enumerates a contiguous 256-bit key range, derives the
//! candidates' public-key hashes and pre-filters them through a bloom filter
//! before the exact target lookup:
//!
//! - `uint256` / `types`: 256-bit arithmetic and tagged byte arrays
//! - `range`: half-open range algebra and work partitioning
//! - `memory`: aligned buffers, secure (zero-on-drop) key storage, pools
//! - `filter`: classic / cascading / partitioned / counting bloom filters
//! - `pool`: priority thread pool with pause/resume and parallel helpers
//! - `engine`: CPU search engine behind the `SearchEngine` trait
//! - `coordinator`: local multi-device fan-out and the distributed work
//!   registry with heartbeats and timeout reassignment
//! - `checkpoint`: atomic snapshot/restore of a run's frontier
//! - `search`: the top-level blocking/async API

pub mod address;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod filter;
pub mod memory;
pub mod pool;
pub mod progress;
pub mod range;
pub mod search;
pub mod targets;
pub mod types;
pub mod uint256;

pub use config::{KeyType, SearchParams, SweepMode};
pub use engine::{SearchEngine, SearchResult};
pub use error::{Error, Result};
pub use progress::Progress;
pub use range::KeyRange;
pub use search::Search;
pub use types::{Hash160, Hash256, PrivateKey};
pub use uint256::UInt256;
