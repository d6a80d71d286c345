//! Feedbuild: feed ingestion and static builds
//!
//! Feeds are downloaded by per-feed scripts into a document store, then built into
//! static output trees by build scripts working on lazy file, image and template
//! entities. Entity operations are queued and run in waves until a fixpoint; builds
//! are requested through a latency-coalescing queue and published with a checksummed
//! record, a manifest and zip packages.

pub mod archive;
pub mod build;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod combiners;
pub mod config;
pub mod context;
pub mod download;
pub mod engine;
pub mod entity;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod scheduler;
pub mod service;
pub mod store;

pub use build::{BuildOptions, Builder, FeedBuilder};
pub use error::{BuildError, FeedError, StoreError};
pub use feed::{Feed, FeedRegistry};
pub use service::Service;
