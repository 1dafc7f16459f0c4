//! Forkwatch
//!
//! Fork choice frame capture service for Ethereum consensus networks. The
//! service polls beacon nodes for fork choice dumps, stores each dump as a
//! compressed frame in a pluggable blob store, and indexes its metadata in
//! a relational store for filtered, paginated querying.
//!
//! ## Features
//!
//! - **Pluggable Frame Storage**: In-memory, filesystem, or S3-compatible
//!   backends, all persisting the same gzip-JSON frame format
//! - **Relational Metadata Index**: Filtered listings over nodes, slots,
//!   epochs, and labels, with AND-semantics label intersection
//! - **Retention**: Frames older than the configured period are purged on
//!   a background loop
//! - **Metadata Backfill**: Batch jobs promoting legacy label conventions
//!   into first-class metadata columns
//!
//! ## Architecture
//!
//! ```text
//! Beacon Nodes               Blob Store                Index
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────────┐
//! │ /eth/v1/     │          │ frames/      │          │ frame_metadata   │
//! │ debug/       │─────────▶│   {id}.json  │          │ frame_metadata   │
//! │ fork_choice  │          │   .gz        │          │ _labels          │
//! └──────────────┘          └──────────────┘          └──────────────────┘
//!        │                         ▲                          ▲
//!        ▼                         │                          │
//! ┌──────────────┐          ┌──────────────┐                  │
//! │ Sources      │─────────▶│ ForkChoice   │──────────────────┘
//! │ (polling)    │          │ Service      │
//! └──────────────┘          └──────────────┘
//!                                  │
//!                                  ▼
//!                           ┌──────────────┐
//!                           │ Retention    │
//!                           │ Purge Loop   │
//!                           └──────────────┘
//! ```

pub mod backfill;
pub mod beacon_source;
pub mod config;
pub mod error;
pub mod ethereum;
pub mod filesystem_store;
pub mod filter;
pub mod frame;
pub mod indexer;
pub mod metrics;
pub mod s3_store;
pub mod service;
pub mod source;
pub mod store;

pub use backfill::Backfill;
pub use config::Config;
pub use error::{Error, Result};
pub use ethereum::EthereumNetworkConfig;
pub use filter::{FrameFilter, OrderBy, PaginationCursor, PaginationResponse};
pub use frame::{EventSource, Frame, FrameMetadata};
pub use indexer::Indexer;
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use service::ForkChoiceService;
pub use source::{FrameCallback, Source};
pub use store::FrameStore;
