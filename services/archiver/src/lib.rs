//! Flow Archiver
//!
//! Classifies network flows by direction relative to a set of internal
//! address ranges and archives them to an S3-compatible object store, keyed
//! by that classification.
//!
//! ## Components
//!
//! - **Classifier**: tags a flow `internal`, `egress`, `ingress` or `other`
//!   from the membership of its two network endpoints in the configured CIDR
//!   ranges. Never fails; malformed flows are tagged `other` and logged.
//! - **Object Store**: write/read/list of opaque blobs with content headers
//!   and user metadata. Errors from the backend are returned as-is, with no
//!   retry. Objects are buffered whole in memory on read.
//! - **Archiver**: groups a batch of flows by tag and writes one object per
//!   tag under `{prefix}/{tag}/{date}/`.
//! - **Ingest**: reads newline-delimited JSON flows and feeds the archiver in
//!   batches. Undecodable lines are logged and skipped.
//!
//! ## Architecture
//!
//! ```text
//! NDJSON flows           Classifier              S3 Bucket
//! ┌──────────────┐      ┌──────────────┐       ┌──────────────────┐
//! │ stdin        │─────▶│ CIDR ranges  │       │ flows/           │
//! └──────────────┘      └──────────────┘       │   internal/      │
//!                              │               │   egress/        │
//!                              ▼               │   ingress/       │
//!                       ┌──────────────┐       │   other/         │
//!                       │ Archiver     │──────▶│     {date}/      │
//!                       └──────────────┘       └──────────────────┘
//! ```

pub mod archiver;
pub mod classifier;
pub mod config;
pub mod flow;
pub mod ingest;
pub mod memory_store;
pub mod object_store;

pub use archiver::{ArchiveError, ArchivedObject, FlowArchiver};
pub use classifier::{
    classify_optional, ClassifierError, FlowClassifier, FlowDirectionClassifier, Tag,
};
pub use config::Config;
pub use flow::{Flow, FlowLayer};
pub use ingest::{run_ingest, FlowReader, IngestSummary};
pub use memory_store::{InMemoryObjectStore, MemoryBackendError};
pub use object_store::{Metadata, ObjectStore, S3ObjectStore, StoreError, StoredObject};
