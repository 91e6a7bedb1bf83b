//! `Lattice` Core -- CRDTs, Hybrid Logical Clock, and message schemas.
//!
//! This crate provides the foundation layer for the `Lattice` data grid:
//!
//! - **HLC** ([`hlc`]): Hybrid Logical Clock for distributed causality tracking
//! - **Types** ([`types`]): `Value` enum, `StorageValue`, `MapType`, `CrdtMap`, `Principal`
//! - **Traits** ([`traits`]): `Processor`, `QueryNotifier` for DAG execution and live queries
//! - **Schema** ([`schema`]): `MapSchema`, `SyncShape`, `Predicate` for validation and shapes
//! - **Context** ([`context`]): `RequestContext` for per-request identity and tracing

pub mod context;
pub mod hlc;
pub mod messages;
pub mod partition;
pub mod schema;
pub mod traits;
pub mod types;

// Context
pub use context::RequestContext;

// Schema
pub use schema::{FieldDef, FieldType, MapSchema, Predicate, SyncShape, ValidationResult};

// Traits
pub use traits::{Inbox, Processor, ProcessorContext, QueryNotifier};

// Types
pub use types::{CrdtMap, MapType, Principal, StorageValue, Value};

// HLC
pub use hlc::{ClockSource, SystemClock, Timestamp, HLC, LWWRecord, MergeKeyResult, ORMapRecord};

// Partition
pub use partition::{hash_to_partition, PartitionLookup, PartitionTable, PARTITION_COUNT};
