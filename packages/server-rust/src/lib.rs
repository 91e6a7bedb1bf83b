//! `Lattice` Server — `WebSocket` server with clustering, partitioning, and `PostgreSQL` storage.

pub mod bulk;
pub mod cluster;
pub mod network;
pub mod service;
pub mod storage;
pub mod traits;

pub use service::{
    CallerOrigin, ManagedService, Operation, OperationContext, OperationError, OperationResponse,
    OperationService, OperationRouter, ServerConfig, ServiceContext, ServiceRegistry,
};
pub use traits::{MapProvider, SchemaProvider, ServerStorage};
