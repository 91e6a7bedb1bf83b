//! HTTP and WebSocket handler definitions for the Lattice server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod http_sync;
pub mod metrics;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use http_sync::http_sync_handler;
pub use metrics::metrics_handler;
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::service::{OperationPipelineHandle, OperationService};

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Registry of all active WebSocket and cluster peer connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, per-connection settings).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
    /// Handle to the process-wide Prometheus recorder, for rendering `/metrics`.
    pub metrics_handle: PrometheusHandle,
    /// Classifies wire `Message`s into `Operation`s. `None` until the cluster
    /// and bulk services are wired in, in which case `/sync` reports 503.
    pub operation_service: Option<Arc<OperationService>>,
    /// Cloneable handle to the operation pipeline (router + middleware stack).
    pub pipeline: Option<OperationPipelineHandle>,
}
