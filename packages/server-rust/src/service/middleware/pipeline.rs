//! Pipeline composition: combines all middleware layers into a single service stack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Mutex;
use tower::{Service, ServiceBuilder};

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServerConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// Build the operation pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-operation timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
///
/// The returned service implements `tower::Service<Operation>`.
#[must_use]
pub fn build_operation_pipeline(
    router: OperationRouter,
    config: &ServerConfig,
) -> impl tower::Service<Operation, Response = OperationResponse, Error = OperationError> {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// OperationPipelineHandle (cloneable handle for axum `State`)
// ---------------------------------------------------------------------------

type BoxedFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;
type BoxedPipeline =
    Box<dyn Service<Operation, Response = OperationResponse, Error = OperationError, Future = BoxedFuture> + Send>;

/// Type-erases the pipeline's opaque `impl Service` future into a `BoxedFuture`
/// so the pipeline can be stored behind a single concrete type.
struct PipelineAdapter<S>(S);

impl<S> Service<Operation> for PipelineAdapter<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(self.0.call(op))
    }
}

/// Cloneable handle to the operation pipeline, suitable for storage in axum's
/// `AppState`.
///
/// `tower::Service::call` takes `&mut self`, and the pipeline built by
/// `build_operation_pipeline` is an opaque, non-`Clone` type -- this wraps it
/// behind a mutex so every handler call serializes on dispatch. The pipeline
/// already has its own admission control (`LoadShedLayer`), so this is a
/// correctness boundary, not a second concurrency limiter.
#[derive(Clone)]
pub struct OperationPipelineHandle {
    inner: Arc<Mutex<BoxedPipeline>>,
}

impl OperationPipelineHandle {
    #[must_use]
    pub fn new(router: OperationRouter, config: &ServerConfig) -> Self {
        let pipeline = build_operation_pipeline(router, config);
        let boxed: BoxedPipeline = Box::new(PipelineAdapter(pipeline));
        Self { inner: Arc::new(Mutex::new(boxed)) }
    }

    /// Dispatches a single operation through the pipeline, awaiting readiness
    /// first as `tower::Service` requires.
    pub async fn call(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        let mut guard = self.inner.lock().await;
        std::future::poll_fn(|cx| guard.poll_ready(cx)).await?;
        guard.call(op).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
