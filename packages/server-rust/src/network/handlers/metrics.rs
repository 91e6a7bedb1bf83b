//! Prometheus metrics exposition endpoint.

use axum::extract::State;

use super::AppState;

/// Renders the process's current metrics snapshot in Prometheus exposition format.
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
