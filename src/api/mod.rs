//! REST API Module
//!
//! HTTP surface over the cluster facade, mounted under `/api/v1`:
//!
//! - `GET /tasks`: tasks in flight across the cluster
//! - `DELETE /tasks/stop?hostname=<member>`: cancel a member's task
//! - `GET /progress`: local progress, `-1` when idle
//! - `GET /cluster`: member count and cluster name
//! - `GET /version`

pub mod handlers;
pub mod types;

use axum::routing::{delete, get};
use axum::{Extension, Router};
use std::sync::Arc;

use crate::cluster::facade::ClusterFacade;
use handlers::{
    handle_get_cluster, handle_get_progress, handle_get_tasks, handle_get_version,
    handle_stop_task,
};

pub const API_PREFIX: &str = "/api/v1";

pub fn router(cluster: Arc<ClusterFacade>) -> Router {
    let api = Router::new()
        .route("/tasks", get(handle_get_tasks))
        .route("/tasks/stop", delete(handle_stop_task))
        .route("/progress", get(handle_get_progress))
        .route("/cluster", get(handle_get_cluster))
        .route("/version", get(handle_get_version));

    Router::new()
        .nest(API_PREFIX, api)
        .layer(Extension(cluster))
}
