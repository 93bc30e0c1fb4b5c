use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;

use super::types::{ClusterInfoDto, StopQuery, TaskDto, VersionDto};
use crate::cluster::facade::ClusterFacade;

pub async fn handle_get_tasks(
    Extension(cluster): Extension<Arc<ClusterFacade>>,
) -> (StatusCode, Json<Vec<TaskDto>>) {
    let tasks = cluster
        .get_cluster_tasks()
        .await
        .into_iter()
        .map(TaskDto::from)
        .collect();

    (StatusCode::OK, Json(tasks))
}

/// 200 when the task was stopped (or nothing ran), 409 otherwise.
pub async fn handle_stop_task(
    Query(query): Query<StopQuery>,
    Extension(cluster): Extension<Arc<ClusterFacade>>,
) -> StatusCode {
    let hostname = query.hostname.unwrap_or_default();

    if cluster.cancel_task(&hostname).await {
        tracing::info!(member = %hostname, "Task stopped via REST");
        StatusCode::OK
    } else {
        tracing::warn!(member = %hostname, "Could not stop task");
        StatusCode::CONFLICT
    }
}

/// Local job progress, `-1` when idle.
pub async fn handle_get_progress(
    Extension(cluster): Extension<Arc<ClusterFacade>>,
) -> (StatusCode, Json<f64>) {
    (StatusCode::OK, Json(cluster.current_percentage()))
}

pub async fn handle_get_cluster(
    Extension(cluster): Extension<Arc<ClusterFacade>>,
) -> (StatusCode, Json<ClusterInfoDto>) {
    (
        StatusCode::OK,
        Json(ClusterInfoDto {
            members: cluster.member_count(),
            name: cluster.cluster_name().to_string(),
        }),
    )
}

pub async fn handle_get_version() -> Json<VersionDto> {
    Json(VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
