//! Cluster Facade
//!
//! The single entry point the workflow and the REST API use to talk to the
//! cluster. Owns the background work that keeps the local node's view fresh:
//!
//! - registry replication and orphan sweeps,
//! - the cancellation rpc listener,
//! - periodic publication of local progress into the registry.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cancel::handler::CancellationHandler;
use crate::media::types::Media;
use crate::membership::service::MembershipService;
use crate::membership::types::{MemberId, MemberView};
use crate::progress::cache::ProgressCache;
use crate::registry::store::TaskRegistry;
use crate::registry::types::{RegistryEvent, TaskRecord};

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub cluster_name: String,
    pub orphan_sweep_interval: Duration,
    pub progress_push_interval: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cluster_name: "clustercode".to_string(),
            orphan_sweep_interval: Duration::from_secs(60),
            progress_push_interval: Duration::from_secs(10),
        }
    }
}

pub struct ClusterFacade {
    membership: Arc<MembershipService>,
    registry: Arc<TaskRegistry>,
    cancellation: Arc<CancellationHandler>,
    progress: Arc<ProgressCache>,
    settings: ClusterSettings,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterFacade {
    pub fn new(
        membership: Arc<MembershipService>,
        registry: Arc<TaskRegistry>,
        cancellation: Arc<CancellationHandler>,
        progress: Arc<ProgressCache>,
        settings: ClusterSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            registry,
            cancellation,
            progress,
            settings,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Joins the group (or degrades to single-node mode) and starts background work.
    pub async fn join_cluster(&self) {
        if self.membership.is_joined() {
            tracing::debug!("Cluster already joined");
            return;
        }

        self.membership.join().await;

        let mut handles = self
            .registry
            .clone()
            .start(self.settings.orphan_sweep_interval);
        handles.push(self.cancellation.clone().start());
        handles.push(self.spawn_progress_publisher());

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }

        tracing::info!(
            "Cluster '{}' has {} member(s)",
            self.settings.cluster_name,
            self.member_count()
        );
    }

    /// Retires the local task, stops background work, drops the replica and leaves the group. Idempotent.
    pub async fn leave_cluster(&self) {
        if !self.membership.is_joined() {
            return;
        }

        self.remove_task().await;

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        self.registry.clear().await;
        self.membership.leave().await;
    }

    fn spawn_progress_publisher(&self) -> JoinHandle<()> {
        let membership = self.membership.clone();
        let registry = self.registry.clone();
        let mut samples = self.progress.watch();
        let period = self.settings.progress_push_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                if !samples.has_changed().unwrap_or(false) {
                    continue;
                }
                let sample = samples.borrow_and_update().clone();

                if let (Some(sample), Some(local)) = (sample, membership.local_identity()) {
                    registry.update_progress(&local, sample.percentage).await;
                }
            }
        })
    }

    /// Publishes that the local node works on `candidate`. `None` while not joined.
    pub async fn set_task(&self, candidate: &Media) -> Option<TaskRecord> {
        let Some(local) = self.membership.local_identity() else {
            tracing::warn!("Not joined, cannot publish task {}", candidate.source_name());
            return None;
        };

        Some(self.registry.set_task(&local, candidate).await)
    }

    /// Retires the local task, if any.
    pub async fn remove_task(&self) {
        if let Some(local) = self.membership.local_identity() {
            self.registry.remove_task(&local).await;
        }
    }

    pub async fn get_cluster_tasks(&self) -> Vec<TaskRecord> {
        self.registry.get_tasks().await
    }

    pub async fn is_queued_in_cluster(&self, candidate: &Media) -> bool {
        self.registry.is_queued_in_cluster(candidate).await
    }

    pub async fn cancel_task(&self, hostname: &str) -> bool {
        self.cancellation.cancel_task(hostname).await
    }

    pub fn member_count(&self) -> usize {
        self.membership.member_count()
    }

    pub fn members(&self) -> Vec<MemberView> {
        self.membership.members()
    }

    pub fn is_arbiter(&self) -> bool {
        self.membership.is_arbiter()
    }

    /// `None` while not joined.
    pub fn local_member_name(&self) -> Option<MemberId> {
        self.membership.local_identity()
    }

    pub fn cluster_name(&self) -> &str {
        &self.settings.cluster_name
    }

    /// Local job progress, `-1.0` when idle.
    pub fn current_percentage(&self) -> f64 {
        self.progress.percentage()
    }

    pub fn subscribe_tasks(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }
}
