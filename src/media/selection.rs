use async_trait::async_trait;
use std::sync::Arc;

use super::constraint::Constraint;
use super::types::Media;
use crate::cluster::facade::ClusterFacade;

#[async_trait]
pub trait SelectionService: Send + Sync {
    /// The highest-priority candidate that passes every constraint and is not
    /// already being transcoded somewhere in the cluster.
    async fn select_media(&self, candidates: &[Media]) -> Option<Media>;
}

pub struct MediaSelector {
    constraints: Vec<Box<dyn Constraint>>,
    cluster: Arc<ClusterFacade>,
}

impl MediaSelector {
    pub fn new(constraints: Vec<Box<dyn Constraint>>, cluster: Arc<ClusterFacade>) -> Self {
        Self {
            constraints,
            cluster,
        }
    }

    fn check_constraints(&self, candidate: &Media) -> bool {
        self.constraints.iter().all(|c| {
            let accepted = c.accept(candidate);
            if !accepted {
                tracing::debug!(source = %candidate.source_name(), constraint = c.name(), "Declined");
            }
            accepted
        })
    }
}

#[async_trait]
impl SelectionService for MediaSelector {
    async fn select_media(&self, candidates: &[Media]) -> Option<Media> {
        let mut ordered: Vec<&Media> = candidates.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for candidate in ordered {
            if !self.check_constraints(candidate) {
                continue;
            }
            if self.cluster.is_queued_in_cluster(candidate).await {
                tracing::debug!(source = %candidate.source_name(), "Already queued in cluster");
                continue;
            }
            return Some(candidate.clone());
        }

        None
    }
}
