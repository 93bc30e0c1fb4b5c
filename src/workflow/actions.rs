//! State entry actions.
//!
//! Each action takes the context, does its I/O off the event loop and hands
//! the context back together with the event that decides the next state.

use std::sync::Arc;
use std::time::Duration;

use super::types::{State, StateEvent, WorkflowContext};
use crate::cleanup::service::CleanupService;
use crate::cluster::facade::ClusterFacade;
use crate::media::profile::ProfileService;
use crate::media::scanner::MediaScanService;
use crate::media::selection::SelectionService;
use crate::transcode::service::TranscodingService;
use crate::transcode::types::TranscodeTask;

/// The collaborators the workflow drives.
#[derive(Clone)]
pub struct WorkflowServices {
    pub cluster: Arc<ClusterFacade>,
    pub scanner: Arc<dyn MediaScanService>,
    pub selection: Arc<dyn SelectionService>,
    pub profiles: Arc<dyn ProfileService>,
    pub transcoder: Arc<dyn TranscodingService>,
    pub cleanup: Arc<dyn CleanupService>,
}

pub type ActionOutcome = (StateEvent, WorkflowContext);

impl WorkflowServices {
    /// WAIT and ARBITER only wait for a timer or an external event.
    pub fn has_entry_action(state: State) -> bool {
        !matches!(state, State::Wait | State::Arbiter)
    }

    pub async fn run_entry_action(
        &self,
        state: State,
        context: WorkflowContext,
        solo_grace: Duration,
    ) -> ActionOutcome {
        match state {
            State::Initial => self.initialize(context, solo_grace).await,
            State::ScanMedia => self.scan_media(context).await,
            State::SelectMedia => self.select_media(context).await,
            State::SelectProfile => self.select_profile(context).await,
            State::Transcode => self.transcode(context).await,
            State::Cleanup => self.cleanup(context).await,
            State::Wait | State::Arbiter => (StateEvent::Finished, context),
        }
    }

    async fn initialize(&self, context: WorkflowContext, solo_grace: Duration) -> ActionOutcome {
        self.cluster.join_cluster().await;

        if self.cluster.member_count() == 1 {
            tracing::info!("Alone in the cluster, waiting {:?} before starting", solo_grace);
            tokio::time::sleep(solo_grace).await;
        }

        (StateEvent::Finished, context)
    }

    async fn scan_media(&self, mut context: WorkflowContext) -> ActionOutcome {
        let scanner = self.scanner.clone();
        let scanned = tokio::task::spawn_blocking(move || scanner.retrieve_files_as_list()).await;

        match scanned {
            Ok(Ok(candidates)) if candidates.is_empty() => {
                tracing::info!("No media found");
                context.candidates.clear();
                (StateEvent::NoResult, context)
            }
            Ok(Ok(candidates)) => {
                tracing::info!("Found {} candidate(s)", candidates.len());
                context.candidates = candidates;
                (StateEvent::Result, context)
            }
            Ok(Err(err)) => {
                tracing::error!("Scanning failed: {:#}", err);
                (StateEvent::Error, context)
            }
            Err(err) => {
                tracing::error!("Scan task failed: {}", err);
                (StateEvent::Error, context)
            }
        }
    }

    async fn select_media(&self, mut context: WorkflowContext) -> ActionOutcome {
        match self.selection.select_media(&context.candidates).await {
            Some(media) => {
                tracing::info!(source = %media.source_name(), "Selected media");
                context.selected_media = Some(media);
                (StateEvent::Result, context)
            }
            None => {
                tracing::info!("No eligible media");
                (StateEvent::NoResult, context)
            }
        }
    }

    async fn select_profile(&self, mut context: WorkflowContext) -> ActionOutcome {
        let Some(media) = context.selected_media.clone() else {
            tracing::error!("No media selected before profile lookup");
            return (StateEvent::Error, context);
        };

        let profiles = self.profiles.clone();
        match tokio::task::spawn_blocking(move || profiles.select_profile(&media)).await {
            Ok(Some(profile)) => {
                context.selected_profile = Some(profile);
                (StateEvent::Result, context)
            }
            Ok(None) => (StateEvent::NoResult, context),
            Err(err) => {
                tracing::error!("Profile task failed: {}", err);
                (StateEvent::Error, context)
            }
        }
    }

    async fn transcode(&self, mut context: WorkflowContext) -> ActionOutcome {
        let (Some(media), Some(profile)) =
            (context.selected_media.clone(), context.selected_profile.clone())
        else {
            tracing::error!("Transcode entered without media and profile");
            return (StateEvent::Error, context);
        };

        let result = self.transcoder.transcode(TranscodeTask { media, profile }).await;
        let event = if result.cancelled {
            tracing::info!(source = %result.media.source_name(), "Transcoding cancelled");
            StateEvent::Cancelled
        } else {
            if result.successful {
                tracing::info!(source = %result.media.source_name(), "Transcoding finished");
            } else {
                tracing::warn!(source = %result.media.source_name(), "Transcoding failed");
            }
            StateEvent::Finished
        };

        context.transcode_result = Some(result);
        (event, context)
    }

    async fn cleanup(&self, mut context: WorkflowContext) -> ActionOutcome {
        let Some(result) = context.transcode_result.take() else {
            context.clear();
            return (StateEvent::Finished, context);
        };

        let cleanup = self.cleanup.clone();
        let outcome = tokio::task::spawn_blocking(move || cleanup.perform_cleanup(&result)).await;
        context.clear();

        match outcome {
            Ok(Ok(_)) => (StateEvent::Finished, context),
            Ok(Err(err)) => {
                tracing::error!("Cleanup failed: {:#}", err);
                (StateEvent::Error, context)
            }
            Err(err) => {
                tracing::error!("Cleanup task failed: {}", err);
                (StateEvent::Error, context)
            }
        }
    }
}
