//! Test doubles shared by module tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};

use crate::cancel::handler::CancellationHandler;
use crate::cluster::facade::{ClusterFacade, ClusterSettings};
use crate::membership::loopback::LoopbackNetwork;
use crate::membership::service::MembershipService;
use crate::progress::cache::ProgressCache;
use crate::progress::types::TranscodeProgress;
use crate::registry::store::TaskRegistry;
use crate::transcode::service::TranscodingService;
use crate::transcode::types::{TranscodeResult, TranscodeTask};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    Succeed,
    Fail,
    /// Runs until `cancel_transcode` is called, then reports a cancelled result.
    BlockUntilCancelled,
}

pub struct FakeTranscoder {
    pub cancel_answer: AtomicBool,
    pub cancel_calls: AtomicUsize,
    pub outcome: Mutex<FakeOutcome>,
    pub transcoded: Mutex<Vec<TranscodeTask>>,
    active: AtomicBool,
    cancelled: Notify,
    progress_tx: broadcast::Sender<TranscodeProgress>,
}

impl FakeTranscoder {
    pub fn new(outcome: FakeOutcome) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(16);

        Arc::new(Self {
            cancel_answer: AtomicBool::new(true),
            cancel_calls: AtomicUsize::new(0),
            outcome: Mutex::new(outcome),
            transcoded: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
            cancelled: Notify::new(),
            progress_tx,
        })
    }

    pub fn set_cancel_answer(&self, answer: bool) {
        self.cancel_answer.store(answer, Ordering::SeqCst);
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn transcoded(&self) -> Vec<TranscodeTask> {
        self.transcoded.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscodingService for FakeTranscoder {
    async fn transcode(&self, task: TranscodeTask) -> TranscodeResult {
        self.transcoded.lock().unwrap().push(task.clone());
        self.active.store(true, Ordering::SeqCst);

        let outcome = *self.outcome.lock().unwrap();
        let (successful, cancelled) = match outcome {
            FakeOutcome::Succeed => (true, false),
            FakeOutcome::Fail => (false, false),
            FakeOutcome::BlockUntilCancelled => {
                self.cancelled.notified().await;
                (false, true)
            }
        };

        self.active.store(false, Ordering::SeqCst);
        let _ = self.progress_tx.send(TranscodeProgress::Finished);

        TranscodeResult {
            temporary_path: PathBuf::from("/tmp").join(task.media.file_name().unwrap_or("out")),
            media: task.media,
            profile: task.profile,
            successful,
            cancelled,
        }
    }

    async fn cancel_transcode(&self) -> bool {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_one();
        self.cancel_answer.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn progress(&self) -> broadcast::Receiver<TranscodeProgress> {
        self.progress_tx.subscribe()
    }
}

/// A complete cluster node on a loopback network, not yet joined.
pub struct TestNode {
    pub membership: Arc<MembershipService>,
    pub registry: Arc<TaskRegistry>,
    pub transcoder: Arc<FakeTranscoder>,
    pub progress: Arc<ProgressCache>,
    pub facade: Arc<ClusterFacade>,
}

pub fn test_node(network: &Arc<LoopbackNetwork>, name: &str, outcome: FakeOutcome) -> TestNode {
    test_node_with(network, name, false, outcome)
}

pub fn test_node_with(
    network: &Arc<LoopbackNetwork>,
    name: &str,
    arbiter: bool,
    outcome: FakeOutcome,
) -> TestNode {
    let membership = MembershipService::new(Arc::new(network.transport(name, arbiter)));
    let registry = TaskRegistry::new(membership.clone(), Duration::from_secs(3600));
    let transcoder = FakeTranscoder::new(outcome);
    let cancellation = CancellationHandler::new(
        membership.clone(),
        transcoder.clone(),
        Duration::from_millis(500),
    );
    let progress = Arc::new(ProgressCache::new());
    let facade = ClusterFacade::new(
        membership.clone(),
        registry.clone(),
        cancellation,
        progress.clone(),
        ClusterSettings::default(),
    );

    TestNode {
        membership,
        registry,
        transcoder,
        progress,
        facade,
    }
}
