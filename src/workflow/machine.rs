//! Workflow interpreter.
//!
//! A single task owns the current state and the context and applies one
//! transition at a time. Entry actions run on their own tasks and report
//! back over a channel, tagged with the sequence number of the state that
//! started them so results from a state already left are discarded.

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::actions::WorkflowServices;
use super::types::{
    State, StateChange, StateEvent, Transition, TransitionAction, WorkflowContext,
    WorkflowSettings,
};

/// The transition table. `None` means the event is ignored in `from`.
pub fn next(from: State, event: StateEvent, arbiter: bool) -> Option<Transition> {
    let (to, action) = match (from, event) {
        (State::Initial, StateEvent::Finished) if arbiter => (State::Arbiter, None),
        (State::Initial, StateEvent::Finished) => (State::ScanMedia, None),

        (State::ScanMedia, StateEvent::Result) => (State::SelectMedia, None),
        (State::ScanMedia, StateEvent::NoResult | StateEvent::Error) => (State::Wait, None),

        (State::Wait, StateEvent::Timeout) => (State::ScanMedia, None),

        (State::SelectMedia, StateEvent::Result) => (State::SelectProfile, None),
        (State::SelectMedia, StateEvent::NoResult | StateEvent::Error) => (State::Wait, None),

        (State::SelectProfile, StateEvent::Result) => {
            (State::Transcode, Some(TransitionAction::PublishTask))
        }
        (State::SelectProfile, StateEvent::NoResult | StateEvent::Error) => (State::Wait, None),

        (State::Transcode, StateEvent::Finished | StateEvent::Cancelled | StateEvent::Error) => {
            (State::Cleanup, Some(TransitionAction::RetireTask))
        }

        (State::Cleanup, StateEvent::Finished) => (State::ScanMedia, None),
        (State::Cleanup, StateEvent::Error) => (State::Wait, None),

        _ => return None,
    };

    Some(Transition { to, action })
}

pub struct WorkflowMachine {
    services: WorkflowServices,
    settings: WorkflowSettings,
}

impl WorkflowMachine {
    pub fn new(services: WorkflowServices, settings: WorkflowSettings) -> Self {
        Self { services, settings }
    }

    /// Spawns the event loop, starting in INITIAL.
    pub fn start(self) -> WorkflowHandle {
        let (state_tx, state_rx) = watch::channel(State::Initial);
        let (changes_tx, _) = broadcast::channel(64);
        let (events_tx, events_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let runner = Runner {
            services: self.services,
            settings: self.settings,
            state: State::Initial,
            sequence: 0,
            context: Some(WorkflowContext::default()),
            wait_deadline: None,
            in_flight: None,
            state_tx,
            changes_tx: changes_tx.clone(),
            done_tx,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(runner.run(events_rx, done_rx));

        WorkflowHandle {
            state: state_rx,
            changes: changes_tx,
            events: events_tx,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Control surface of a running workflow.
pub struct WorkflowHandle {
    state: watch::Receiver<State>,
    changes: broadcast::Sender<StateChange>,
    events: mpsc::Sender<StateEvent>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowHandle {
    pub fn current_state(&self) -> State {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Fires an event from outside, e.g. `Timeout` to rescan early while
    /// waiting. Ignored while an entry action is running.
    pub async fn fire(&self, event: StateEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Stops the loop, cancels a running transcode and leaves the cluster.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(task) = self.task.lock().await.take()
            && let Err(err) = task.await
        {
            tracing::error!("Workflow task failed: {}", err);
        }
    }
}

struct ActionDone {
    sequence: u64,
    event: StateEvent,
    context: WorkflowContext,
}

struct Runner {
    services: WorkflowServices,
    settings: WorkflowSettings,
    state: State,
    sequence: u64,
    /// `None` while an entry action holds it.
    context: Option<WorkflowContext>,
    wait_deadline: Option<Instant>,
    in_flight: Option<JoinHandle<()>>,
    state_tx: watch::Sender<State>,
    changes_tx: broadcast::Sender<StateChange>,
    done_tx: mpsc::UnboundedSender<ActionDone>,
    shutdown: CancellationToken,
}

impl Runner {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<StateEvent>,
        mut done: mpsc::UnboundedReceiver<ActionDone>,
    ) {
        tracing::info!(arbiter = self.settings.arbiter, "Workflow started");
        self.enter(State::Initial);

        loop {
            let deadline = self.wait_deadline;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(finished) = done.recv() => self.on_action_done(finished).await,
                Some(event) = events.recv() => self.on_external_event(event).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle(StateEvent::Timeout).await;
                }
            }
        }

        self.stop().await;
    }

    async fn on_action_done(&mut self, finished: ActionDone) {
        if finished.sequence != self.sequence {
            tracing::debug!(event = %finished.event, "Discarding event from a previous state");
            return;
        }

        self.in_flight = None;
        self.context = Some(finished.context);
        self.handle(finished.event).await;
    }

    async fn on_external_event(&mut self, event: StateEvent) {
        if self.context.is_none() {
            tracing::debug!(state = %self.state, event = %event, "Ignoring event, action in progress");
            return;
        }
        self.handle(event).await;
    }

    async fn handle(&mut self, event: StateEvent) {
        let Some(transition) = next(self.state, event, self.settings.arbiter) else {
            tracing::warn!(state = %self.state, event = %event, "No transition defined");
            return;
        };

        if let Some(action) = transition.action {
            self.run_transition_action(action).await;
        }

        let change = StateChange {
            from: self.state,
            to: transition.to,
            event,
        };
        tracing::info!(
            state = %change.to,
            event = %event,
            "Transition {} -> {}",
            change.from,
            change.to
        );

        self.state = transition.to;
        self.sequence += 1;
        self.state_tx.send_replace(transition.to);
        let _ = self.changes_tx.send(change);

        self.enter(transition.to);
    }

    async fn run_transition_action(&mut self, action: TransitionAction) {
        match action {
            TransitionAction::PublishTask => {
                let media = self
                    .context
                    .as_ref()
                    .and_then(|context| context.selected_media.clone());

                match media {
                    Some(media) => {
                        if self.services.cluster.set_task(&media).await.is_none() {
                            tracing::warn!(source = %media.source_name(), "Task not published");
                        }
                    }
                    None => tracing::warn!("No selected media to publish"),
                }
            }
            TransitionAction::RetireTask => self.services.cluster.remove_task().await,
        }
    }

    fn enter(&mut self, state: State) {
        self.wait_deadline = (state == State::Wait)
            .then(|| Instant::now() + self.settings.scan_interval);

        if !WorkflowServices::has_entry_action(state) {
            if state == State::Arbiter {
                tracing::info!("Arbiter node, holding quorum only");
            }
            return;
        }

        let context = self.context.take().unwrap_or_default();
        let services = self.services.clone();
        let done_tx = self.done_tx.clone();
        let sequence = self.sequence;
        let solo_grace = self.settings.solo_grace;

        self.in_flight = Some(tokio::spawn(async move {
            let (event, context) = services.run_entry_action(state, context, solo_grace).await;
            let _ = done_tx.send(ActionDone {
                sequence,
                event,
                context,
            });
        }));
    }

    async fn stop(&mut self) {
        tracing::info!(state = %self.state, "Workflow shutting down");

        if self.services.transcoder.is_active() && !self.services.transcoder.cancel_transcode().await
        {
            tracing::warn!("Active transcode did not stop in time");
        }
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }

        self.services.cluster.leave_cluster().await;
        tracing::info!("Workflow stopped");
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}
