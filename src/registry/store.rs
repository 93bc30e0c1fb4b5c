//! Replicated Task Registry
//!
//! Every member keeps a full replica of `owner -> TaskRecord`. The owner is the
//! only writer of its own record; peers learn about changes through `Put` and
//! `Remove` broadcasts on the `Tasks` channel.
//!
//! ## Conflict Resolution
//! Replicas converge by last-writer-wins on `last_updated`. Remote messages about
//! the local member's own record are ignored: the owner's copy is authoritative.
//! Removals leave a tombstone so a late or replayed `Put` that is not newer than
//! the removal cannot bring the record back. Tombstones expire with the orphan sweep.
//!
//! ## Failure Handling
//! - A member reported as left loses its record immediately on every replica.
//! - A member that vanished silently is caught by the periodic orphan sweep.
//! - Broadcast failures are logged and never surface to callers.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use super::protocol::RegistryMessage;
use super::types::{RegistryChange, RegistryEvent, TaskRecord};
use crate::media::types::Media;
use crate::membership::service::MembershipService;
use crate::membership::types::{Channel, MemberId, MembershipChange};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    /// Records updated at or before this instant stay removed.
    removed_at: DateTime<Utc>,
    created: DateTime<Utc>,
}

pub struct TaskRegistry {
    tasks: Mutex<HashMap<MemberId, TaskRecord>>,
    tombstones: DashMap<MemberId, Tombstone>,
    membership: Arc<MembershipService>,
    orphan_timeout: TimeDelta,
    events: broadcast::Sender<RegistryEvent>,
}

impl TaskRegistry {
    pub fn new(membership: Arc<MembershipService>, orphan_timeout: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            tombstones: DashMap::new(),
            membership,
            orphan_timeout: TimeDelta::from_std(orphan_timeout).unwrap_or(TimeDelta::hours(1)),
            events,
        })
    }

    /// Registry change notifications, each with the post-change snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Records that `owner` started working on `candidate`, replacing any previous record.
    pub async fn set_task(&self, owner: &MemberId, candidate: &Media) -> TaskRecord {
        let now = Utc::now();
        let record = TaskRecord {
            source_name: candidate.source_name(),
            priority: candidate.priority,
            date_added: now,
            last_updated: now,
            percentage: 0.0,
            owner: owner.clone(),
        };

        let tasks = {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(owner.clone(), record.clone());
            snapshot(&tasks)
        };

        tracing::info!("Task added: {} on {}", record.source_name, owner);
        self.notify(RegistryChange::Added(record.clone()), tasks);
        self.replicate(RegistryMessage::Put(record.clone())).await;

        record
    }

    /// Updates the progress of `owner`'s record. Returns false when there is none.
    pub async fn update_progress(&self, owner: &MemberId, percentage: f64) -> bool {
        let updated = {
            let mut tasks = self.tasks.lock().await;
            match tasks.get_mut(owner) {
                Some(record) => {
                    record.percentage = percentage.clamp(0.0, 100.0);
                    record.last_updated = Utc::now().max(record.last_updated);
                    let record = record.clone();
                    Some((record, snapshot(&tasks)))
                }
                None => None,
            }
        };

        let Some((record, tasks)) = updated else {
            tracing::debug!("No task registered for {}, progress dropped", owner);
            return false;
        };

        self.notify(RegistryChange::Updated(record.clone()), tasks);
        self.replicate(RegistryMessage::Put(record)).await;
        true
    }

    /// Removes `owner`'s record. No-op when absent.
    pub async fn remove_task(&self, owner: &MemberId) -> Option<TaskRecord> {
        let (removed, tasks) = {
            let mut tasks = self.tasks.lock().await;
            let removed = tasks.remove(owner);
            (removed, snapshot(&tasks))
        };

        let removed = removed?;
        tracing::info!("Task removed: {} on {}", removed.source_name, owner);
        self.notify(RegistryChange::Removed(owner.clone()), tasks);
        self.replicate(RegistryMessage::Remove {
            owner: owner.clone(),
            at: Utc::now().max(removed.last_updated),
        })
        .await;

        Some(removed)
    }

    /// Point-in-time copy, oldest first.
    pub async fn get_tasks(&self) -> Vec<TaskRecord> {
        snapshot(&*self.tasks.lock().await)
    }

    pub async fn get_task(&self, owner: &MemberId) -> Option<TaskRecord> {
        self.tasks.lock().await.get(owner).cloned()
    }

    /// True iff the group has more than one member and some member already works on `candidate`.
    pub async fn is_queued_in_cluster(&self, candidate: &Media) -> bool {
        if self.membership.member_count() <= 1 {
            return false;
        }

        let source_name = candidate.source_name();
        self.tasks
            .lock()
            .await
            .values()
            .any(|record| record.matches_source(&source_name))
    }

    pub async fn remove_orphan_tasks(&self) -> usize {
        self.remove_orphan_tasks_at(Utc::now()).await
    }

    /// Evicts records whose `last_updated` is older than the orphan timeout, as seen at `now`.
    pub async fn remove_orphan_tasks_at(&self, now: DateTime<Utc>) -> usize {
        let (evicted, tasks) = {
            let mut tasks = self.tasks.lock().await;
            self.tombstones
                .retain(|_, tombstone| now - tombstone.created <= self.orphan_timeout);

            let stale: Vec<MemberId> = tasks
                .values()
                .filter(|record| now - record.last_updated > self.orphan_timeout)
                .map(|record| record.owner.clone())
                .collect();

            let evicted: Vec<TaskRecord> = stale
                .iter()
                .filter_map(|owner| tasks.remove(owner))
                .collect();
            for record in &evicted {
                self.bury(&record.owner, record.last_updated, now);
            }
            (evicted, snapshot(&tasks))
        };

        for record in &evicted {
            tracing::warn!(
                "Removing orphan task {} of {} (last update {})",
                record.source_name,
                record.owner,
                record.last_updated
            );
            self.notify(RegistryChange::Removed(record.owner.clone()), tasks.clone());
            self.replicate(RegistryMessage::Remove {
                owner: record.owner.clone(),
                at: record.last_updated,
            })
            .await;
        }

        evicted.len()
    }

    /// Drops the record of a member that left the group. Not replicated: every member sees the departure.
    pub async fn member_left(&self, member: &MemberId) {
        let (removed, tasks) = {
            let mut tasks = self.tasks.lock().await;
            let removed = tasks.remove(member);
            if let Some(record) = &removed {
                self.bury(member, record.last_updated, Utc::now());
            }
            (removed, snapshot(&tasks))
        };

        if let Some(record) = removed {
            tracing::info!("Member {} left, dropping its task {}", member, record.source_name);
            self.notify(RegistryChange::Removed(member.clone()), tasks);
        }
    }

    /// Empties the local replica, tombstones included. Not replicated.
    pub async fn clear(&self) {
        let dropped = {
            let mut tasks = self.tasks.lock().await;
            let dropped = tasks.len();
            tasks.clear();
            self.tombstones.clear();
            dropped
        };

        tracing::debug!("Registry cleared ({} record(s) dropped)", dropped);
        self.notify(RegistryChange::Cleared, Vec::new());
    }

    /// Applies a replication message received from `from`.
    pub async fn apply(&self, from: &MemberId, message: RegistryMessage) {
        match message {
            RegistryMessage::Put(record) => self.apply_put(from, record).await,
            RegistryMessage::Remove { owner, at } => self.apply_remove(&owner, at).await,
            RegistryMessage::SyncRequest => self.answer_sync(from).await,
            RegistryMessage::Snapshot(records) => {
                for record in records {
                    self.apply_put(from, record).await;
                }
            }
        }
    }

    async fn apply_put(&self, from: &MemberId, record: TaskRecord) {
        if self.is_local(&record.owner) && !self.is_local(from) {
            tracing::debug!("Ignoring remote write to own record from {}", from);
            return;
        }

        let applied = {
            let mut tasks = self.tasks.lock().await;

            if let Some(tombstone) = self.tombstones.get(&record.owner).map(|t| *t) {
                if record.last_updated <= tombstone.removed_at {
                    tracing::debug!(
                        "Ignoring stale record of {} (removed at {})",
                        record.owner,
                        tombstone.removed_at
                    );
                    return;
                }
                self.tombstones.remove(&record.owner);
            }

            let change = match tasks.get(&record.owner) {
                Some(existing) if existing.last_updated > record.last_updated => None,
                Some(existing) if *existing == record => None,
                Some(_) => Some(RegistryChange::Updated(record.clone())),
                None => Some(RegistryChange::Added(record.clone())),
            };

            change.map(|change| {
                tasks.insert(record.owner.clone(), record);
                (change, snapshot(&tasks))
            })
        };

        if let Some((change, tasks)) = applied {
            self.notify(change, tasks);
        }
    }

    async fn apply_remove(&self, owner: &MemberId, at: DateTime<Utc>) {
        if self.is_local(owner) {
            return;
        }

        let removed = {
            let mut tasks = self.tasks.lock().await;
            self.bury(owner, at, Utc::now());

            match tasks.get(owner) {
                Some(existing) if existing.last_updated <= at => {
                    tasks.remove(owner);
                    Some(snapshot(&tasks))
                }
                _ => None,
            }
        };

        if let Some(tasks) = removed {
            self.notify(RegistryChange::Removed(owner.clone()), tasks);
        }
    }

    async fn answer_sync(&self, requester: &MemberId) {
        let Some(local) = self.membership.local_identity() else {
            return;
        };
        let own: Vec<TaskRecord> = self.get_task(&local).await.into_iter().collect();

        let payload = match RegistryMessage::Snapshot(own).encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode registry snapshot: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .membership
            .send_to(requester, Channel::Tasks, payload)
            .await
        {
            tracing::warn!("Failed to answer sync request from {}: {}", requester, e);
        }
    }

    /// Starts replication, departure handling and the periodic orphan sweep.
    pub fn start(self: Arc<Self>, sweep_interval: Duration) -> Vec<JoinHandle<()>> {
        let mut messages = self.membership.subscribe_messages();
        let mut departures = self.membership.subscribe_membership();

        let receiver = {
            let registry = self.clone();
            tokio::spawn(async move {
                loop {
                    match messages.recv().await {
                        Ok(message) if message.channel == Channel::Tasks => {
                            match RegistryMessage::decode(&message.payload) {
                                Ok(decoded) => registry.apply(&message.from, decoded).await,
                                Err(e) => tracing::warn!(
                                    "Dropping malformed registry message from {}: {}",
                                    message.from,
                                    e
                                ),
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Registry lagged by {} messages, resyncing", skipped);
                            registry.replicate(RegistryMessage::SyncRequest).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let membership = {
            let registry = self.clone();
            tokio::spawn(async move {
                loop {
                    match departures.recv().await {
                        Ok(event) if event.change == MembershipChange::Left => {
                            registry.member_left(&event.member).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let sweeper = {
            let registry = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);
                interval.tick().await;

                loop {
                    interval.tick().await;
                    let evicted = registry.remove_orphan_tasks().await;
                    if evicted > 0 {
                        tracing::info!("Orphan sweep evicted {} task(s)", evicted);
                    }
                }
            })
        };

        let sync = {
            let registry = self.clone();
            tokio::spawn(async move {
                if registry.membership.member_count() > 1 {
                    registry.replicate(RegistryMessage::SyncRequest).await;
                }
            })
        };

        vec![receiver, membership, sweeper, sync]
    }

    /// Records a removal of `owner`'s record, keeping the latest removal instant.
    fn bury(&self, owner: &MemberId, removed_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.tombstones
            .entry(owner.clone())
            .and_modify(|tombstone| {
                if removed_at > tombstone.removed_at {
                    *tombstone = Tombstone { removed_at, created: now };
                }
            })
            .or_insert(Tombstone { removed_at, created: now });
    }

    fn is_local(&self, member: &MemberId) -> bool {
        self.membership.local_identity().as_ref() == Some(member)
    }

    fn notify(&self, change: RegistryChange, tasks: Vec<TaskRecord>) {
        let _ = self.events.send(RegistryEvent { change, tasks });
    }

    async fn replicate(&self, message: RegistryMessage) {
        if !self.membership.is_joined() {
            return;
        }

        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode registry message: {}", e);
                return;
            }
        };

        if let Err(e) = self.membership.broadcast(Channel::Tasks, payload).await {
            tracing::warn!("Failed to replicate registry change: {}", e);
        }
    }
}

fn snapshot(tasks: &HashMap<MemberId, TaskRecord>) -> Vec<TaskRecord> {
    let mut records: Vec<TaskRecord> = tasks.values().cloned().collect();
    records.sort_by(|a, b| a.date_added.cmp(&b.date_added).then_with(|| a.owner.cmp(&b.owner)));
    records
}
