//! Registry Module Tests
//!
//! ## Test Scopes
//! - **Local Operations**: set/update/remove semantics and snapshots.
//! - **Replication**: records travel between members over a loopback group.
//! - **Conflict Resolution**: last-writer-wins and owner authority.
//! - **Failure Handling**: departed members and orphan eviction.

#[cfg(test)]
mod tests {
    use crate::media::types::Media;
    use crate::membership::loopback::LoopbackNetwork;
    use crate::membership::service::MembershipService;
    use crate::membership::types::MemberId;
    use crate::registry::protocol::RegistryMessage;
    use crate::registry::store::TaskRegistry;
    use crate::registry::types::{RegistryChange, TaskRecord};
    use chrono::{TimeDelta, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    async fn node(
        network: &Arc<LoopbackNetwork>,
        name: &str,
    ) -> (Arc<MembershipService>, Arc<TaskRegistry>) {
        let membership = MembershipService::new(Arc::new(network.transport(name, false)));
        membership.join().await;

        let registry = TaskRegistry::new(membership.clone(), Duration::from_secs(3600));
        registry.clone().start(Duration::from_secs(60));

        (membership, registry)
    }

    async fn wait_for_tasks(registry: &TaskRegistry, expected: usize) -> bool {
        for _ in 0..100 {
            if registry.get_tasks().await.len() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn record(owner: &str, source: &str, age: TimeDelta) -> TaskRecord {
        let at = Utc::now() - age;
        TaskRecord {
            source_name: source.to_string(),
            priority: 1,
            date_added: at,
            last_updated: at,
            percentage: 10.0,
            owner: MemberId::from(owner),
        }
    }

    // ============================================================
    // LOCAL OPERATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_set_task_replaces_previous_record() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let owner = MemberId::from("a");

        registry.set_task(&owner, &Media::new("1/first.mkv", 1)).await;
        let second = registry.set_task(&owner, &Media::new("2/second.mkv", 2)).await;

        let tasks = registry.get_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source_name, "2/second.mkv");
        assert_eq!(tasks[0].priority, 2);
        assert_eq!(tasks[0].percentage, 0.0);
        assert_eq!(second.date_added, second.last_updated);
    }

    #[tokio::test]
    async fn test_update_progress_requires_record() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let owner = MemberId::from("a");

        assert!(!registry.update_progress(&owner, 50.0).await);
        assert!(registry.get_tasks().await.is_empty());

        let added = registry.set_task(&owner, &Media::new("1/movie.mkv", 1)).await;
        assert!(registry.update_progress(&owner, 42.5).await);

        let updated = registry.get_task(&owner).await.unwrap();
        assert_eq!(updated.percentage, 42.5);
        assert!(updated.last_updated >= added.last_updated);
        assert_eq!(updated.date_added, added.date_added);
    }

    #[tokio::test]
    async fn test_update_progress_clamps_percentage() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let owner = MemberId::from("a");
        registry.set_task(&owner, &Media::new("1/movie.mkv", 1)).await;

        registry.update_progress(&owner, 130.0).await;

        assert_eq!(registry.get_task(&owner).await.unwrap().percentage, 100.0);
    }

    #[tokio::test]
    async fn test_remove_task_is_noop_when_absent() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let owner = MemberId::from("a");

        assert!(registry.remove_task(&owner).await.is_none());

        registry.set_task(&owner, &Media::new("1/movie.mkv", 1)).await;
        assert!(registry.remove_task(&owner).await.is_some());
        assert!(registry.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_change_events_carry_snapshot() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let owner = MemberId::from("a");
        let mut events = registry.subscribe();

        registry.set_task(&owner, &Media::new("1/movie.mkv", 1)).await;
        registry.remove_task(&owner).await;

        let added = events.recv().await.unwrap();
        assert!(matches!(added.change, RegistryChange::Added(_)));
        assert_eq!(added.tasks.len(), 1);

        let removed = events.recv().await.unwrap();
        assert_eq!(removed.change, RegistryChange::Removed(owner));
        assert!(removed.tasks.is_empty());
    }

    // ============================================================
    // DEDUPLICATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_is_queued_false_when_alone() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "a").await;
        let candidate = Media::new("1/movie.mkv", 1);
        registry.set_task(&MemberId::from("a"), &candidate).await;

        assert!(!registry.is_queued_in_cluster(&candidate).await);
    }

    #[tokio::test]
    async fn test_is_queued_normalizes_separators() {
        let network = LoopbackNetwork::new();
        let (_a, registry_a) = node(&network, "a").await;
        let (_b, registry_b) = node(&network, "b").await;

        registry_a
            .set_task(&MemberId::from("a"), &Media::new("1\\Movies\\film.mkv", 1))
            .await;
        assert!(wait_for_tasks(&registry_b, 1).await);

        assert!(registry_b.is_queued_in_cluster(&Media::new("1/movies/film.mkv", 1)).await);
        assert!(!registry_b.is_queued_in_cluster(&Media::new("1/movies/other.mkv", 1)).await);
    }

    // ============================================================
    // REPLICATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_mutations_replicate_to_peers() {
        // ARRANGE
        let network = LoopbackNetwork::new();
        let (_a, registry_a) = node(&network, "a").await;
        let (_b, registry_b) = node(&network, "b").await;
        let owner = MemberId::from("a");

        // ACT: add
        registry_a.set_task(&owner, &Media::new("1/movie.mkv", 1)).await;

        // ASSERT
        assert!(wait_for_tasks(&registry_b, 1).await);
        let replica = registry_b.get_task(&owner).await.unwrap();
        assert_eq!(replica.source_name, "1/movie.mkv");

        // ACT: progress
        registry_a.update_progress(&owner, 75.0).await;
        for _ in 0..100 {
            if registry_b.get_task(&owner).await.map(|r| r.percentage) == Some(75.0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry_b.get_task(&owner).await.unwrap().percentage, 75.0);

        // ACT: remove
        registry_a.remove_task(&owner).await;
        assert!(wait_for_tasks(&registry_b, 0).await);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_existing_records() {
        let network = LoopbackNetwork::new();
        let (_a, registry_a) = node(&network, "a").await;
        registry_a
            .set_task(&MemberId::from("a"), &Media::new("1/movie.mkv", 1))
            .await;

        let (_c, registry_c) = node(&network, "c").await;

        assert!(wait_for_tasks(&registry_c, 1).await);
        assert_eq!(
            registry_c.get_tasks().await[0].owner,
            MemberId::from("a")
        );
    }

    #[tokio::test]
    async fn test_departed_member_record_is_dropped() {
        let network = LoopbackNetwork::new();
        let (membership_a, registry_a) = node(&network, "a").await;
        let (_b, registry_b) = node(&network, "b").await;
        registry_a
            .set_task(&MemberId::from("a"), &Media::new("1/movie.mkv", 1))
            .await;
        assert!(wait_for_tasks(&registry_b, 1).await);

        membership_a.leave().await;

        assert!(wait_for_tasks(&registry_b, 0).await);
    }

    // ============================================================
    // CONFLICT RESOLUTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_older_put_loses() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let peer = MemberId::from("peer");

        let fresh = record("peer", "1/new.mkv", TimeDelta::zero());
        let stale = record("peer", "1/old.mkv", TimeDelta::minutes(5));

        registry.apply(&peer, RegistryMessage::Put(fresh.clone())).await;
        registry.apply(&peer, RegistryMessage::Put(stale)).await;
        registry.apply(&peer, RegistryMessage::Put(fresh)).await;

        let tasks = registry.get_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source_name, "1/new.mkv");
    }

    #[tokio::test]
    async fn test_older_remove_loses() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let peer = MemberId::from("peer");
        let fresh = record("peer", "1/new.mkv", TimeDelta::zero());
        registry.apply(&peer, RegistryMessage::Put(fresh.clone())).await;

        registry
            .apply(
                &peer,
                RegistryMessage::Remove {
                    owner: peer.clone(),
                    at: fresh.last_updated - TimeDelta::seconds(1),
                },
            )
            .await;
        assert_eq!(registry.get_tasks().await.len(), 1);

        registry
            .apply(
                &peer,
                RegistryMessage::Remove {
                    owner: peer.clone(),
                    at: fresh.last_updated,
                },
            )
            .await;
        assert!(registry.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_put_older_than_removal_stays_removed() {
        // ARRANGE
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let peer = MemberId::from("peer");
        let removed_at = Utc::now();

        // ACT: the removal overtakes the record it removes
        registry
            .apply(
                &peer,
                RegistryMessage::Remove {
                    owner: peer.clone(),
                    at: removed_at,
                },
            )
            .await;
        registry
            .apply(
                &peer,
                RegistryMessage::Put(record("peer", "1/old.mkv", TimeDelta::seconds(5))),
            )
            .await;
        registry
            .apply(
                &peer,
                RegistryMessage::Snapshot(vec![record("peer", "1/old.mkv", TimeDelta::seconds(5))]),
            )
            .await;

        // ASSERT
        assert!(registry.get_tasks().await.is_empty());

        // ACT: a genuinely newer record is accepted
        let mut newer = record("peer", "1/next.mkv", TimeDelta::zero());
        newer.last_updated = removed_at + TimeDelta::seconds(1);
        registry.apply(&peer, RegistryMessage::Put(newer)).await;

        // ASSERT
        let tasks = registry.get_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source_name, "1/next.mkv");
    }

    #[tokio::test]
    async fn test_evicted_orphan_is_not_resurrected_by_replay() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let ghost = MemberId::from("ghost");
        let stale = record("ghost", "1/ghost.mkv", TimeDelta::hours(2));

        registry.apply(&ghost, RegistryMessage::Put(stale.clone())).await;
        assert_eq!(registry.remove_orphan_tasks().await, 1);

        registry.apply(&ghost, RegistryMessage::Put(stale)).await;

        assert!(registry.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_replica() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let peer = MemberId::from("peer");
        registry
            .apply(&peer, RegistryMessage::Put(record("peer", "1/a.mkv", TimeDelta::zero())))
            .await;
        let mut events = registry.subscribe();

        registry.clear().await;

        assert!(registry.get_tasks().await.is_empty());
        let event = events.recv().await.unwrap();
        assert_eq!(event.change, RegistryChange::Cleared);
        assert!(event.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_remote_writes_to_own_record_are_ignored() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        let local = MemberId::from("local");
        registry.set_task(&local, &Media::new("1/mine.mkv", 1)).await;

        let forged = TaskRecord {
            last_updated: Utc::now() + TimeDelta::minutes(1),
            ..record("local", "1/forged.mkv", TimeDelta::zero())
        };
        registry
            .apply(&MemberId::from("peer"), RegistryMessage::Put(forged))
            .await;
        registry
            .apply(
                &MemberId::from("peer"),
                RegistryMessage::Remove {
                    owner: local.clone(),
                    at: Utc::now() + TimeDelta::minutes(1),
                },
            )
            .await;

        assert_eq!(registry.get_task(&local).await.unwrap().source_name, "1/mine.mkv");
    }

    // ============================================================
    // ORPHAN EVICTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_orphan_sweep_evicts_only_stale_records() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;

        registry
            .apply(
                &MemberId::from("old"),
                RegistryMessage::Put(record("old", "1/old.mkv", TimeDelta::hours(2))),
            )
            .await;
        registry
            .apply(
                &MemberId::from("young"),
                RegistryMessage::Put(record("young", "1/young.mkv", TimeDelta::minutes(10))),
            )
            .await;

        let evicted = registry.remove_orphan_tasks().await;

        assert_eq!(evicted, 1);
        let tasks = registry.get_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].owner, MemberId::from("young"));
    }

    #[tokio::test]
    async fn test_orphan_sweep_at_future_instant() {
        let network = LoopbackNetwork::new();
        let (_membership, registry) = node(&network, "local").await;
        registry
            .set_task(&MemberId::from("local"), &Media::new("1/movie.mkv", 1))
            .await;

        assert_eq!(registry.remove_orphan_tasks().await, 0);
        assert_eq!(
            registry
                .remove_orphan_tasks_at(Utc::now() + TimeDelta::hours(2))
                .await,
            1
        );
        assert!(registry.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_orphan_sweep_removes_record_on_every_replica() {
        // ARRANGE
        let network = LoopbackNetwork::new();
        let (_a, registry_a) = node(&network, "a").await;
        let (_b, registry_b) = node(&network, "b").await;
        let ghost = MemberId::from("ghost");
        let stale = record("ghost", "1/ghost.mkv", TimeDelta::hours(2));
        registry_a.apply(&ghost, RegistryMessage::Put(stale.clone())).await;
        registry_b.apply(&ghost, RegistryMessage::Put(stale)).await;

        // ACT: only one member sweeps
        let evicted = registry_a.remove_orphan_tasks().await;

        // ASSERT
        assert_eq!(evicted, 1);
        assert!(registry_a.get_tasks().await.is_empty());
        assert!(wait_for_tasks(&registry_b, 0).await);
    }
}
