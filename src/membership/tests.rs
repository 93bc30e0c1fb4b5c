//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Data Structures**: member identity and wire frame encoding.
//! - **Gossip Transport**: discovery through a seed, group isolation, graceful leave.
//! - **Loopback Transport**: membership events, crash simulation, payload delivery.
//! - **Membership Service**: single-node fallback, member counting, idempotent leave.

#[cfg(test)]
mod tests {
    use crate::membership::gossip::{GossipSettings, GossipTransport};
    use crate::membership::loopback::LoopbackNetwork;
    use crate::membership::service::MembershipService;
    use crate::membership::transport::GroupTransport;
    use crate::membership::types::{
        Channel, Frame, GossipMessage, Member, MemberId, MemberState, MembershipChange,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn gossip(name: &str, group: &str, seeds: Vec<SocketAddr>) -> GossipTransport {
        GossipTransport::new(GossipSettings {
            group: group.to_string(),
            member_name: MemberId::from(name),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            seeds,
            arbiter: false,
            discovery_window: Duration::from_secs(2),
        })
    }

    async fn wait_for_members(transport: &dyn GroupTransport, expected: usize) -> bool {
        for _ in 0..50 {
            if transport.members().len() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    // ============================================================
    // MEMBER ID TESTS
    // ============================================================

    #[test]
    fn test_generated_member_ids_are_unique() {
        let id1 = MemberId::generate();
        let id2 = MemberId::generate();

        assert_ne!(id1, id2);
        assert!(id1.as_str().contains('-'));
    }

    #[test]
    fn test_member_id_display() {
        let id = MemberId::from("node-a");

        assert_eq!(id.to_string(), "node-a");
        assert_eq!(id, MemberId("node-a".to_string()));
    }

    // ============================================================
    // WIRE FORMAT TESTS
    // ============================================================

    #[test]
    fn test_frame_carries_group_and_member() {
        let frame = Frame {
            group: "clustercode".to_string(),
            message: GossipMessage::Join {
                member: Member {
                    id: MemberId::from("joiner"),
                    addr: "10.0.0.1:7600".parse().unwrap(),
                    state: MemberState::Alive,
                    incarnation: 3,
                    arbiter: true,
                    last_seen: None,
                },
            },
        };

        let encoded = bincode::serialize(&frame).expect("Failed to serialize frame");
        let decoded: Frame = bincode::deserialize(&encoded).expect("Failed to deserialize frame");

        assert_eq!(decoded.group, "clustercode");
        if let GossipMessage::Join { member } = decoded.message {
            assert_eq!(member.id.as_str(), "joiner");
            assert!(member.arbiter);
            assert!(member.last_seen.is_none());
        } else {
            panic!("Wrong message type");
        }
    }

    // ============================================================
    // GOSSIP TRANSPORT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_gossip_founder_is_sole_member() {
        let founder = gossip("founder", "g1", vec![]);

        assert!(founder.members().is_empty());
        founder.join().await.expect("join failed");

        let members = founder.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id.as_str(), "founder");
        assert!(founder.local_addr().is_some());

        founder.leave().await;
    }

    #[tokio::test]
    async fn test_gossip_arbiter_flag_reaches_indirect_peers() {
        // ARRANGE
        let founder = gossip("founder", "g-arb", vec![]);
        founder.join().await.unwrap();
        let seed = founder.local_addr().unwrap();

        let worker = gossip("worker", "g-arb", vec![seed]);
        worker.join().await.unwrap();
        assert!(wait_for_members(&worker, 2).await);
        let mut worker_events = worker.subscribe_membership();

        // ACT: the arbiter only knows the founder
        let arbiter = GossipTransport::new(GossipSettings {
            group: "g-arb".to_string(),
            member_name: MemberId::from("arbiter"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            seeds: vec![seed],
            arbiter: true,
            discovery_window: Duration::from_secs(2),
        });
        arbiter.join().await.unwrap();

        // ASSERT
        assert!(wait_for_members(&worker, 3).await);
        let seen = worker
            .members()
            .into_iter()
            .find(|m| m.id.as_str() == "arbiter")
            .expect("arbiter not visible to worker");
        assert!(seen.arbiter);

        let joined = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match worker_events.recv().await {
                    Ok(event) if event.member.as_str() == "arbiter" => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("membership stream failed: {}", e),
                }
            }
        })
        .await
        .expect("no join event for the arbiter");
        assert_eq!(joined.change, MembershipChange::Joined);
        assert!(joined.arbiter);

        arbiter.leave().await;
        worker.leave().await;
        founder.leave().await;
    }

    #[tokio::test]
    async fn test_gossip_discovery_through_seed() {
        // ARRANGE
        let founder = gossip("founder", "g2", vec![]);
        founder.join().await.unwrap();
        let seed = founder.local_addr().unwrap();
        let mut founder_events = founder.subscribe_membership();

        // ACT
        let joiner = gossip("joiner", "g2", vec![seed]);
        joiner.join().await.unwrap();

        // ASSERT
        assert!(wait_for_members(&joiner, 2).await);
        assert!(wait_for_members(&founder, 2).await);

        let event = tokio::time::timeout(Duration::from_secs(1), founder_events.recv())
            .await
            .expect("no membership event")
            .unwrap();
        assert_eq!(event.member.as_str(), "joiner");
        assert_eq!(event.change, MembershipChange::Joined);

        joiner.leave().await;
        founder.leave().await;
    }

    #[tokio::test]
    async fn test_gossip_data_delivery_and_leave() {
        let founder = gossip("founder", "g3", vec![]);
        founder.join().await.unwrap();
        let joiner = gossip("joiner", "g3", vec![founder.local_addr().unwrap()]);
        joiner.join().await.unwrap();
        assert!(wait_for_members(&founder, 2).await);

        let mut inbox = founder.subscribe_messages();
        let mut events = founder.subscribe_membership();

        joiner
            .send_to(&MemberId::from("founder"), Channel::Rpc, vec![1, 2, 3])
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("no payload")
            .unwrap();
        assert_eq!(message.from.as_str(), "joiner");
        assert_eq!(message.channel, Channel::Rpc);
        assert_eq!(message.payload, vec![1, 2, 3]);

        joiner.leave().await;

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no leave event")
            .unwrap();
        assert_eq!(event.change, MembershipChange::Left);
        assert!(wait_for_members(&founder, 1).await);

        founder.leave().await;
    }

    #[tokio::test]
    async fn test_gossip_ignores_other_groups() {
        let founder = gossip("founder", "alpha", vec![]);
        founder.join().await.unwrap();

        let stranger = GossipTransport::new(GossipSettings {
            group: "beta".to_string(),
            member_name: MemberId::from("stranger"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            seeds: vec![founder.local_addr().unwrap()],
            arbiter: false,
            discovery_window: Duration::from_millis(300),
        });
        stranger.join().await.unwrap();

        assert_eq!(stranger.members().len(), 1);
        assert_eq!(founder.members().len(), 1);

        stranger.leave().await;
        founder.leave().await;
    }

    #[tokio::test]
    async fn test_gossip_send_to_unknown_member_fails() {
        let founder = gossip("founder", "g4", vec![]);
        founder.join().await.unwrap();

        let result = founder
            .send_to(&MemberId::from("ghost"), Channel::Rpc, vec![])
            .await;

        assert!(result.is_err());
        founder.leave().await;
    }

    // ============================================================
    // LOOPBACK TRANSPORT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_loopback_join_and_leave_events() {
        let network = LoopbackNetwork::new();
        let a = network.transport("a", false);
        let b = network.transport("b", true);

        a.join().await.unwrap();
        let mut events = a.subscribe_membership();
        b.join().await.unwrap();

        let joined = events.recv().await.unwrap();
        assert_eq!(joined.member.as_str(), "b");
        assert!(joined.arbiter);
        assert_eq!(joined.change, MembershipChange::Joined);
        assert_eq!(a.members().len(), 2);

        b.leave().await;
        b.leave().await;

        let left = events.recv().await.unwrap();
        assert_eq!(left.change, MembershipChange::Left);
        assert_eq!(a.members().len(), 1);
        assert!(events.try_recv().is_err(), "second leave must be a no-op");
    }

    #[tokio::test]
    async fn test_loopback_broadcast_skips_sender() {
        let network = LoopbackNetwork::new();
        let a = network.transport("a", false);
        let b = network.transport("b", false);
        a.join().await.unwrap();
        b.join().await.unwrap();

        let mut a_inbox = a.subscribe_messages();
        let mut b_inbox = b.subscribe_messages();

        a.broadcast(Channel::Tasks, vec![9]).await.unwrap();

        let received = b_inbox.recv().await.unwrap();
        assert_eq!(received.from.as_str(), "a");
        assert_eq!(received.channel, Channel::Tasks);
        assert!(a_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_loopback_crash_is_silent() {
        let network = LoopbackNetwork::new();
        let a = network.transport("a", false);
        let b = network.transport("b", false);
        a.join().await.unwrap();
        b.join().await.unwrap();
        let mut events = a.subscribe_membership();

        network.crash(&MemberId::from("b"));

        assert_eq!(a.members().len(), 1);
        assert!(b.members().is_empty());
        assert!(b.broadcast(Channel::Tasks, vec![]).await.is_err());
        assert!(events.try_recv().is_err());
    }

    // ============================================================
    // MEMBERSHIP SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_service_counts_zero_before_join() {
        let network = LoopbackNetwork::new();
        let service = MembershipService::new(Arc::new(network.transport("solo", false)));

        assert_eq!(service.member_count(), 0);
        assert!(service.local_identity().is_none());

        service.join().await;
        assert_eq!(service.member_count(), 1);
        assert_eq!(service.local_identity(), Some(MemberId::from("solo")));

        service.leave().await;
        service.leave().await;
        assert_eq!(service.member_count(), 0);
    }

    #[tokio::test]
    async fn test_service_falls_back_to_single_node() {
        // ARRANGE: occupy the port so the gossip transport cannot bind
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap();

        let transport = GossipTransport::new(GossipSettings {
            group: "g5".to_string(),
            member_name: MemberId::from("stubborn"),
            bind_addr: taken,
            seeds: vec![],
            arbiter: false,
            discovery_window: Duration::from_millis(100),
        });
        let service = MembershipService::new(Arc::new(transport));

        // ACT
        service.join().await;

        // ASSERT
        assert!(service.is_joined());
        assert!(service.is_degraded());
        assert_eq!(service.member_count(), 1);
        assert_eq!(service.local_identity(), Some(MemberId::from("stubborn")));
    }

    #[tokio::test]
    async fn test_service_send_before_join_fails() {
        let network = LoopbackNetwork::new();
        let service = MembershipService::new(Arc::new(network.transport("x", false)));

        let result = service.broadcast(Channel::Tasks, vec![]).await;

        assert!(result.is_err());
    }
}
