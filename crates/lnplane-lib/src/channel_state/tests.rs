use super::{ChannelState, ChannelStateCache};
use crate::{
    backend::{Htlc, RemoteChannel, RoutingPolicy},
    events::BalanceUpdateSource,
    test_utils::channel_point,
    types::Status,
};

fn state(node_id: u32, channel_id: u32, remote_node_id: u32) -> ChannelState {
    ChannelState {
        node_id,
        channel_id,
        remote_node_id,
        status: Status::Active,
        capacity_msat: 1_000_000_000,
        local_balance_msat: 600_000_000,
        remote_balance_msat: 390_000_000,
        balance_tolerance_msat: Some(20_000_000),
        ..Default::default()
    }
}

fn htlc(incoming: bool, amount_msat: u64, forwarding_htlc_index: u64) -> Htlc {
    Htlc {
        incoming,
        amount_msat,
        hash_lock: "aa".repeat(32),
        expiration_height: 800_144,
        htlc_index: 1,
        forwarding_channel: 0,
        forwarding_htlc_index,
    }
}

fn remote_channel() -> RemoteChannel {
    RemoteChannel {
        channel_point: channel_point(1),
        lnd_short_channel_id: 1 << 40,
        remote_public_key: "02".repeat(33),
        active: true,
        private: false,
        initiator: true,
        capacity_sat: 1_000_000,
        local_balance_sat: 500_000,
        remote_balance_sat: 480_000,
        commit_fee_sat: 3_000,
        commit_weight: 1_116,
        fee_per_kw: 2_500,
        unsettled_balance_sat: 15_000,
        total_sent_sat: 0,
        total_received_sat: 0,
        num_updates: 12,
        lifetime: 3_600,
        local_reserve_sat: 10_000,
        remote_reserve_sat: 9_000,
        local_dust_limit_sat: 354,
        remote_dust_limit_sat: 546,
        pending_htlcs: vec![htlc(true, 10_000_000, 0), htlc(false, 5_000_000, 7)],
    }
}

#[test]
fn test_from_remote_channel_adds_pending_htlcs_back() {
    let channel = remote_channel();
    let policy = RoutingPolicy {
        fee_base_msat: 1_000,
        ..Default::default()
    };
    let state =
        ChannelState::from_remote_channel(1, 2, 3, &channel, policy, RoutingPolicy::default());

    assert_eq!(state.local_balance_msat, 505_000_000);
    assert_eq!(state.remote_balance_msat, 490_000_000);
    assert_eq!(state.pending_incoming_htlc_count, 1);
    assert_eq!(state.pending_incoming_htlc_amount_msat, 10_000_000);
    assert_eq!(state.pending_outgoing_htlc_count, 1);
    assert_eq!(state.pending_outgoing_htlc_amount_msat, 5_000_000);
    assert_eq!(state.balance_tolerance_msat, Some(10_354_000));
    assert_eq!(state.local_routing_policy, policy);
    assert!(state.check_invariants());
}

#[test]
fn test_balance_tolerance_excludes_commit_fee() {
    // Reserve plus dust is 10_354 sat, the commitment fee another 3_000.
    let mut channel = remote_channel();
    channel.pending_htlcs.clear();
    channel.local_balance_sat = 500_000;
    channel.remote_balance_sat = 500_000 - 10_355;
    let state = ChannelState::from_remote_channel(
        1,
        2,
        3,
        &channel,
        RoutingPolicy::default(),
        RoutingPolicy::default(),
    );
    assert!(!state.check_invariants());

    channel.remote_balance_sat = 500_000 - 10_354;
    let state = ChannelState::from_remote_channel(
        1,
        2,
        3,
        &channel,
        RoutingPolicy::default(),
        RoutingPolicy::default(),
    );
    assert!(state.check_invariants());
}

#[test]
fn test_invariants() {
    let mut over = state(1, 1, 2);
    over.remote_balance_msat = 400_000_001;
    assert!(!over.check_invariants());

    let mut gap = state(1, 1, 2);
    gap.remote_balance_msat = 300_000_000;
    assert!(!gap.check_invariants());

    // Without a tolerance only the upper bound is checked.
    gap.balance_tolerance_msat = None;
    assert!(gap.check_invariants());
}

#[test]
fn test_update_balance_msat() {
    let cache = ChannelStateCache::default();
    cache.set_channel_states(1, vec![state(1, 10, 2), state(1, 11, 3)]);

    let inbound = cache
        .update_balance_msat(1, 10, true, 5_000, BalanceUpdateSource::Invoice)
        .unwrap();
    assert_eq!(inbound.previous_remote_balance_msat, 390_000_000);
    assert_eq!(inbound.remote_balance_msat, 390_005_000);
    assert_eq!(inbound.local_balance_msat, 600_000_000);
    assert_eq!(inbound.local_balance_per_milli(), 600);

    let outbound = cache
        .update_balance_msat(1, 11, false, 7_000, BalanceUpdateSource::Payment)
        .unwrap();
    assert_eq!(outbound.local_balance_msat, 599_993_000);
    assert_eq!(outbound.remote_balance_msat, 390_000_000);

    assert!(cache
        .update_balance_msat(1, 12, true, 1, BalanceUpdateSource::Forward)
        .is_none());
    assert!(cache
        .update_balance_msat(9, 10, true, 1, BalanceUpdateSource::Forward)
        .is_none());
}

#[test]
fn test_violating_update_is_kept() {
    let cache = ChannelStateCache::default();
    cache.set_channel_state(state(1, 10, 2));
    cache.update_balance_msat(1, 10, true, 20_000_000, BalanceUpdateSource::Forward);
    let state = cache.get_channel_state(1, 10).unwrap();
    assert_eq!(state.remote_balance_msat, 410_000_000);
    assert!(!state.check_invariants());
}

#[test]
fn test_status_updates() {
    let cache = ChannelStateCache::default();
    cache.set_channel_states(1, vec![state(1, 10, 2), state(1, 11, 2), state(1, 12, 3)]);

    assert_eq!(cache.set_channel_status_by_remote(1, 2, Status::Inactive), vec![10, 11]);
    assert_eq!(cache.get_channel_state(1, 12).unwrap().status, Status::Active);
    assert!(cache.set_channel_status(1, 12, Status::Inactive));
    assert!(!cache.set_channel_status(1, 13, Status::Inactive));

    cache.set_node_status(1, Status::Active);
    assert!(cache
        .get_channel_states(1)
        .iter()
        .all(|state| state.status == Status::Active));
}

#[test]
fn test_channel_removal_spans_nodes() {
    let cache = ChannelStateCache::default();
    // Both ends of a channel between two managed nodes.
    cache.set_channel_state(state(1, 10, 2));
    cache.set_channel_state(state(2, 10, 1));
    cache.set_channel_state(state(1, 11, 3));

    cache.remove_channel_state_from_cache(10);
    assert!(cache.get_channel_state(1, 10).is_none());
    assert!(cache.get_channel_state(2, 10).is_none());
    assert_eq!(cache.get_channel_states(1).len(), 1);

    cache.set_channel_states(1, Vec::new());
    assert!(cache.has_node(1));
    assert!(cache.get_channel_states(1).is_empty());
    cache.remove_node(1);
    assert!(!cache.has_node(1));
}

#[test]
fn test_routing_policy_sides() {
    let cache = ChannelStateCache::default();
    cache.set_channel_state(state(1, 10, 2));
    let policy = RoutingPolicy {
        time_lock_delta: 80,
        ..Default::default()
    };
    assert!(cache.set_routing_policy(1, 10, false, policy));
    let state = cache.get_channel_state(1, 10).unwrap();
    assert_eq!(state.remote_routing_policy, policy);
    assert_eq!(state.local_routing_policy, RoutingPolicy::default());
    assert!(!cache.set_routing_policy(1, 99, true, policy));
}
