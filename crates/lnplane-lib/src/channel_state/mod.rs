//! Per-(node, channel) balance snapshot.
//!
//! Every writer goes through one of the typed operations below and the invariants of a
//! channel are checked after each of them. A violation is logged on the critical target
//! and the state is kept as it is.

pub mod maintenance;

use std::{collections::HashMap, sync::RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    backend::{Htlc, RemoteChannel, RoutingPolicy},
    events::{BalanceUpdateSource, ChannelBalanceEvent},
    now_timestamp_as_millis_u64,
    registry::{read_lock, write_lock},
    types::{ChannelId, NodeId, Status},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub remote_node_id: NodeId,
    pub status: Status,
    pub private: bool,
    pub initiator: bool,
    pub capacity_msat: u64,
    pub local_balance_msat: u64,
    pub remote_balance_msat: u64,
    pub unsettled_balance_msat: u64,
    pub pending_htlcs: Vec<Htlc>,
    pub pending_incoming_htlc_count: u32,
    pub pending_incoming_htlc_amount_msat: u64,
    pub pending_outgoing_htlc_count: u32,
    pub pending_outgoing_htlc_amount_msat: u64,
    pub commit_fee_sat: u64,
    pub commit_weight: u64,
    pub fee_per_kw: u64,
    pub local_routing_policy: RoutingPolicy,
    pub remote_routing_policy: RoutingPolicy,
    pub lifetime: i64,
    pub total_sent_sat: u64,
    pub total_received_sat: u64,
    pub num_updates: u64,
    /// Largest expected gap between the capacity and the sum of both balances. Unknown on
    /// CLN, where only the upper bound is checked.
    pub balance_tolerance_msat: Option<u64>,
}

impl ChannelState {
    /// Builds the snapshot of a channel listed by LND. Pending HTLCs are added back to the
    /// side that offered them.
    pub fn from_remote_channel(
        node_id: NodeId,
        channel_id: ChannelId,
        remote_node_id: NodeId,
        channel: &RemoteChannel,
        local_routing_policy: RoutingPolicy,
        remote_routing_policy: RoutingPolicy,
    ) -> Self {
        let mut state = ChannelState {
            node_id,
            channel_id,
            remote_node_id,
            status: if channel.active {
                Status::Active
            } else {
                Status::Inactive
            },
            private: channel.private,
            initiator: channel.initiator,
            capacity_msat: channel.capacity_sat * 1000,
            local_balance_msat: channel.local_balance_sat * 1000,
            remote_balance_msat: channel.remote_balance_sat * 1000,
            unsettled_balance_msat: channel.unsettled_balance_sat * 1000,
            commit_fee_sat: channel.commit_fee_sat,
            commit_weight: channel.commit_weight,
            fee_per_kw: channel.fee_per_kw,
            local_routing_policy,
            remote_routing_policy,
            lifetime: channel.lifetime,
            total_sent_sat: channel.total_sent_sat,
            total_received_sat: channel.total_received_sat,
            num_updates: channel.num_updates,
            balance_tolerance_msat: Some(
                (channel.local_reserve_sat + channel.local_dust_limit_sat)
                    .max(channel.remote_reserve_sat + channel.remote_dust_limit_sat)
                    * 1000,
            ),
            ..Default::default()
        };
        state.set_pending_htlcs(channel.pending_htlcs.clone());
        state
    }

    pub fn set_pending_htlcs(&mut self, htlcs: Vec<Htlc>) {
        for htlc in &htlcs {
            if htlc.incoming {
                self.remote_balance_msat += htlc.amount_msat;
            } else {
                self.local_balance_msat += htlc.amount_msat;
            }
            if htlc.forwarding_htlc_index == 0 {
                self.pending_incoming_htlc_count += 1;
                self.pending_incoming_htlc_amount_msat += htlc.amount_msat;
            } else {
                self.pending_outgoing_htlc_count += 1;
                self.pending_outgoing_htlc_amount_msat += htlc.amount_msat;
            }
        }
        self.pending_htlcs = htlcs;
    }

    /// Returns whether the balances are consistent with the capacity and logs otherwise.
    pub fn check_invariants(&self) -> bool {
        let sum = self.local_balance_msat.saturating_add(self.remote_balance_msat);
        if sum > self.capacity_msat {
            error!(
                target: "lnplane::critical",
                node_id = self.node_id,
                channel_id = self.channel_id,
                "remote balance ({}) + local balance ({}) > capacity ({})",
                self.remote_balance_msat,
                self.local_balance_msat,
                self.capacity_msat
            );
            return false;
        }
        if let Some(tolerance) = self.balance_tolerance_msat {
            if self.capacity_msat - sum > tolerance {
                error!(
                    target: "lnplane::critical",
                    node_id = self.node_id,
                    channel_id = self.channel_id,
                    "capacity ({}) - (remote balance ({}) + local balance ({})) > {}",
                    self.capacity_msat,
                    self.remote_balance_msat,
                    self.local_balance_msat,
                    tolerance
                );
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct ChannelStateCache {
    states: RwLock<HashMap<NodeId, HashMap<ChannelId, ChannelState>>>,
}

impl ChannelStateCache {
    /// Replaces the whole snapshot of a node in one step.
    pub fn set_channel_states(&self, node_id: NodeId, states: Vec<ChannelState>) {
        let snapshot: HashMap<_, _> = states
            .into_iter()
            .inspect(|state| {
                state.check_invariants();
            })
            .map(|state| (state.channel_id, state))
            .collect();
        debug!(node_id, channels = snapshot.len(), "channel states replaced");
        write_lock(&self.states).insert(node_id, snapshot);
    }

    pub fn set_channel_state(&self, state: ChannelState) {
        state.check_invariants();
        write_lock(&self.states)
            .entry(state.node_id)
            .or_default()
            .insert(state.channel_id, state);
    }

    pub fn has_node(&self, node_id: NodeId) -> bool {
        read_lock(&self.states).contains_key(&node_id)
    }

    pub fn get_channel_state(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
    ) -> Option<ChannelState> {
        read_lock(&self.states)
            .get(&node_id)
            .and_then(|channels| channels.get(&channel_id))
            .cloned()
    }

    pub fn get_channel_states(&self, node_id: NodeId) -> Vec<ChannelState> {
        let mut states: Vec<_> = read_lock(&self.states)
            .get(&node_id)
            .map(|channels| channels.values().cloned().collect())
            .unwrap_or_default();
        states.sort_by_key(|state| state.channel_id);
        states
    }

    fn update<R>(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        f: impl FnOnce(&mut ChannelState) -> R,
    ) -> Option<R> {
        let mut states = write_lock(&self.states);
        let state = states.get_mut(&node_id)?.get_mut(&channel_id)?;
        let result = f(state);
        state.check_invariants();
        Some(result)
    }

    /// Applies a settled amount to one side of the channel. Inbound amounts raise the
    /// remote balance, outbound amounts lower the local balance.
    pub fn update_balance_msat(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        inbound: bool,
        amount_msat: u64,
        source: BalanceUpdateSource,
    ) -> Option<ChannelBalanceEvent> {
        let event = self.update(node_id, channel_id, |state| {
            let previous_local_balance_msat = state.local_balance_msat;
            let previous_remote_balance_msat = state.remote_balance_msat;
            if inbound {
                state.remote_balance_msat = state.remote_balance_msat.saturating_add(amount_msat);
            } else {
                state.local_balance_msat = state.local_balance_msat.saturating_sub(amount_msat);
            }
            ChannelBalanceEvent {
                node_id,
                channel_id,
                source,
                inbound,
                amount_msat,
                capacity_msat: state.capacity_msat,
                previous_local_balance_msat,
                previous_remote_balance_msat,
                local_balance_msat: state.local_balance_msat,
                remote_balance_msat: state.remote_balance_msat,
                timestamp: now_timestamp_as_millis_u64(),
            }
        });
        if event.is_none() {
            debug!(node_id, channel_id, %source, "balance update for uncached channel");
        }
        event
    }

    /// Overwrites both balances, e.g. from a funds listing.
    pub fn set_balances_msat(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        local_balance_msat: u64,
        remote_balance_msat: u64,
    ) -> bool {
        self.update(node_id, channel_id, |state| {
            state.local_balance_msat = local_balance_msat;
            state.remote_balance_msat = remote_balance_msat;
        })
        .is_some()
    }

    pub fn set_routing_policy(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        local: bool,
        policy: RoutingPolicy,
    ) -> bool {
        self.update(node_id, channel_id, |state| {
            if local {
                state.local_routing_policy = policy;
            } else {
                state.remote_routing_policy = policy;
            }
        })
        .is_some()
    }

    pub fn set_channel_status(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        status: Status,
    ) -> bool {
        self.update(node_id, channel_id, |state| state.status = status)
            .is_some()
    }

    /// Sets the status of every channel of `node_id` with `remote_node_id`.
    pub fn set_channel_status_by_remote(
        &self,
        node_id: NodeId,
        remote_node_id: NodeId,
        status: Status,
    ) -> Vec<ChannelId> {
        let mut states = write_lock(&self.states);
        let Some(channels) = states.get_mut(&node_id) else {
            return Vec::new();
        };
        let mut changed: Vec<_> = channels
            .values_mut()
            .filter(|state| state.remote_node_id == remote_node_id)
            .map(|state| {
                state.status = status;
                state.channel_id
            })
            .collect();
        changed.sort_unstable();
        changed
    }

    pub fn set_node_status(&self, node_id: NodeId, status: Status) {
        if let Some(channels) = write_lock(&self.states).get_mut(&node_id) {
            for state in channels.values_mut() {
                state.status = status;
            }
        }
    }

    /// Drops a channel from every node's snapshot once it starts closing.
    pub fn remove_channel_state_from_cache(&self, channel_id: ChannelId) {
        for channels in write_lock(&self.states).values_mut() {
            channels.remove(&channel_id);
        }
    }

    pub fn remove_node(&self, node_id: NodeId) {
        write_lock(&self.states).remove(&node_id);
    }
}

#[cfg(test)]
mod tests;
