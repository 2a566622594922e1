//! Typed publish ports for everything subscribers observe.
//!
//! Stream subscribers and the supervisor publish here; the workflow trigger actor and any
//! other interested actor subscribe to the ports it cares about.

use std::sync::Arc;

use ractor::OutputPort;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{Forward, InvoiceState, PaymentStatus, RoutingPolicy},
    types::{ChannelId, ChannelStatus, NodeId, ServiceStatus, ServiceType},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub service_type: ServiceType,
    pub node_id: Option<NodeId>,
    pub previous: ServiceStatus,
    pub status: ServiceStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum BalanceUpdateSource {
    Forward,
    Invoice,
    Payment,
}

/// A delta applied to the balance cache, with the balances before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBalanceEvent {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub source: BalanceUpdateSource,
    pub inbound: bool,
    pub amount_msat: u64,
    pub capacity_msat: u64,
    pub previous_local_balance_msat: u64,
    pub previous_remote_balance_msat: u64,
    pub local_balance_msat: u64,
    pub remote_balance_msat: u64,
    pub timestamp: u64,
}

impl ChannelBalanceEvent {
    /// Local balance as a share of capacity, in per mille.
    pub fn local_balance_per_milli(&self) -> u64 {
        if self.capacity_msat == 0 {
            return 0;
        }
        self.local_balance_msat.saturating_mul(1000) / self.capacity_msat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ChannelEventKind {
    Open,
    Close,
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub kind: ChannelEventKind,
    pub status: ChannelStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicyEvent {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub announcing_node_id: NodeId,
    pub connecting_node_id: NodeId,
    pub outbound: bool,
    pub policy: RoutingPolicy,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub node_id: NodeId,
    pub peer_node_id: NodeId,
    pub connected: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEvent {
    pub node_id: NodeId,
    pub channel_id: Option<ChannelId>,
    pub label: String,
    pub state: InvoiceState,
    pub amount_paid_msat: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub node_id: NodeId,
    pub outgoing_channel_id: Option<ChannelId>,
    pub payment_hash: String,
    pub status: PaymentStatus,
    pub amount_msat: u64,
    pub fee_msat: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardEvent {
    pub node_id: NodeId,
    pub incoming_channel_id: Option<ChannelId>,
    pub outgoing_channel_id: Option<ChannelId>,
    pub forward: Forward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub node_id: NodeId,
    pub block_height: u32,
}

/// One output port per event kind.
#[derive(Default)]
pub struct EventBus {
    pub service: OutputPort<ServiceEvent>,
    pub channel: OutputPort<ChannelEvent>,
    pub channel_balance: OutputPort<ChannelBalanceEvent>,
    pub routing_policy: OutputPort<RoutingPolicyEvent>,
    pub peer: OutputPort<PeerEvent>,
    pub invoice: OutputPort<InvoiceEvent>,
    pub payment: OutputPort<PaymentEvent>,
    pub forward: OutputPort<ForwardEvent>,
    pub block: OutputPort<BlockEvent>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
