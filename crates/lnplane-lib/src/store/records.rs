//! Rows of the persisted tables and the per-table store traits.

use serde::{Deserialize, Serialize};

use crate::{
    backend::{
        HtlcEventKind, HtlcOutcome, Invoice, NodeAnnouncement, Payment, RoutingPolicy,
        Transaction,
    },
    types::{
        ChannelId, ChannelSettings, NodeId, NodeSettings, Tag, TagId, TaggedEntity,
        WorkflowVersionId,
    },
    workflow::{WorkflowNodeLog, WorkflowVersion},
};

/// One entry of the routing-policy time series of `(channel, announcing, connecting)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicyRecord {
    /// Unix millis
    pub timestamp: u64,
    pub channel_id: ChannelId,
    pub announcing_node_id: NodeId,
    pub connecting_node_id: NodeId,
    /// Managed node whose stream observed the update.
    pub node_id: NodeId,
    /// The announcing node is the managed node.
    pub outbound: bool,
    pub policy: RoutingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub node_id: NodeId,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub node_id: NodeId,
    /// Unix millis
    pub time_ms: u64,
    pub time_ns: u64,
    pub incoming_channel_id: Option<ChannelId>,
    pub outgoing_channel_id: Option<ChannelId>,
    pub incoming_amount_msat: u64,
    pub outgoing_amount_msat: u64,
    pub fee_msat: u64,
}

/// Status of a non-settled CLN forward stored as an HTLC event.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ClnForwardStatus {
    Offered = 0,
    RemoteFailed = 1,
    LocalFailed = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcEventRecord {
    pub node_id: NodeId,
    /// Unix millis
    pub time_ms: u64,
    pub event_type: HtlcOutcome,
    pub event_origin: Option<HtlcEventKind>,
    pub incoming_channel_id: Option<ChannelId>,
    pub outgoing_channel_id: Option<ChannelId>,
    pub incoming_htlc_id: Option<u64>,
    pub outgoing_htlc_id: Option<u64>,
    pub incoming_amount_msat: Option<u64>,
    pub outgoing_amount_msat: Option<u64>,
    pub failure_detail: Option<String>,
    pub cln_forward_status: Option<ClnForwardStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub node_id: NodeId,
    /// Channel the invoice was settled over, when known.
    pub channel_id: Option<ChannelId>,
    pub invoice: Invoice,
    pub updated_on: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub node_id: NodeId,
    pub payment: Payment,
    pub updated_on: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEventRecord {
    pub timestamp: u64,
    pub node_id: NodeId,
    pub event_node_id: NodeId,
    pub announcement: NodeAnnouncement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHistoryRecord {
    pub timestamp: u64,
    pub node_id: NodeId,
    pub peer_node_id: NodeId,
    pub connected: bool,
    pub address: Option<String>,
}

/// Outcome of an upsert keyed by a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub trait ChannelStore {
    fn get_channel(&self, channel_id: ChannelId) -> Option<ChannelSettings>;
    fn get_channels(&self) -> Vec<ChannelSettings>;
    /// Inserts or replaces a channel; a zero `channel_id` allocates a new id.
    fn save_channel(&self, settings: ChannelSettings) -> ChannelSettings;
}

pub trait NodeStore {
    fn get_node(&self, node_id: NodeId) -> Option<NodeSettings>;
    fn get_nodes(&self) -> Vec<NodeSettings>;
    /// Inserts or replaces a node; a zero `node_id` allocates a new id.
    fn save_node(&self, settings: NodeSettings) -> NodeSettings;
}

pub trait RoutingPolicyStore {
    /// Appends `record` unless the latest row of its series has the same policy.
    fn insert_routing_policy(&self, record: RoutingPolicyRecord) -> bool;
    fn get_latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        connecting_node_id: NodeId,
    ) -> Option<RoutingPolicyRecord>;
    fn get_latest_routing_policy_by_announcer(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
    ) -> Option<RoutingPolicyRecord>;
    /// Rows of a channel with `timestamp >= since`, oldest first.
    fn get_routing_policies_since(&self, channel_id: ChannelId, since: u64)
        -> Vec<RoutingPolicyRecord>;
}

pub trait TransactionStore {
    /// Idempotent on `(timestamp, tx_hash)`.
    fn insert_transaction(&self, record: TransactionRecord) -> bool;
    fn get_transactions(&self, node_id: NodeId) -> Vec<TransactionRecord>;
    fn get_max_transaction_block_height(&self, node_id: NodeId) -> Option<u32>;
}

pub trait ForwardStore {
    /// Idempotent on `(time, time_ns)`.
    fn insert_forward(&self, record: ForwardRecord) -> bool;
    fn get_forwards(&self, node_id: NodeId) -> Vec<ForwardRecord>;
    /// Latest forward time of the node, optionally restricted to forwards entering
    /// (`incoming`) or leaving a channel.
    fn get_latest_forward_time(
        &self,
        node_id: NodeId,
        channel: Option<(ChannelId, bool)>,
    ) -> Option<u64>;
}

pub trait HtlcEventStore {
    /// Idempotent on `(time, incoming htlc id, outgoing htlc id)`.
    fn insert_htlc_event(&self, record: HtlcEventRecord) -> bool;
    fn get_htlc_events(&self, node_id: NodeId) -> Vec<HtlcEventRecord>;
    fn get_latest_cln_htlc_event_time(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        incoming: bool,
        status: ClnForwardStatus,
    ) -> Option<u64>;
}

pub trait InvoiceStore {
    fn get_invoice(&self, node_id: NodeId, label: &str) -> Option<InvoiceRecord>;
    fn get_invoices(&self, node_id: NodeId) -> Vec<InvoiceRecord>;
    /// Inserts a new label, updates it only when its settlement or state changed.
    fn save_invoice(&self, record: InvoiceRecord) -> UpsertOutcome;
    fn get_max_invoice_creation_date(&self, node_id: NodeId) -> Option<u64>;
    fn get_max_invoice_settle_date(&self, node_id: NodeId) -> Option<u64>;
    /// Highest `(add_index, settle_index)` seen for the node.
    fn get_max_invoice_indexes(&self, node_id: NodeId) -> (u64, u64);
}

pub trait PaymentStore {
    fn get_payment(&self, node_id: NodeId, payment_hash: &str) -> Option<PaymentRecord>;
    fn get_payments(&self, node_id: NodeId) -> Vec<PaymentRecord>;
    fn save_payment(&self, record: PaymentRecord) -> UpsertOutcome;
    fn get_max_payment_creation_time(&self, node_id: NodeId) -> Option<u64>;
    fn get_max_payment_index(&self, node_id: NodeId) -> u64;
}

pub trait NodeEventStore {
    /// Appends `record` unless the announcement equals the latest stored one.
    fn insert_node_event(&self, record: NodeEventRecord) -> bool;
    fn get_latest_node_event(&self, event_node_id: NodeId) -> Option<NodeEventRecord>;
}

pub trait ConnectionHistoryStore {
    /// Appends `record` unless the connection status equals the latest stored one.
    fn insert_connection_history(&self, record: ConnectionHistoryRecord) -> bool;
    fn get_connection_history(
        &self,
        node_id: NodeId,
        peer_node_id: NodeId,
    ) -> Vec<ConnectionHistoryRecord>;
}

pub trait WorkflowStore {
    fn save_workflow_version(&self, version: WorkflowVersion);
    fn get_workflow_version(&self, workflow_version_id: WorkflowVersionId)
        -> Option<WorkflowVersion>;
    fn get_workflow_versions(&self) -> Vec<WorkflowVersion>;
    fn insert_workflow_node_log(&self, log: WorkflowNodeLog);
    fn get_workflow_node_logs(
        &self,
        workflow_version_id: WorkflowVersionId,
    ) -> Vec<WorkflowNodeLog>;
}

pub trait TagStore {
    /// A zero `tag_id` allocates a new id.
    fn save_tag(&self, tag: Tag) -> Tag;
    fn get_tags(&self) -> Vec<Tag>;
    fn add_tag(&self, entity: TaggedEntity, tag_id: TagId);
    fn remove_tag(&self, entity: TaggedEntity, tag_id: TagId);
    fn get_tagged_entities(&self) -> Vec<(TaggedEntity, TagId)>;
}

/// Every table, for components that read and write across them.
pub trait PlaneStore:
    ChannelStore
    + NodeStore
    + RoutingPolicyStore
    + TransactionStore
    + ForwardStore
    + HtlcEventStore
    + InvoiceStore
    + PaymentStore
    + NodeEventStore
    + ConnectionHistoryStore
    + WorkflowStore
    + TagStore
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> PlaneStore for T where
    T: ChannelStore
        + NodeStore
        + RoutingPolicyStore
        + TransactionStore
        + ForwardStore
        + HtlcEventStore
        + InvoiceStore
        + PaymentStore
        + NodeEventStore
        + ConnectionHistoryStore
        + WorkflowStore
        + TagStore
        + Clone
        + Send
        + Sync
        + 'static
{
}
