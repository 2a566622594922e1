//! Adapters for the Lightning daemons the plane manages.
//!
//! Each daemon family gets a client trait ([`LndClient`], [`ClnClient`]) that exposes the
//! streams and list calls its subscribers need, on top of the shared unary command
//! catalogue in [`LightningCommands`]. The records below are the implementation-agnostic
//! shapes the adapters translate the daemons' own responses into.

pub mod cln;
pub mod lnd;

pub use cln::{ClnClient, GrpcClnConnector};
pub use lnd::{GrpcLndConnector, LndClient};

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    commands::types::{
        BatchOpenChannelRequest, ChannelStatusUpdateRequest, CloseChannelRequest,
        CloseChannelResponse, ConnectPeerRequest, DecodeInvoiceRequest, DecodedInvoice,
        NewAddressRequest, NewInvoiceRequest, NewInvoiceResponse, NewPaymentRequest,
        NodeInformation, OnChainPaymentRequest, OpenChannelRequest, OpenChannelResponse,
        PolicyUpdate, SignMessageRequest, VerifySignatureRequest, VerifySignatureResponse,
        WalletBalance,
    },
    types::{ChannelPoint, ChannelStatus, FailedRequest},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Not implemented by this backend: {0}")]
    Unimplemented(&'static str),
    #[error("Stream closed unexpectedly")]
    StreamClosed,
    #[error("Connection error: {0}")]
    Connection(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

pub type EventStream<T> = BoxStream<'static, BackendResult<T>>;

pub(crate) fn rpc_error(status: impl std::fmt::Display) -> BackendError {
    BackendError::Rpc(status.to_string())
}

/// Configured endpoints are `host:port`; both daemons only speak gRPC over TLS.
pub(crate) fn endpoint_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// One side of a channel as advertised to the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub disabled: bool,
    pub time_lock_delta: u32,
    pub min_htlc_msat: u64,
    pub max_htlc_msat: u64,
    pub fee_base_msat: u64,
    pub fee_rate_milli_msat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Htlc {
    pub incoming: bool,
    pub amount_msat: u64,
    pub hash_lock: String,
    pub expiration_height: u32,
    pub htlc_index: u64,
    pub forwarding_channel: u64,
    pub forwarding_htlc_index: u64,
}

/// An open channel as listed by the daemon that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChannel {
    pub channel_point: ChannelPoint,
    pub lnd_short_channel_id: u64,
    pub remote_public_key: String,
    pub active: bool,
    pub private: bool,
    pub initiator: bool,
    pub capacity_sat: u64,
    pub local_balance_sat: u64,
    pub remote_balance_sat: u64,
    pub commit_fee_sat: u64,
    pub commit_weight: u64,
    pub fee_per_kw: u64,
    pub unsettled_balance_sat: u64,
    pub total_sent_sat: u64,
    pub total_received_sat: u64,
    pub num_updates: u64,
    pub lifetime: i64,
    pub local_reserve_sat: u64,
    pub remote_reserve_sat: u64,
    pub local_dust_limit_sat: u64,
    pub remote_dust_limit_sat: u64,
    pub pending_htlcs: Vec<Htlc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedChannel {
    pub channel_point: ChannelPoint,
    pub lnd_short_channel_id: u64,
    pub remote_public_key: String,
    pub capacity_sat: u64,
    pub close_height: u32,
    pub closing_tx_hash: String,
    pub close_type: ChannelStatus,
    pub open_initiator_local: Option<bool>,
    pub close_initiator_local: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    PendingOpen(ChannelPoint),
    Open(RemoteChannel),
    Active(ChannelPoint),
    Inactive(ChannelPoint),
    Closed(ClosedChannel),
    FullyResolved(ChannelPoint),
}

/// Both sides of a channel from the network graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdge {
    pub lnd_short_channel_id: u64,
    pub channel_point: ChannelPoint,
    pub capacity_sat: u64,
    pub node1_public_key: String,
    pub node2_public_key: String,
    pub node1_policy: Option<RoutingPolicy>,
    pub node2_policy: Option<RoutingPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdgeUpdate {
    pub lnd_short_channel_id: u64,
    pub channel_point: ChannelPoint,
    pub capacity_sat: u64,
    pub advertising_node: String,
    pub connecting_node: String,
    pub routing_policy: RoutingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub public_key: String,
    pub alias: String,
    pub color: String,
    pub addresses: Vec<String>,
    pub features: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdate {
    pub node_updates: Vec<NodeAnnouncement>,
    pub channel_updates: Vec<ChannelEdgeUpdate>,
    pub closed_channels: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum HtlcEventKind {
    Send,
    Receive,
    Forward,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum HtlcOutcome {
    ForwardEvent,
    ForwardFailEvent,
    SettleEvent,
    LinkFailEvent,
    FinalHtlcEvent,
    SubscribedEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcEvent {
    pub timestamp_ns: u64,
    pub incoming_lnd_short_channel_id: u64,
    pub outgoing_lnd_short_channel_id: u64,
    pub incoming_htlc_id: u64,
    pub outgoing_htlc_id: u64,
    pub kind: HtlcEventKind,
    pub outcome: HtlcOutcome,
    pub incoming_amount_msat: Option<u64>,
    pub outgoing_amount_msat: Option<u64>,
    pub failure_detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ForwardStatus {
    Settled,
    Offered,
    LocalFailed,
    Failed,
}

/// A forward as reported by the daemon. CLN reports every status, LND only settled ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    /// Unix millis, with the sub-millisecond part in `time_ns`.
    pub time_ms: u64,
    pub time_ns: u64,
    pub incoming_short_channel_id: String,
    pub outgoing_short_channel_id: Option<String>,
    pub amount_in_msat: u64,
    pub amount_out_msat: u64,
    pub fee_msat: u64,
    pub incoming_htlc_id: Option<u64>,
    pub outgoing_htlc_id: Option<u64>,
    pub status: ForwardStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHtlc {
    pub lnd_short_channel_id: u64,
    pub amount_msat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// CLN label, or the hex payment hash for LND.
    pub label: String,
    pub payment_hash: String,
    pub payment_request: String,
    pub memo: String,
    pub value_msat: u64,
    pub amount_paid_msat: u64,
    pub state: InvoiceState,
    pub add_index: u64,
    pub settle_index: u64,
    /// Unix millis
    pub creation_date: u64,
    pub settle_date: Option<u64>,
    pub htlcs: Vec<InvoiceHtlc>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum PaymentStatus {
    #[default]
    Unknown,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
    pub payment_preimage: Option<String>,
    pub payment_request: String,
    pub payment_index: u64,
    pub status: PaymentStatus,
    pub value_msat: u64,
    pub fee_msat: u64,
    /// Unix nanos
    pub creation_time_ns: u64,
    pub failure_reason: Option<String>,
    /// First hop of the succeeded attempt.
    pub outgoing_lnd_short_channel_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: String,
    /// Unix millis
    pub timestamp: u64,
    pub amount_sat: i64,
    pub total_fees_sat: u64,
    pub block_height: Option<u32>,
    pub block_hash: Option<String>,
    pub dest_addresses: Vec<String>,
    pub raw_tx_hex: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub public_key: String,
    pub address: String,
    pub inbound: bool,
    pub ping_time: i64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub public_key: String,
    pub online: bool,
}

/// Fully resolved policy change for one channel, as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPolicyUpdate {
    pub channel_point: ChannelPoint,
    pub short_channel_id: Option<String>,
    pub policy: PolicyUpdate,
}

/// Resolved request for a payment leaving over a specific channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPayment {
    pub request: NewPaymentRequest,
    pub outgoing_lnd_short_channel_id: Option<u64>,
    pub last_hop_public_key: Option<String>,
}

/// The unary command catalogue every backend adapter answers. Operations a backend does
/// not support keep the default body.
#[async_trait::async_trait]
pub trait LightningCommands: Send + Sync {
    async fn get_information(&self) -> BackendResult<NodeInformation> {
        Err(BackendError::Unimplemented("GetInformation"))
    }

    async fn sign_message(&self, _request: &SignMessageRequest) -> BackendResult<String> {
        Err(BackendError::Unimplemented("SignMessage"))
    }

    async fn verify_signature(
        &self,
        _request: &VerifySignatureRequest,
    ) -> BackendResult<VerifySignatureResponse> {
        Err(BackendError::Unimplemented("VerifySignature"))
    }

    /// Returns the per-channel failures reported by the daemon.
    async fn update_routing_policy(
        &self,
        _update: &BackendPolicyUpdate,
    ) -> BackendResult<Vec<FailedRequest>> {
        Err(BackendError::Unimplemented("UpdateRoutingPolicy"))
    }

    async fn connect_peer(&self, _request: &ConnectPeerRequest) -> BackendResult<()> {
        Err(BackendError::Unimplemented("ConnectPeer"))
    }

    async fn disconnect_peer(&self, _public_key: &str) -> BackendResult<()> {
        Err(BackendError::Unimplemented("DisconnectPeer"))
    }

    async fn get_wallet_balance(&self) -> BackendResult<WalletBalance> {
        Err(BackendError::Unimplemented("GetWalletBalance"))
    }

    async fn list_peers(&self) -> BackendResult<Vec<Peer>> {
        Err(BackendError::Unimplemented("ListPeers"))
    }

    async fn new_address(&self, _request: &NewAddressRequest) -> BackendResult<String> {
        Err(BackendError::Unimplemented("NewAddress"))
    }

    async fn open_channel(
        &self,
        _request: &OpenChannelRequest,
    ) -> BackendResult<OpenChannelResponse> {
        Err(BackendError::Unimplemented("OpenChannel"))
    }

    async fn batch_open_channel(
        &self,
        _request: &BatchOpenChannelRequest,
    ) -> BackendResult<Vec<ChannelPoint>> {
        Err(BackendError::Unimplemented("BatchOpenChannel"))
    }

    async fn close_channel(
        &self,
        _request: &CloseChannelRequest,
        _channel_point: &ChannelPoint,
    ) -> BackendResult<CloseChannelResponse> {
        Err(BackendError::Unimplemented("CloseChannel"))
    }

    async fn new_invoice(&self, _request: &NewInvoiceRequest) -> BackendResult<NewInvoiceResponse> {
        Err(BackendError::Unimplemented("NewInvoice"))
    }

    async fn on_chain_payment(&self, _request: &OnChainPaymentRequest) -> BackendResult<String> {
        Err(BackendError::Unimplemented("OnChainPayment"))
    }

    /// Sends a payment and waits for its final status.
    async fn new_payment(&self, _payment: &BackendPayment) -> BackendResult<Payment> {
        Err(BackendError::Unimplemented("NewPayment"))
    }

    async fn decode_invoice(
        &self,
        _request: &DecodeInvoiceRequest,
    ) -> BackendResult<DecodedInvoice> {
        Err(BackendError::Unimplemented("DecodeInvoice"))
    }

    async fn channel_status_update(
        &self,
        _request: &ChannelStatusUpdateRequest,
        _channel_point: &ChannelPoint,
    ) -> BackendResult<()> {
        Err(BackendError::Unimplemented("ChannelStatusUpdate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_adds_https_scheme() {
        assert_eq!(endpoint_url("localhost:10009"), "https://localhost:10009");
        assert_eq!(endpoint_url("https://10.0.0.2:9736"), "https://10.0.0.2:9736");
    }
}
