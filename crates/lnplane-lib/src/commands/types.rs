use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    backend::{PaymentStatus, RoutingPolicy},
    types::{ChannelId, ChannelPoint, ChannelStatus, FailedRequest, Implementation, NodeId, Status},
};

/// Tagged result of a command. Backend failures are reported here instead of as `Err`, with
/// `status` set to `Inactive` and the cause chain rendered into `error`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse<T> {
    pub status: Status,
    pub message: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_updates: Vec<FailedRequest>,
    pub data: Option<T>,
}

impl<T> CommandResponse<T> {
    pub fn active(data: T) -> Self {
        Self {
            status: Status::Active,
            message: None,
            error: None,
            failed_updates: Vec::new(),
            data: Some(data),
        }
    }

    /// Accepted but nothing was done, e.g. an idempotent or rate-limited request.
    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            status: Status::Active,
            message: Some(message.into()),
            error: None,
            failed_updates: Vec::new(),
            data: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Status::Inactive,
            message: None,
            error: Some(error.into()),
            failed_updates: Vec::new(),
            data: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResponse<U> {
        CommandResponse {
            status: self.status,
            message: self.message,
            error: self.error,
            failed_updates: self.failed_updates,
            data: self.data.map(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInformation {
    pub node_id: NodeId,
    pub implementation: Implementation,
    pub version: String,
    pub public_key: String,
    pub alias: String,
    pub color: String,
    pub pending_channel_count: u32,
    pub active_channel_count: u32,
    pub inactive_channel_count: u32,
    pub peer_count: u32,
    pub block_height: u32,
    pub block_hash: String,
    pub chain_synced: bool,
    pub graph_synced: bool,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageRequest {
    pub node_id: NodeId,
    pub message: String,
    pub single_hash: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySignatureRequest {
    pub node_id: NodeId,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySignatureResponse {
    pub valid: bool,
    pub public_key: String,
}

/// Fields of a routing policy to change. `None` keeps the current value.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub fee_rate_milli_msat: Option<u64>,
    pub fee_base_msat: Option<u64>,
    pub max_htlc_msat: Option<u64>,
    pub min_htlc_msat: Option<u64>,
    pub time_lock_delta: Option<u32>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying the update to `current` would change anything.
    pub fn changes(&self, current: &RoutingPolicy) -> bool {
        self.fee_rate_milli_msat
            .is_some_and(|v| v != current.fee_rate_milli_msat)
            || self.fee_base_msat.is_some_and(|v| v != current.fee_base_msat)
            || self.max_htlc_msat.is_some_and(|v| v != current.max_htlc_msat)
            || self.min_htlc_msat.is_some_and(|v| v != current.min_htlc_msat)
            || self.time_lock_delta.is_some_and(|v| v != current.time_lock_delta)
    }

    /// Fills every unset field from `current`.
    pub fn resolved(&self, current: &RoutingPolicy) -> PolicyUpdate {
        PolicyUpdate {
            fee_rate_milli_msat: Some(
                self.fee_rate_milli_msat
                    .unwrap_or(current.fee_rate_milli_msat),
            ),
            fee_base_msat: Some(self.fee_base_msat.unwrap_or(current.fee_base_msat)),
            max_htlc_msat: Some(self.max_htlc_msat.unwrap_or(current.max_htlc_msat)),
            min_htlc_msat: Some(self.min_htlc_msat.unwrap_or(current.min_htlc_msat)),
            time_lock_delta: Some(self.time_lock_delta.unwrap_or(current.time_lock_delta)),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicyUpdateRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    #[serde(flatten)]
    pub policy: PolicyUpdate,
    /// Overrides the configured rate-limit window.
    pub rate_limit_seconds: Option<u64>,
    /// Overrides the configured number of changes allowed per field within the window.
    pub rate_limit_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPeerRequest {
    pub node_id: NodeId,
    pub public_key: String,
    pub host: String,
    pub persist: Option<bool>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPeerRequest {
    pub node_id: NodeId,
    pub peer_node_id: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub total_balance_sat: u64,
    pub confirmed_balance_sat: u64,
    pub unconfirmed_balance_sat: u64,
    pub locked_balance_sat: u64,
    pub reserved_balance_anchor_channel_sat: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum AddressType {
    #[default]
    P2wpkh,
    P2wsh,
    NestedP2wpkh,
    P2tr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddressRequest {
    pub node_id: NodeId,
    pub address_type: AddressType,
    pub account: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub node_id: NodeId,
    pub public_key: String,
    pub local_funding_amount_sat: u64,
    pub push_amount_sat: Option<u64>,
    pub target_conf: Option<u32>,
    pub sat_per_vbyte: Option<u64>,
    pub private: Option<bool>,
    pub min_htlc_msat: Option<u64>,
    pub remote_csv_delay: Option<u32>,
    pub min_confs: Option<u32>,
    pub spend_unconfirmed: Option<bool>,
    pub close_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelResponse {
    pub status: ChannelStatus,
    pub channel_point: ChannelPoint,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOpenChannel {
    pub public_key: String,
    pub local_funding_amount_sat: u64,
    pub push_amount_sat: Option<u64>,
    pub private: Option<bool>,
    pub min_htlc_msat: Option<u64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOpenChannelRequest {
    pub node_id: NodeId,
    pub channels: Vec<BatchOpenChannel>,
    pub target_conf: Option<u32>,
    pub sat_per_vbyte: Option<u64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub force: Option<bool>,
    pub target_conf: Option<u32>,
    pub delivery_address: Option<String>,
    pub sat_per_vbyte: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelResponse {
    pub status: ChannelStatus,
    pub closing_transaction_hash: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceRequest {
    pub node_id: NodeId,
    pub memo: Option<String>,
    pub preimage: Option<String>,
    pub value_msat: Option<u64>,
    pub expiry_seconds: Option<u64>,
    pub fallback_address: Option<String>,
    pub private: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceResponse {
    pub payment_request: String,
    pub payment_hash: String,
    pub add_index: u64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainPaymentRequest {
    pub node_id: NodeId,
    pub address: String,
    pub amount_sat: u64,
    pub target_conf: Option<u32>,
    pub sat_per_vbyte: Option<u64>,
    pub label: Option<String>,
    pub send_all: Option<bool>,
}

/// Either `invoice` or `destination` + `amount_msat` must be set.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentRequest {
    pub node_id: NodeId,
    pub invoice: Option<String>,
    pub timeout_seconds: u32,
    pub fee_limit_msat: Option<u64>,
    pub amount_msat: Option<u64>,
    pub destination: Option<String>,
    #[serde(default)]
    pub allow_self_payment: bool,
    /// Restricts the first hop to this channel.
    pub outgoing_channel_id: Option<ChannelId>,
    /// Restricts the last hop to arrive over this channel.
    pub last_hop_channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeInvoiceRequest {
    pub node_id: NodeId,
    pub invoice: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInvoice {
    pub destination_public_key: String,
    pub payment_hash: String,
    pub value_msat: u64,
    /// Unix seconds
    pub created_at: u64,
    pub expiry_seconds: u64,
    pub cltv_expiry: u64,
    pub memo: String,
    pub fallback_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatusUpdateRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    /// `Active` enables the channel, anything else disables it.
    pub status: Status,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFundsOffChainRequest {
    pub outgoing_node_id: NodeId,
    pub incoming_node_id: NodeId,
    pub channel_id: ChannelId,
    pub amount_msat: u64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFundsOffChainResponse {
    pub status: PaymentStatus,
    pub payment_hash: String,
    pub fee_msat: u64,
    pub failure_reason: Option<String>,
}
