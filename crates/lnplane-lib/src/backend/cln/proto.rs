//! Messages of the `cln.Node` gRPC service, limited to the calls and fields the plane reads.
//! Enumerations travel as their `int32` wire value; the constants below name the ones the
//! adapter matches on.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod method {
    pub const GETINFO: &str = "/cln.Node/Getinfo";
    pub const LIST_PEERS: &str = "/cln.Node/ListPeers";
    pub const LIST_FUNDS: &str = "/cln.Node/ListFunds";
    pub const LIST_CHANNELS: &str = "/cln.Node/ListChannels";
    pub const LIST_PEER_CHANNELS: &str = "/cln.Node/ListPeerChannels";
    pub const LIST_CLOSED_CHANNELS: &str = "/cln.Node/ListClosedChannels";
    pub const LIST_NODES: &str = "/cln.Node/ListNodes";
    pub const LIST_TRANSACTIONS: &str = "/cln.Node/ListTransactions";
    pub const LIST_FORWARDS: &str = "/cln.Node/ListForwards";
    pub const LIST_INVOICES: &str = "/cln.Node/ListInvoices";
    pub const LIST_SEND_PAYS: &str = "/cln.Node/ListSendPays";
    pub const CONNECT_PEER: &str = "/cln.Node/ConnectPeer";
    pub const DISCONNECT: &str = "/cln.Node/Disconnect";
    pub const NEW_ADDR: &str = "/cln.Node/NewAddr";
    pub const FUND_CHANNEL: &str = "/cln.Node/FundChannel";
    pub const CLOSE: &str = "/cln.Node/Close";
    pub const INVOICE: &str = "/cln.Node/Invoice";
    pub const WITHDRAW: &str = "/cln.Node/Withdraw";
    pub const PAY: &str = "/cln.Node/Pay";
    pub const DECODE_PAY: &str = "/cln.Node/DecodePay";
    pub const SET_CHANNEL: &str = "/cln.Node/SetChannel";
    pub const SIGN_MESSAGE: &str = "/cln.Node/SignMessage";
    pub const CHECK_MESSAGE: &str = "/cln.Node/CheckMessage";
}

pub mod channel_state {
    pub const OPENINGD: i32 = 0;
    pub const CHANNELD_AWAITING_LOCKIN: i32 = 1;
    pub const CHANNELD_NORMAL: i32 = 2;
    pub const CHANNELD_SHUTTING_DOWN: i32 = 3;
    pub const DUALOPEND_OPEN_INIT: i32 = 9;
    pub const DUALOPEND_AWAITING_LOCKIN: i32 = 10;
}

pub mod channel_side {
    pub const LOCAL: i32 = 0;
    pub const REMOTE: i32 = 1;
}

pub mod close_cause {
    pub const UNKNOWN: i32 = 0;
    pub const LOCAL: i32 = 1;
    pub const USER: i32 = 2;
    pub const REMOTE: i32 = 3;
    pub const PROTOCOL: i32 = 4;
    pub const ONCHAIN: i32 = 5;
}

pub mod output_status {
    pub const UNCONFIRMED: i32 = 0;
    pub const CONFIRMED: i32 = 1;
    pub const SPENT: i32 = 2;
    pub const IMMATURE: i32 = 3;
}

pub mod forward_status {
    pub const OFFERED: i32 = 0;
    pub const SETTLED: i32 = 1;
    pub const LOCAL_FAILED: i32 = 2;
    pub const FAILED: i32 = 3;
}

pub mod invoice_status {
    pub const UNPAID: i32 = 0;
    pub const PAID: i32 = 1;
    pub const EXPIRED: i32 = 2;
}

pub mod sendpay_status {
    pub const PENDING: i32 = 0;
    pub const COMPLETE: i32 = 1;
    pub const FAILED: i32 = 2;
}

pub mod pay_status {
    pub const COMPLETE: i32 = 0;
    pub const PENDING: i32 = 1;
    pub const FAILED: i32 = 2;
}

pub mod htlc_direction {
    pub const IN: i32 = 0;
}

pub mod address_type {
    pub const BECH32: i32 = 0;
    pub const P2TR: i32 = 3;
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Amount {
    #[prost(uint64, tag = "1")]
    pub msat: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AmountOrAll {
    #[prost(oneof = "amount_or_all::Value", tags = "1, 2")]
    pub value: Option<amount_or_all::Value>,
}

pub mod amount_or_all {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        Amount(super::Amount),
        #[prost(bool, tag = "2")]
        All(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AmountOrAny {
    #[prost(oneof = "amount_or_any::Value", tags = "1, 2")]
    pub value: Option<amount_or_any::Value>,
}

pub mod amount_or_any {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        Amount(super::Amount),
        #[prost(bool, tag = "2")]
        Any(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feerate {
    #[prost(oneof = "feerate::Style", tags = "1, 2, 3, 4, 5")]
    pub style: Option<feerate::Style>,
}

pub mod feerate {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Style {
        #[prost(bool, tag = "1")]
        Slow(bool),
        #[prost(bool, tag = "2")]
        Normal(bool),
        #[prost(bool, tag = "3")]
        Urgent(bool),
        #[prost(uint32, tag = "4")]
        Perkb(u32),
        #[prost(uint32, tag = "5")]
        Perkw(u32),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetinfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetinfoResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub alias: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub color: Vec<u8>,
    #[prost(uint32, tag = "4")]
    pub num_peers: u32,
    #[prost(uint32, tag = "5")]
    pub num_pending_channels: u32,
    #[prost(uint32, tag = "6")]
    pub num_active_channels: u32,
    #[prost(uint32, tag = "7")]
    pub num_inactive_channels: u32,
    #[prost(string, tag = "8")]
    pub version: String,
    #[prost(uint32, tag = "11")]
    pub blockheight: u32,
    #[prost(string, tag = "12")]
    pub network: String,
    #[prost(message, repeated, tag = "14")]
    pub address: Vec<GetinfoAddress>,
    #[prost(string, optional, tag = "16")]
    pub warning_bitcoind_sync: Option<String>,
    #[prost(string, optional, tag = "17")]
    pub warning_lightningd_sync: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetinfoAddress {
    #[prost(int32, tag = "1")]
    pub item_type: i32,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(string, optional, tag = "3")]
    pub address: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeersRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeersResponse {
    #[prost(message, repeated, tag = "1")]
    pub peers: Vec<ListpeersPeers>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeersPeers {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub connected: bool,
    #[prost(string, repeated, tag = "5")]
    pub netaddr: Vec<String>,
    #[prost(string, optional, tag = "7")]
    pub remote_addr: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListfundsRequest {
    #[prost(bool, optional, tag = "1")]
    pub spent: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListfundsResponse {
    #[prost(message, repeated, tag = "1")]
    pub outputs: Vec<ListfundsOutputs>,
    #[prost(message, repeated, tag = "2")]
    pub channels: Vec<ListfundsChannels>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListfundsOutputs {
    #[prost(bytes = "vec", tag = "1")]
    pub txid: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub output: u32,
    #[prost(message, optional, tag = "3")]
    pub amount_msat: Option<Amount>,
    #[prost(int32, tag = "7")]
    pub status: i32,
    #[prost(bool, tag = "9")]
    pub reserved: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListfundsChannels {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub our_amount_msat: Option<Amount>,
    #[prost(message, optional, tag = "3")]
    pub amount_msat: Option<Amount>,
    #[prost(bytes = "vec", tag = "4")]
    pub funding_txid: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub funding_output: u32,
    #[prost(bool, tag = "6")]
    pub connected: bool,
    #[prost(int32, tag = "7")]
    pub state: i32,
    #[prost(string, optional, tag = "8")]
    pub short_channel_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListchannelsRequest {
    #[prost(string, optional, tag = "1")]
    pub short_channel_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub source: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub destination: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListchannelsResponse {
    #[prost(message, repeated, tag = "1")]
    pub channels: Vec<ListchannelsChannels>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListchannelsChannels {
    #[prost(bytes = "vec", tag = "1")]
    pub source: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub destination: Vec<u8>,
    #[prost(string, tag = "3")]
    pub short_channel_id: String,
    #[prost(bool, tag = "4")]
    pub public: bool,
    #[prost(message, optional, tag = "5")]
    pub amount_msat: Option<Amount>,
    #[prost(bool, tag = "8")]
    pub active: bool,
    #[prost(uint32, tag = "10")]
    pub base_fee_millisatoshi: u32,
    #[prost(uint32, tag = "11")]
    pub fee_per_millionth: u32,
    #[prost(uint32, tag = "12")]
    pub delay: u32,
    #[prost(message, optional, tag = "13")]
    pub htlc_minimum_msat: Option<Amount>,
    #[prost(message, optional, tag = "14")]
    pub htlc_maximum_msat: Option<Amount>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeerchannelsRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeerchannelsResponse {
    #[prost(message, repeated, tag = "1")]
    pub channels: Vec<ListpeerchannelsChannels>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeerchannelsChannels {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub peer_connected: bool,
    #[prost(int32, tag = "3")]
    pub state: i32,
    #[prost(string, optional, tag = "8")]
    pub short_channel_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub funding_txid: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "11")]
    pub funding_outnum: Option<u32>,
    #[prost(bool, optional, tag = "18")]
    pub private: Option<bool>,
    #[prost(int32, tag = "19")]
    pub opener: i32,
    #[prost(int32, optional, tag = "20")]
    pub closer: Option<i32>,
    #[prost(message, optional, tag = "23")]
    pub to_us_msat: Option<Amount>,
    #[prost(message, optional, tag = "26")]
    pub total_msat: Option<Amount>,
    #[prost(message, optional, tag = "27")]
    pub fee_base_msat: Option<Amount>,
    #[prost(uint32, optional, tag = "28")]
    pub fee_proportional_millionths: Option<u32>,
    #[prost(message, optional, tag = "29")]
    pub dust_limit_msat: Option<Amount>,
    #[prost(message, optional, tag = "31")]
    pub their_reserve_msat: Option<Amount>,
    #[prost(message, optional, tag = "32")]
    pub our_reserve_msat: Option<Amount>,
    #[prost(message, optional, tag = "36")]
    pub minimum_htlc_out_msat: Option<Amount>,
    #[prost(message, optional, tag = "37")]
    pub maximum_htlc_out_msat: Option<Amount>,
    #[prost(message, repeated, tag = "52")]
    pub htlcs: Vec<ListpeerchannelsChannelsHtlcs>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListpeerchannelsChannelsHtlcs {
    #[prost(int32, tag = "1")]
    pub direction: i32,
    #[prost(uint64, tag = "2")]
    pub id: u64,
    #[prost(message, optional, tag = "3")]
    pub amount_msat: Option<Amount>,
    #[prost(uint32, tag = "4")]
    pub expiry: u32,
    #[prost(bytes = "vec", tag = "5")]
    pub payment_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListclosedchannelsRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListclosedchannelsResponse {
    #[prost(message, repeated, tag = "1")]
    pub closedchannels: Vec<ListclosedchannelsClosedchannels>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListclosedchannelsClosedchannels {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub peer_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub channel_id: Vec<u8>,
    #[prost(string, optional, tag = "3")]
    pub short_channel_id: Option<String>,
    #[prost(int32, tag = "5")]
    pub opener: i32,
    #[prost(int32, optional, tag = "6")]
    pub closer: Option<i32>,
    #[prost(bool, tag = "7")]
    pub private: bool,
    #[prost(bytes = "vec", tag = "12")]
    pub funding_txid: Vec<u8>,
    #[prost(uint32, tag = "13")]
    pub funding_outnum: u32,
    #[prost(message, optional, tag = "18")]
    pub total_msat: Option<Amount>,
    #[prost(message, optional, tag = "19")]
    pub final_to_us_msat: Option<Amount>,
    #[prost(int32, tag = "24")]
    pub close_cause: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListnodesRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListnodesResponse {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<ListnodesNodes>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListnodesNodes {
    #[prost(bytes = "vec", tag = "1")]
    pub nodeid: Vec<u8>,
    #[prost(uint32, optional, tag = "2")]
    pub last_timestamp: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub alias: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub color: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub features: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "6")]
    pub addresses: Vec<ListnodesNodesAddresses>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListnodesNodesAddresses {
    #[prost(int32, tag = "1")]
    pub item_type: i32,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(string, optional, tag = "3")]
    pub address: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListtransactionsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListtransactionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub transactions: Vec<ListtransactionsTransactions>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListtransactionsTransactions {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub rawtx: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub blockheight: u32,
    #[prost(uint32, tag = "4")]
    pub txindex: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListforwardsRequest {
    #[prost(int32, optional, tag = "1")]
    pub status: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub in_channel: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub out_channel: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListforwardsResponse {
    #[prost(message, repeated, tag = "1")]
    pub forwards: Vec<ListforwardsForwards>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListforwardsForwards {
    #[prost(string, tag = "1")]
    pub in_channel: String,
    #[prost(message, optional, tag = "2")]
    pub in_msat: Option<Amount>,
    #[prost(int32, tag = "3")]
    pub status: i32,
    /// Unix seconds with a fractional part.
    #[prost(double, tag = "4")]
    pub received_time: f64,
    #[prost(string, optional, tag = "5")]
    pub out_channel: Option<String>,
    #[prost(message, optional, tag = "7")]
    pub fee_msat: Option<Amount>,
    #[prost(message, optional, tag = "8")]
    pub out_msat: Option<Amount>,
    #[prost(uint64, optional, tag = "10")]
    pub in_htlc_id: Option<u64>,
    #[prost(uint64, optional, tag = "11")]
    pub out_htlc_id: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListinvoicesRequest {
    #[prost(string, optional, tag = "1")]
    pub label: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListinvoicesResponse {
    #[prost(message, repeated, tag = "1")]
    pub invoices: Vec<ListinvoicesInvoices>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListinvoicesInvoices {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub payment_hash: Vec<u8>,
    #[prost(int32, tag = "4")]
    pub status: i32,
    #[prost(uint64, tag = "5")]
    pub expires_at: u64,
    #[prost(message, optional, tag = "6")]
    pub amount_msat: Option<Amount>,
    #[prost(string, optional, tag = "7")]
    pub bolt11: Option<String>,
    #[prost(uint64, optional, tag = "11")]
    pub pay_index: Option<u64>,
    #[prost(message, optional, tag = "12")]
    pub amount_received_msat: Option<Amount>,
    #[prost(uint64, optional, tag = "13")]
    pub paid_at: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "14")]
    pub payment_preimage: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListsendpaysRequest {
    #[prost(int32, optional, tag = "3")]
    pub status: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListsendpaysResponse {
    #[prost(message, repeated, tag = "1")]
    pub payments: Vec<ListsendpaysPayments>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListsendpaysPayments {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub groupid: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub payment_hash: Vec<u8>,
    #[prost(int32, tag = "4")]
    pub status: i32,
    #[prost(message, optional, tag = "5")]
    pub amount_msat: Option<Amount>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub destination: Option<Vec<u8>>,
    #[prost(uint64, tag = "7")]
    pub created_at: u64,
    #[prost(message, optional, tag = "8")]
    pub amount_sent_msat: Option<Amount>,
    #[prost(string, optional, tag = "9")]
    pub label: Option<String>,
    #[prost(string, optional, tag = "10")]
    pub bolt11: Option<String>,
    #[prost(bytes = "vec", optional, tag = "13")]
    pub payment_preimage: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "14")]
    pub erroronion: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub host: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub port: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(bool, optional, tag = "2")]
    pub force: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewaddrRequest {
    #[prost(int32, optional, tag = "1")]
    pub addresstype: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewaddrResponse {
    #[prost(string, optional, tag = "1")]
    pub bech32: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub p2tr: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FundchannelRequest {
    #[prost(message, optional, tag = "1")]
    pub amount: Option<AmountOrAll>,
    #[prost(message, optional, tag = "2")]
    pub feerate: Option<Feerate>,
    #[prost(bool, optional, tag = "3")]
    pub announce: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub push_msat: Option<Amount>,
    #[prost(string, optional, tag = "6")]
    pub close_to: Option<String>,
    #[prost(bytes = "vec", tag = "9")]
    pub id: Vec<u8>,
    #[prost(uint32, optional, tag = "10")]
    pub minconf: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FundchannelResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub tx: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub txid: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub outnum: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub channel_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint32, optional, tag = "2")]
    pub unilateraltimeout: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub destination: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseResponse {
    #[prost(int32, tag = "1")]
    pub item_type: i32,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub tx: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub txid: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvoiceRequest {
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub label: String,
    #[prost(string, repeated, tag = "4")]
    pub fallbacks: Vec<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub preimage: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "7")]
    pub expiry: Option<u64>,
    #[prost(message, optional, tag = "10")]
    pub amount_msat: Option<AmountOrAny>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvoiceResponse {
    #[prost(string, tag = "1")]
    pub bolt11: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payment_hash: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub expires_at: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WithdrawRequest {
    #[prost(string, tag = "1")]
    pub destination: String,
    #[prost(message, optional, tag = "2")]
    pub satoshi: Option<AmountOrAll>,
    #[prost(uint32, optional, tag = "3")]
    pub minconf: Option<u32>,
    #[prost(message, optional, tag = "5")]
    pub feerate: Option<Feerate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WithdrawResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub tx: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub txid: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PayRequest {
    #[prost(string, tag = "1")]
    pub bolt11: String,
    #[prost(uint32, optional, tag = "5")]
    pub retry_for: Option<u32>,
    #[prost(message, optional, tag = "11")]
    pub maxfee: Option<Amount>,
    #[prost(message, optional, tag = "13")]
    pub amount_msat: Option<Amount>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PayResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub payment_preimage: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub destination: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "3")]
    pub payment_hash: Vec<u8>,
    #[prost(double, tag = "4")]
    pub created_at: f64,
    #[prost(uint32, tag = "5")]
    pub parts: u32,
    #[prost(message, optional, tag = "6")]
    pub amount_msat: Option<Amount>,
    #[prost(message, optional, tag = "7")]
    pub amount_sent_msat: Option<Amount>,
    #[prost(string, optional, tag = "8")]
    pub warning_partial_completion: Option<String>,
    #[prost(int32, tag = "9")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecodepayRequest {
    #[prost(string, tag = "1")]
    pub bolt11: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecodepayResponse {
    #[prost(string, tag = "1")]
    pub currency: String,
    #[prost(uint64, tag = "2")]
    pub created_at: u64,
    #[prost(uint64, tag = "3")]
    pub expiry: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub payee: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub amount_msat: Option<Amount>,
    #[prost(bytes = "vec", tag = "6")]
    pub payment_hash: Vec<u8>,
    #[prost(string, optional, tag = "8")]
    pub description: Option<String>,
    #[prost(uint32, tag = "10")]
    pub min_final_cltv_expiry: u32,
    #[prost(message, repeated, tag = "14")]
    pub fallbacks: Vec<DecodepayFallbacks>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecodepayFallbacks {
    #[prost(int32, tag = "1")]
    pub item_type: i32,
    #[prost(string, optional, tag = "2")]
    pub addr: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub hex: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetchannelRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub feebase: Option<Amount>,
    #[prost(uint32, optional, tag = "3")]
    pub feeppm: Option<u32>,
    #[prost(message, optional, tag = "4")]
    pub htlcmin: Option<Amount>,
    #[prost(message, optional, tag = "5")]
    pub htlcmax: Option<Amount>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetchannelResponse {
    #[prost(message, repeated, tag = "1")]
    pub channels: Vec<SetchannelChannels>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetchannelChannels {
    #[prost(string, tag = "3")]
    pub short_channel_id: String,
    #[prost(string, optional, tag = "7")]
    pub warning_htlcmin_too_low: Option<String>,
    #[prost(string, optional, tag = "9")]
    pub warning_htlcmax_too_high: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignmessageRequest {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignmessageResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub recid: Vec<u8>,
    #[prost(string, tag = "3")]
    pub zbase: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckmessageRequest {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, tag = "2")]
    pub zbase: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckmessageResponse {
    #[prost(bool, tag = "1")]
    pub verified: bool,
    #[prost(bytes = "vec", tag = "2")]
    pub pubkey: Vec<u8>,
}
