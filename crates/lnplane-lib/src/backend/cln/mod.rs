//! CLN adapter over the `cln.Node` gRPC service of the `cln-grpc` plugin.

mod convert;
pub mod proto;
mod transport;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use convert::*;
use proto::method;
use transport::{NodeRpc, TlsTransport};

use super::{
    endpoint_url, BackendError, BackendPayment, BackendPolicyUpdate, BackendResult,
    ClosedChannel, Forward, ForwardStatus, Htlc, Invoice, LightningCommands, NodeAnnouncement,
    Payment, Peer, RoutingPolicy, Transaction,
};
use crate::{
    commands::types::{
        AddressType, CloseChannelRequest, CloseChannelResponse, ConnectPeerRequest,
        DecodeInvoiceRequest, DecodedInvoice, NewAddressRequest, NewInvoiceRequest,
        NewInvoiceResponse, NodeInformation, OnChainPaymentRequest, OpenChannelRequest,
        OpenChannelResponse, SignMessageRequest, VerifySignatureRequest, VerifySignatureResponse,
        WalletBalance,
    },
    connection::Connector,
    now_timestamp_as_millis_u64,
    types::{ChannelPoint, ChannelStatus, ConnectionMaterial, FailedRequest, NodeId},
};

/// A channel as reported by `listpeerchannels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClnChannel {
    pub peer_public_key: String,
    pub peer_connected: bool,
    pub short_channel_id: Option<String>,
    pub channel_point: Option<ChannelPoint>,
    pub status: ChannelStatus,
    pub capacity_sat: u64,
    pub to_us_msat: u64,
    pub private: bool,
    pub opener_local: bool,
    pub local_policy: Option<RoutingPolicy>,
    pub remote_policy: Option<RoutingPolicy>,
    pub htlcs: Vec<Htlc>,
}

/// A channel entry of `listfunds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClnFundsChannel {
    pub peer_public_key: String,
    pub short_channel_id: Option<String>,
    pub channel_point: Option<ChannelPoint>,
    pub our_amount_msat: Option<u64>,
    pub amount_msat: Option<u64>,
    /// Set for every state from `CHANNELD_SHUTTING_DOWN` onwards.
    pub shutting_down: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardQuery {
    pub in_channel: Option<String>,
    pub out_channel: Option<String>,
    pub status: ForwardStatus,
}

/// List calls of a CLN node. CLN has no event streams; every subscriber polls.
#[async_trait::async_trait]
pub trait ClnClient: LightningCommands {
    async fn list_peer_channels(&self) -> BackendResult<Vec<ClnChannel>> {
        Err(BackendError::Unimplemented("ListPeerChannels"))
    }

    async fn list_closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        Err(BackendError::Unimplemented("ListClosedChannels"))
    }

    async fn list_funds(&self) -> BackendResult<Vec<ClnFundsChannel>> {
        Err(BackendError::Unimplemented("ListFunds"))
    }

    async fn list_nodes(&self) -> BackendResult<Vec<NodeAnnouncement>> {
        Err(BackendError::Unimplemented("ListNodes"))
    }

    async fn list_transactions(&self) -> BackendResult<Vec<Transaction>> {
        Err(BackendError::Unimplemented("ListTransactions"))
    }

    async fn list_forwards(&self, _query: &ForwardQuery) -> BackendResult<Vec<Forward>> {
        Err(BackendError::Unimplemented("ListForwards"))
    }

    async fn list_invoices(&self) -> BackendResult<Vec<Invoice>> {
        Err(BackendError::Unimplemented("ListInvoices"))
    }

    async fn list_payments(&self) -> BackendResult<Vec<Payment>> {
        Err(BackendError::Unimplemented("ListSendPays"))
    }

    async fn list_connected_peers(&self) -> BackendResult<Vec<Peer>> {
        Err(BackendError::Unimplemented("ListPeers"))
    }
}

/// Dials the `cln-grpc` plugin with the node's client certificate.
#[derive(Debug, Default, Clone)]
pub struct GrpcClnConnector;

#[async_trait::async_trait]
impl Connector for GrpcClnConnector {
    type Client = dyn ClnClient;

    async fn connect(
        &self,
        node_id: NodeId,
        material: &ConnectionMaterial,
    ) -> BackendResult<Arc<dyn ClnClient>> {
        let uri: hyper::Uri = endpoint_url(&material.endpoint)
            .parse()
            .map_err(|e| BackendError::Connection(format!("invalid endpoint: {}", e)))?;
        debug!(node_id, %uri, "connecting to CLN");
        let client = GrpcClnClient::new(NodeRpc::new(TlsTransport::new(uri, material)?));
        // The plugin accepts connections lazily, a first call surfaces bad credentials now.
        client.our_id().await?;
        Ok(Arc::new(client))
    }
}

pub struct GrpcClnClient {
    rpc: NodeRpc,
    our_id: OnceCell<Vec<u8>>,
    /// Invoice creation dates by label; `listinvoices` only reports them inside the bolt11.
    invoice_created: Mutex<HashMap<String, u64>>,
    /// Wallet transactions carry no time, the first listing that saw one stands in for it.
    transaction_seen: Mutex<HashMap<Vec<u8>, u64>>,
}

impl GrpcClnClient {
    fn new(rpc: NodeRpc) -> Self {
        Self {
            rpc,
            our_id: OnceCell::new(),
            invoice_created: Mutex::new(HashMap::new()),
            transaction_seen: Mutex::new(HashMap::new()),
        }
    }

    async fn our_id(&self) -> BackendResult<&[u8]> {
        let id = self
            .our_id
            .get_or_try_init(|| async {
                let info: proto::GetinfoResponse =
                    self.rpc.call(method::GETINFO, proto::GetinfoRequest {}).await?;
                Ok::<_, BackendError>(info.id)
            })
            .await?;
        Ok(id.as_slice())
    }

    async fn announced_policies(
        &self,
        request: proto::ListchannelsRequest,
    ) -> BackendResult<HashMap<String, RoutingPolicy>> {
        let response: proto::ListchannelsResponse =
            self.rpc.call(method::LIST_CHANNELS, request).await?;
        Ok(policies_by_channel(&response.channels))
    }

    async fn short_channel_id(&self, channel_point: &ChannelPoint) -> BackendResult<String> {
        self.list_peer_channels()
            .await?
            .into_iter()
            .find(|channel| channel.channel_point.as_ref() == Some(channel_point))
            .and_then(|channel| channel.short_channel_id)
            .ok_or_else(|| {
                BackendError::Rpc(format!("no short channel id for {}", channel_point))
            })
    }

    async fn invoice_creation_date(&self, invoice: &proto::ListinvoicesInvoices) -> u64 {
        if let Some(created) = self.cached_creation_date(&invoice.label) {
            return created;
        }
        let Some(bolt11) = invoice.bolt11.clone() else {
            return 0;
        };
        let decoded: BackendResult<proto::DecodepayResponse> = self
            .rpc
            .call(method::DECODE_PAY, proto::DecodepayRequest { bolt11 })
            .await;
        match decoded {
            Ok(decoded) => {
                let created = decoded.created_at.saturating_mul(1_000);
                if let Ok(mut cache) = self.invoice_created.lock() {
                    cache.insert(invoice.label.clone(), created);
                }
                created
            }
            Err(err) => {
                warn!(label = %invoice.label, "failed to decode invoice: {}", err);
                0
            }
        }
    }

    fn cached_creation_date(&self, label: &str) -> Option<u64> {
        self.invoice_created
            .lock()
            .ok()
            .and_then(|cache| cache.get(label).copied())
    }

    fn first_seen(&self, hash: &[u8]) -> u64 {
        let now = now_timestamp_as_millis_u64();
        match self.transaction_seen.lock() {
            Ok(mut seen) => *seen.entry(hash.to_vec()).or_insert(now),
            Err(_) => now,
        }
    }
}

fn decode_hex(field: &str, value: &str) -> BackendResult<Vec<u8>> {
    hex::decode(value).map_err(|e| BackendError::Rpc(format!("invalid {}: {}", field, e)))
}

fn feerate_per_kb(sat_per_vbyte: Option<u64>) -> Option<proto::Feerate> {
    sat_per_vbyte.map(|rate| proto::Feerate {
        style: Some(proto::feerate::Style::Perkb(
            rate.saturating_mul(1_000).min(u32::MAX as u64) as u32,
        )),
    })
}

#[async_trait::async_trait]
impl LightningCommands for GrpcClnClient {
    async fn get_information(&self) -> BackendResult<NodeInformation> {
        let info = self.rpc.call(method::GETINFO, proto::GetinfoRequest {}).await?;
        Ok(map_information(info))
    }

    async fn sign_message(&self, request: &SignMessageRequest) -> BackendResult<String> {
        let response: proto::SignmessageResponse = self
            .rpc
            .call(
                method::SIGN_MESSAGE,
                proto::SignmessageRequest {
                    message: request.message.clone(),
                },
            )
            .await?;
        Ok(response.zbase)
    }

    async fn verify_signature(
        &self,
        request: &VerifySignatureRequest,
    ) -> BackendResult<VerifySignatureResponse> {
        let response: proto::CheckmessageResponse = self
            .rpc
            .call(
                method::CHECK_MESSAGE,
                proto::CheckmessageRequest {
                    message: request.message.clone(),
                    zbase: request.signature.clone(),
                },
            )
            .await?;
        Ok(VerifySignatureResponse {
            valid: response.verified,
            public_key: hex::encode(response.pubkey),
        })
    }

    /// `setchannel` has no time lock delta; a requested one is left to the node's config.
    async fn update_routing_policy(
        &self,
        update: &BackendPolicyUpdate,
    ) -> BackendResult<Vec<FailedRequest>> {
        let id = match &update.short_channel_id {
            Some(short_channel_id) => short_channel_id.clone(),
            None => self.short_channel_id(&update.channel_point).await?,
        };
        let policy = &update.policy;
        if policy.time_lock_delta.is_some() {
            debug!(channel = %id, "CLN cannot set a per-channel time lock delta");
        }
        let response = self
            .rpc
            .call(
                method::SET_CHANNEL,
                proto::SetchannelRequest {
                    id,
                    feebase: policy.fee_base_msat.map(amount),
                    feeppm: policy
                        .fee_rate_milli_msat
                        .map(|ppm| ppm.min(u32::MAX as u64) as u32),
                    htlcmin: policy.min_htlc_msat.map(amount),
                    htlcmax: policy.max_htlc_msat.map(amount),
                },
            )
            .await?;
        Ok(map_setchannel_warnings(response))
    }

    async fn connect_peer(&self, request: &ConnectPeerRequest) -> BackendResult<()> {
        let (host, port) = split_host_port(&request.host);
        let _: proto::ConnectResponse = self
            .rpc
            .call(
                method::CONNECT_PEER,
                proto::ConnectRequest {
                    id: request.public_key.clone(),
                    host: (!host.is_empty()).then_some(host),
                    port,
                },
            )
            .await?;
        Ok(())
    }

    async fn disconnect_peer(&self, public_key: &str) -> BackendResult<()> {
        let _: proto::DisconnectResponse = self
            .rpc
            .call(
                method::DISCONNECT,
                proto::DisconnectRequest {
                    id: decode_hex("public key", public_key)?,
                    force: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn get_wallet_balance(&self) -> BackendResult<WalletBalance> {
        let funds: proto::ListfundsResponse = self
            .rpc
            .call(method::LIST_FUNDS, proto::ListfundsRequest { spent: None })
            .await?;
        Ok(map_wallet_balance(&funds))
    }

    async fn list_peers(&self) -> BackendResult<Vec<Peer>> {
        let response: proto::ListpeersResponse = self
            .rpc
            .call(method::LIST_PEERS, proto::ListpeersRequest { id: None })
            .await?;
        Ok(response.peers.into_iter().map(map_peer).collect())
    }

    async fn new_address(&self, request: &NewAddressRequest) -> BackendResult<String> {
        let address_type = match request.address_type {
            AddressType::P2wpkh => proto::address_type::BECH32,
            AddressType::P2tr => proto::address_type::P2TR,
            AddressType::P2wsh => return Err(BackendError::Unimplemented("NewAddress(P2wsh)")),
            AddressType::NestedP2wpkh => {
                return Err(BackendError::Unimplemented("NewAddress(NestedP2wpkh)"))
            }
        };
        let response: proto::NewaddrResponse = self
            .rpc
            .call(
                method::NEW_ADDR,
                proto::NewaddrRequest {
                    addresstype: Some(address_type),
                },
            )
            .await?;
        response
            .bech32
            .or(response.p2tr)
            .ok_or_else(|| BackendError::Rpc("no address returned".to_string()))
    }

    async fn open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> BackendResult<OpenChannelResponse> {
        let fund = proto::FundchannelRequest {
            id: decode_hex("public key", &request.public_key)?,
            amount: Some(proto::AmountOrAll {
                value: Some(proto::amount_or_all::Value::Amount(amount(
                    request.local_funding_amount_sat.saturating_mul(1_000),
                ))),
            }),
            feerate: feerate_per_kb(request.sat_per_vbyte),
            announce: request.private.map(|private| !private),
            push_msat: request
                .push_amount_sat
                .map(|push| amount(push.saturating_mul(1_000))),
            close_to: request.close_address.clone(),
            minconf: request.min_confs,
        };
        let response: proto::FundchannelResponse =
            self.rpc.call(method::FUND_CHANNEL, fund).await?;
        Ok(OpenChannelResponse {
            status: ChannelStatus::Opening,
            channel_point: ChannelPoint::new(hex::encode(response.txid), response.outnum),
        })
    }

    async fn close_channel(
        &self,
        request: &CloseChannelRequest,
        channel_point: &ChannelPoint,
    ) -> BackendResult<CloseChannelResponse> {
        let close = proto::CloseRequest {
            id: self.short_channel_id(channel_point).await?,
            unilateraltimeout: request.force.unwrap_or_default().then_some(1),
            destination: request.delivery_address.clone(),
        };
        let response: proto::CloseResponse = self.rpc.call(method::CLOSE, close).await?;
        Ok(CloseChannelResponse {
            status: ChannelStatus::Closing,
            closing_transaction_hash: response.txid.map(hex::encode).unwrap_or_default(),
        })
    }

    async fn new_invoice(&self, request: &NewInvoiceRequest) -> BackendResult<NewInvoiceResponse> {
        let value = match request.value_msat {
            Some(msat) => proto::amount_or_any::Value::Amount(amount(msat)),
            None => proto::amount_or_any::Value::Any(true),
        };
        let invoice = proto::InvoiceRequest {
            description: request.memo.clone().unwrap_or_default(),
            label: invoice_label(chrono::Utc::now()),
            fallbacks: request.fallback_address.iter().cloned().collect(),
            preimage: request
                .preimage
                .as_deref()
                .map(|preimage| decode_hex("preimage", preimage))
                .transpose()?,
            expiry: request.expiry_seconds,
            amount_msat: Some(proto::AmountOrAny { value: Some(value) }),
        };
        let response: proto::InvoiceResponse = self.rpc.call(method::INVOICE, invoice).await?;
        Ok(NewInvoiceResponse {
            payment_request: response.bolt11,
            payment_hash: hex::encode(response.payment_hash),
            add_index: 0,
        })
    }

    async fn on_chain_payment(&self, request: &OnChainPaymentRequest) -> BackendResult<String> {
        let satoshi = if request.send_all.unwrap_or_default() {
            proto::amount_or_all::Value::All(true)
        } else {
            proto::amount_or_all::Value::Amount(amount(request.amount_sat.saturating_mul(1_000)))
        };
        let response: proto::WithdrawResponse = self
            .rpc
            .call(
                method::WITHDRAW,
                proto::WithdrawRequest {
                    destination: request.address.clone(),
                    satoshi: Some(proto::AmountOrAll {
                        value: Some(satoshi),
                    }),
                    minconf: None,
                    feerate: feerate_per_kb(request.sat_per_vbyte),
                },
            )
            .await?;
        Ok(hex::encode(response.txid))
    }

    /// `pay` takes neither an outgoing channel nor a last hop, and keysend is a separate
    /// call; those payments are refused.
    async fn new_payment(&self, payment: &BackendPayment) -> BackendResult<Payment> {
        if payment.outgoing_lnd_short_channel_id.is_some()
            || payment.last_hop_public_key.is_some()
        {
            return Err(BackendError::Unimplemented("NewPayment(route restriction)"));
        }
        let request = &payment.request;
        let Some(bolt11) = request.invoice.clone() else {
            return Err(BackendError::Unimplemented("NewPayment(keysend)"));
        };
        let response = self
            .rpc
            .call(
                method::PAY,
                proto::PayRequest {
                    bolt11: bolt11.clone(),
                    retry_for: Some(request.timeout_seconds),
                    maxfee: request.fee_limit_msat.map(amount),
                    amount_msat: request.amount_msat.map(amount),
                },
            )
            .await?;
        Ok(map_pay(response, bolt11))
    }

    async fn decode_invoice(
        &self,
        request: &DecodeInvoiceRequest,
    ) -> BackendResult<DecodedInvoice> {
        let decoded = self
            .rpc
            .call(
                method::DECODE_PAY,
                proto::DecodepayRequest {
                    bolt11: request.invoice.clone(),
                },
            )
            .await?;
        Ok(map_decoded_invoice(decoded))
    }
}

#[async_trait::async_trait]
impl ClnClient for GrpcClnClient {
    async fn list_peer_channels(&self) -> BackendResult<Vec<ClnChannel>> {
        let our_id = self.our_id().await?.to_vec();
        let response: proto::ListpeerchannelsResponse = self
            .rpc
            .call(
                method::LIST_PEER_CHANNELS,
                proto::ListpeerchannelsRequest { id: None },
            )
            .await?;
        let local = self
            .announced_policies(proto::ListchannelsRequest {
                source: Some(our_id.clone()),
                ..Default::default()
            })
            .await?;
        let remote = self
            .announced_policies(proto::ListchannelsRequest {
                destination: Some(our_id),
                ..Default::default()
            })
            .await?;
        Ok(response
            .channels
            .into_iter()
            .map(|channel| map_peer_channel(channel, &local, &remote))
            .collect())
    }

    async fn list_closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        let response: proto::ListclosedchannelsResponse = self
            .rpc
            .call(
                method::LIST_CLOSED_CHANNELS,
                proto::ListclosedchannelsRequest { id: None },
            )
            .await?;
        Ok(response
            .closedchannels
            .into_iter()
            .filter_map(map_closed_channel)
            .collect())
    }

    async fn list_funds(&self) -> BackendResult<Vec<ClnFundsChannel>> {
        let funds: proto::ListfundsResponse = self
            .rpc
            .call(method::LIST_FUNDS, proto::ListfundsRequest { spent: None })
            .await?;
        Ok(funds.channels.into_iter().map(map_funds_channel).collect())
    }

    async fn list_nodes(&self) -> BackendResult<Vec<NodeAnnouncement>> {
        let response: proto::ListnodesResponse = self
            .rpc
            .call(method::LIST_NODES, proto::ListnodesRequest { id: None })
            .await?;
        Ok(response.nodes.into_iter().map(map_node).collect())
    }

    async fn list_transactions(&self) -> BackendResult<Vec<Transaction>> {
        let response: proto::ListtransactionsResponse = self
            .rpc
            .call(method::LIST_TRANSACTIONS, proto::ListtransactionsRequest {})
            .await?;
        Ok(response
            .transactions
            .into_iter()
            .map(|transaction| {
                let seen = self.first_seen(&transaction.hash);
                map_transaction(transaction, seen)
            })
            .collect())
    }

    async fn list_forwards(&self, query: &ForwardQuery) -> BackendResult<Vec<Forward>> {
        let response: proto::ListforwardsResponse = self
            .rpc
            .call(
                method::LIST_FORWARDS,
                proto::ListforwardsRequest {
                    status: Some(forward_status_code(query.status)),
                    in_channel: query.in_channel.clone(),
                    out_channel: query.out_channel.clone(),
                },
            )
            .await?;
        Ok(response.forwards.into_iter().map(map_forward).collect())
    }

    async fn list_invoices(&self) -> BackendResult<Vec<Invoice>> {
        let response: proto::ListinvoicesResponse = self
            .rpc
            .call(method::LIST_INVOICES, proto::ListinvoicesRequest { label: None })
            .await?;
        let mut invoices = Vec::with_capacity(response.invoices.len());
        for invoice in response.invoices {
            let created = self.invoice_creation_date(&invoice).await;
            invoices.push(map_invoice(invoice, created));
        }
        Ok(invoices)
    }

    async fn list_payments(&self) -> BackendResult<Vec<Payment>> {
        let response: proto::ListsendpaysResponse = self
            .rpc
            .call(method::LIST_SEND_PAYS, proto::ListsendpaysRequest { status: None })
            .await?;
        Ok(response.payments.into_iter().map(map_sendpay).collect())
    }

    async fn list_connected_peers(&self) -> BackendResult<Vec<Peer>> {
        let response: proto::ListpeersResponse = self
            .rpc
            .call(method::LIST_PEERS, proto::ListpeersRequest { id: None })
            .await?;
        Ok(response
            .peers
            .into_iter()
            .filter(|peer| peer.connected)
            .map(map_peer)
            .collect())
    }
}
