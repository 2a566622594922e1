//! LND adapter over the `lnrpc` and `routerrpc` gRPC services.

mod convert;

use std::sync::Arc;

use futures::StreamExt as _;
use lnd_grpc_tonic_client::{
    channel::Error as ChannelError, connect_lnd, lnrpc, routerrpc, LightningClient, RouterClient,
    Uri,
};
use tracing::debug;

use convert::*;

use super::{
    endpoint_url, rpc_error, BackendError, BackendPayment, BackendPolicyUpdate, BackendResult,
    ChannelEdge, ChannelEvent, ClosedChannel, EventStream, Forward, GraphUpdate, HtlcEvent,
    Invoice, LightningCommands, NodeAnnouncement, Payment, PaymentStatus, Peer, PeerEvent,
    RemoteChannel, Transaction,
};
use crate::{
    commands::types::{
        AddressType, BatchOpenChannelRequest, ChannelStatusUpdateRequest, CloseChannelRequest,
        CloseChannelResponse, ConnectPeerRequest, DecodeInvoiceRequest, DecodedInvoice,
        NewAddressRequest, NewInvoiceRequest, NewInvoiceResponse, NodeInformation,
        OnChainPaymentRequest, OpenChannelRequest, OpenChannelResponse, SignMessageRequest,
        VerifySignatureRequest, VerifySignatureResponse, WalletBalance,
    },
    connection::Connector,
    types::{ChannelPoint, ChannelStatus, ConnectionMaterial, FailedRequest, NodeId, Status},
};

/// Streams and list calls of an LND node. The defaults report the call as unimplemented
/// so partial adapters only override what they can serve.
#[async_trait::async_trait]
pub trait LndClient: LightningCommands {
    async fn list_channels(&self) -> BackendResult<Vec<RemoteChannel>> {
        Err(BackendError::Unimplemented("ListChannels"))
    }

    async fn closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        Err(BackendError::Unimplemented("ClosedChannels"))
    }

    async fn get_channel_edge(&self, _lnd_short_channel_id: u64) -> BackendResult<ChannelEdge> {
        Err(BackendError::Unimplemented("GetChanInfo"))
    }

    async fn get_node_announcement(&self, _public_key: &str) -> BackendResult<NodeAnnouncement> {
        Err(BackendError::Unimplemented("GetNodeInfo"))
    }

    async fn subscribe_channel_events(&self) -> BackendResult<EventStream<ChannelEvent>> {
        Err(BackendError::Unimplemented("SubscribeChannelEvents"))
    }

    async fn subscribe_channel_graph(&self) -> BackendResult<EventStream<GraphUpdate>> {
        Err(BackendError::Unimplemented("SubscribeChannelGraph"))
    }

    async fn subscribe_htlc_events(&self) -> BackendResult<EventStream<HtlcEvent>> {
        Err(BackendError::Unimplemented("SubscribeHtlcEvents"))
    }

    async fn subscribe_peer_events(&self) -> BackendResult<EventStream<PeerEvent>> {
        Err(BackendError::Unimplemented("SubscribePeerEvents"))
    }

    async fn subscribe_invoices(
        &self,
        _add_index: u64,
        _settle_index: u64,
    ) -> BackendResult<EventStream<Invoice>> {
        Err(BackendError::Unimplemented("SubscribeInvoices"))
    }

    async fn list_invoices(&self, _index_offset: u64, _max: u64) -> BackendResult<Vec<Invoice>> {
        Err(BackendError::Unimplemented("ListInvoices"))
    }

    async fn subscribe_transactions(&self) -> BackendResult<EventStream<Transaction>> {
        Err(BackendError::Unimplemented("SubscribeTransactions"))
    }

    async fn get_transactions(&self, _start_height: u32) -> BackendResult<Vec<Transaction>> {
        Err(BackendError::Unimplemented("GetTransactions"))
    }

    async fn forwarding_history(
        &self,
        _start_time_ms: u64,
        _index_offset: u32,
        _max: u32,
    ) -> BackendResult<Vec<Forward>> {
        Err(BackendError::Unimplemented("ForwardingHistory"))
    }

    async fn list_payments(&self, _index_offset: u64, _max: u64) -> BackendResult<Vec<Payment>> {
        Err(BackendError::Unimplemented("ListPayments"))
    }

    /// Payments of the node as they change state.
    async fn track_payments(&self) -> BackendResult<EventStream<Payment>> {
        Err(BackendError::Unimplemented("TrackPayments"))
    }
}

/// Dials LND over gRPC. The lightning and router services share one TLS channel.
#[derive(Debug, Default, Clone)]
pub struct GrpcLndConnector;

#[async_trait::async_trait]
impl Connector for GrpcLndConnector {
    type Client = dyn LndClient;

    async fn connect(
        &self,
        node_id: NodeId,
        material: &ConnectionMaterial,
    ) -> BackendResult<Arc<dyn LndClient>> {
        let uri: Uri = endpoint_url(&material.endpoint)
            .parse()
            .map_err(|e| BackendError::Connection(format!("invalid endpoint: {}", e)))?;
        debug!(node_id, %uri, "connecting to LND");
        let channel = connect_lnd(
            uri,
            material.ca_cert.as_deref(),
            material.macaroon.as_deref(),
        )
        .await
        .map_err(|e: ChannelError| BackendError::Connection(e.to_string()))?;
        Ok(Arc::new(GrpcLndClient {
            lightning: LightningClient::new(channel.clone()),
            router: RouterClient::new(channel),
        }))
    }
}

/// The generated clients are cheap handles over the shared channel, every call works on
/// its own clone.
pub struct GrpcLndClient {
    lightning: LightningClient,
    router: RouterClient,
}

impl GrpcLndClient {
    fn lightning(&self) -> LightningClient {
        self.lightning.clone()
    }

    fn router(&self) -> RouterClient {
        self.router.clone()
    }
}

fn event_stream<T, U, F>(stream: tonic::Streaming<T>, map: F) -> EventStream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> BackendResult<Option<U>> + Send + 'static,
{
    stream
        .filter_map(move |item| {
            let mapped = item.map_err(rpc_error).and_then(&map).transpose();
            futures::future::ready(mapped)
        })
        .boxed()
}

fn decode_hex(field: &str, value: &str) -> BackendResult<Vec<u8>> {
    hex::decode(value).map_err(|e| BackendError::Rpc(format!("invalid {}: {}", field, e)))
}

#[async_trait::async_trait]
impl LightningCommands for GrpcLndClient {
    async fn get_information(&self) -> BackendResult<NodeInformation> {
        let info = self
            .lightning()
            .get_info(lnrpc::GetInfoRequest {})
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(map_information(info))
    }

    async fn sign_message(&self, request: &SignMessageRequest) -> BackendResult<String> {
        let response = self
            .lightning()
            .sign_message(lnrpc::SignMessageRequest {
                msg: request.message.as_bytes().to_vec(),
                single_hash: request.single_hash.unwrap_or_default(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.signature)
    }

    async fn verify_signature(
        &self,
        request: &VerifySignatureRequest,
    ) -> BackendResult<VerifySignatureResponse> {
        let response = self
            .lightning()
            .verify_message(lnrpc::VerifyMessageRequest {
                msg: request.message.as_bytes().to_vec(),
                signature: request.signature.clone(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(VerifySignatureResponse {
            valid: response.valid,
            public_key: response.pubkey,
        })
    }

    async fn update_routing_policy(
        &self,
        update: &BackendPolicyUpdate,
    ) -> BackendResult<Vec<FailedRequest>> {
        let policy = &update.policy;
        let request = lnrpc::PolicyUpdateRequest {
            base_fee_msat: policy.fee_base_msat.unwrap_or_default() as i64,
            fee_rate_ppm: policy.fee_rate_milli_msat.unwrap_or_default() as u32,
            time_lock_delta: policy.time_lock_delta.unwrap_or_default(),
            max_htlc_msat: policy.max_htlc_msat.unwrap_or_default(),
            min_htlc_msat: policy.min_htlc_msat.unwrap_or_default(),
            min_htlc_msat_specified: policy.min_htlc_msat.is_some(),
            scope: Some(lnrpc::policy_update_request::Scope::ChanPoint(
                channel_point_to_lnd(&update.channel_point),
            )),
            ..Default::default()
        };
        let response = self
            .lightning()
            .update_channel_policy(request)
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(map_failed_updates(response))
    }

    async fn connect_peer(&self, request: &ConnectPeerRequest) -> BackendResult<()> {
        self.lightning()
            .connect_peer(lnrpc::ConnectPeerRequest {
                addr: Some(lnrpc::LightningAddress {
                    pubkey: request.public_key.clone(),
                    host: request.host.clone(),
                }),
                perm: request.persist.unwrap_or_default(),
                timeout: request.timeout_seconds.unwrap_or_default(),
            })
            .await
            .map_err(rpc_error)?;
        Ok(())
    }

    async fn disconnect_peer(&self, public_key: &str) -> BackendResult<()> {
        self.lightning()
            .disconnect_peer(lnrpc::DisconnectPeerRequest {
                pub_key: public_key.to_string(),
            })
            .await
            .map_err(rpc_error)?;
        Ok(())
    }

    async fn get_wallet_balance(&self) -> BackendResult<WalletBalance> {
        let balance = self
            .lightning()
            .wallet_balance(lnrpc::WalletBalanceRequest::default())
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(map_wallet_balance(balance))
    }

    async fn list_peers(&self) -> BackendResult<Vec<Peer>> {
        let response = self
            .lightning()
            .list_peers(lnrpc::ListPeersRequest {
                latest_error: false,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.peers.into_iter().map(map_peer).collect())
    }

    async fn new_address(&self, request: &NewAddressRequest) -> BackendResult<String> {
        let address_type = match request.address_type {
            AddressType::P2wpkh => lnrpc::AddressType::WitnessPubkeyHash,
            AddressType::NestedP2wpkh => lnrpc::AddressType::NestedPubkeyHash,
            AddressType::P2tr => lnrpc::AddressType::TaprootPubkey,
            AddressType::P2wsh => return Err(BackendError::Unimplemented("NewAddress(P2wsh)")),
        };
        let response = self
            .lightning()
            .new_address(lnrpc::NewAddressRequest {
                r#type: address_type as i32,
                account: request.account.clone().unwrap_or_default(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.address)
    }

    async fn open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> BackendResult<OpenChannelResponse> {
        let open = lnrpc::OpenChannelRequest {
            node_pubkey: decode_hex("public key", &request.public_key)?,
            local_funding_amount: request.local_funding_amount_sat as i64,
            push_sat: request.push_amount_sat.unwrap_or_default() as i64,
            target_conf: request.target_conf.unwrap_or_default() as i32,
            sat_per_vbyte: request.sat_per_vbyte.unwrap_or_default(),
            private: request.private.unwrap_or_default(),
            min_htlc_msat: request.min_htlc_msat.unwrap_or_default() as i64,
            remote_csv_delay: request.remote_csv_delay.unwrap_or_default(),
            min_confs: request.min_confs.unwrap_or_default() as i32,
            spend_unconfirmed: request.spend_unconfirmed.unwrap_or_default(),
            close_address: request.close_address.clone().unwrap_or_default(),
            ..Default::default()
        };
        let point = self
            .lightning()
            .open_channel_sync(open)
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(OpenChannelResponse {
            status: ChannelStatus::Opening,
            channel_point: channel_point_from_lnd(&point)?,
        })
    }

    async fn batch_open_channel(
        &self,
        request: &BatchOpenChannelRequest,
    ) -> BackendResult<Vec<ChannelPoint>> {
        let channels = request
            .channels
            .iter()
            .map(|channel| {
                Ok(lnrpc::BatchOpenChannel {
                    node_pubkey: decode_hex("public key", &channel.public_key)?,
                    local_funding_amount: channel.local_funding_amount_sat as i64,
                    push_sat: channel.push_amount_sat.unwrap_or_default() as i64,
                    private: channel.private.unwrap_or_default(),
                    min_htlc_msat: channel.min_htlc_msat.unwrap_or_default() as i64,
                    ..Default::default()
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let response = self
            .lightning()
            .batch_open_channel(lnrpc::BatchOpenChannelRequest {
                channels,
                target_conf: request.target_conf.unwrap_or_default() as i32,
                sat_per_vbyte: request.sat_per_vbyte.unwrap_or_default() as i64,
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response
            .pending_channels
            .iter()
            .map(|pending| ChannelPoint::new(txid_from_bytes(&pending.txid), pending.output_index))
            .collect())
    }

    async fn close_channel(
        &self,
        request: &CloseChannelRequest,
        channel_point: &ChannelPoint,
    ) -> BackendResult<CloseChannelResponse> {
        use lnrpc::close_status_update::Update;

        let close = lnrpc::CloseChannelRequest {
            channel_point: Some(channel_point_to_lnd(channel_point)),
            force: request.force.unwrap_or_default(),
            target_conf: request.target_conf.unwrap_or_default() as i32,
            delivery_address: request.delivery_address.clone().unwrap_or_default(),
            sat_per_vbyte: request.sat_per_vbyte.unwrap_or_default(),
            ..Default::default()
        };
        let mut stream = self
            .lightning()
            .close_channel(close)
            .await
            .map_err(rpc_error)?
            .into_inner();
        // The first pending or closed update carries the closing transaction.
        while let Some(update) = stream.next().await {
            let closing_txid = match update.map_err(rpc_error)?.update {
                Some(Update::ClosePending(pending)) => pending.txid,
                Some(Update::ChanClose(closed)) => closed.closing_txid,
                Some(Update::CloseInstant(_)) | None => continue,
            };
            return Ok(CloseChannelResponse {
                status: ChannelStatus::Closing,
                closing_transaction_hash: txid_from_bytes(&closing_txid),
            });
        }
        Err(BackendError::StreamClosed)
    }

    async fn new_invoice(&self, request: &NewInvoiceRequest) -> BackendResult<NewInvoiceResponse> {
        let invoice = lnrpc::Invoice {
            memo: request.memo.clone().unwrap_or_default(),
            r_preimage: request
                .preimage
                .as_deref()
                .map(|preimage| decode_hex("preimage", preimage))
                .transpose()?
                .unwrap_or_default(),
            value_msat: request.value_msat.unwrap_or_default() as i64,
            expiry: request.expiry_seconds.unwrap_or_default() as i64,
            fallback_addr: request.fallback_address.clone().unwrap_or_default(),
            private: request.private.unwrap_or_default(),
            ..Default::default()
        };
        let response = self
            .lightning()
            .add_invoice(invoice)
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(NewInvoiceResponse {
            payment_request: response.payment_request,
            payment_hash: hex::encode(response.r_hash),
            add_index: response.add_index,
        })
    }

    async fn on_chain_payment(&self, request: &OnChainPaymentRequest) -> BackendResult<String> {
        let response = self
            .lightning()
            .send_coins(lnrpc::SendCoinsRequest {
                addr: request.address.clone(),
                amount: request.amount_sat as i64,
                target_conf: request.target_conf.unwrap_or_default() as i32,
                sat_per_vbyte: request.sat_per_vbyte.unwrap_or_default(),
                send_all: request.send_all.unwrap_or_default(),
                label: request.label.clone().unwrap_or_default(),
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.txid)
    }

    #[allow(deprecated)]
    async fn new_payment(&self, payment: &BackendPayment) -> BackendResult<Payment> {
        let request = &payment.request;
        let send_request = routerrpc::SendPaymentRequest {
            payment_request: request.invoice.clone().unwrap_or_default(),
            timeout_seconds: request.timeout_seconds as i32,
            fee_limit_msat: request.fee_limit_msat.unwrap_or_default() as i64,
            amt_msat: if request.invoice.is_none() {
                request.amount_msat.unwrap_or_default() as i64
            } else {
                0
            },
            dest: request
                .destination
                .as_deref()
                .map(|destination| decode_hex("destination", destination))
                .transpose()?
                .unwrap_or_default(),
            allow_self_payment: request.allow_self_payment,
            outgoing_chan_id: payment.outgoing_lnd_short_channel_id.unwrap_or_default(),
            last_hop_pubkey: payment
                .last_hop_public_key
                .as_deref()
                .map(|last_hop| decode_hex("last hop", last_hop))
                .transpose()?
                .unwrap_or_default(),
            ..Default::default()
        };
        let mut stream = self
            .router()
            .send_payment_v2(send_request)
            .await
            .map_err(rpc_error)?
            .into_inner();
        while let Some(update) = stream.next().await {
            let payment = map_payment(update.map_err(rpc_error)?);
            if matches!(
                payment.status,
                PaymentStatus::Succeeded | PaymentStatus::Failed
            ) {
                return Ok(payment);
            }
        }
        Err(BackendError::StreamClosed)
    }

    async fn decode_invoice(
        &self,
        request: &DecodeInvoiceRequest,
    ) -> BackendResult<DecodedInvoice> {
        let decoded = self
            .lightning()
            .decode_pay_req(lnrpc::PayReqString {
                pay_req: request.invoice.clone(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(map_decoded_invoice(decoded))
    }

    async fn channel_status_update(
        &self,
        request: &ChannelStatusUpdateRequest,
        channel_point: &ChannelPoint,
    ) -> BackendResult<()> {
        let action = if request.status == Status::Active {
            routerrpc::ChanStatusAction::Enable
        } else {
            routerrpc::ChanStatusAction::Disable
        };
        self.router()
            .update_chan_status(routerrpc::UpdateChanStatusRequest {
                chan_point: Some(channel_point_to_lnd(channel_point)),
                action: action as i32,
            })
            .await
            .map_err(rpc_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LndClient for GrpcLndClient {
    async fn list_channels(&self) -> BackendResult<Vec<RemoteChannel>> {
        let response = self
            .lightning()
            .list_channels(lnrpc::ListChannelsRequest::default())
            .await
            .map_err(rpc_error)?
            .into_inner();
        response.channels.into_iter().map(map_channel).collect()
    }

    async fn closed_channels(&self) -> BackendResult<Vec<ClosedChannel>> {
        let response = self
            .lightning()
            .closed_channels(lnrpc::ClosedChannelsRequest::default())
            .await
            .map_err(rpc_error)?
            .into_inner();
        response
            .channels
            .into_iter()
            .map(map_closed_channel)
            .collect()
    }

    async fn get_channel_edge(&self, lnd_short_channel_id: u64) -> BackendResult<ChannelEdge> {
        let edge = self
            .lightning()
            .get_chan_info(lnrpc::ChanInfoRequest {
                chan_id: lnd_short_channel_id,
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        map_channel_edge(edge)
    }

    async fn get_node_announcement(&self, public_key: &str) -> BackendResult<NodeAnnouncement> {
        let info = self
            .lightning()
            .get_node_info(lnrpc::NodeInfoRequest {
                pub_key: public_key.to_string(),
                include_channels: false,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        info.node
            .map(map_lightning_node)
            .ok_or_else(|| BackendError::Rpc(format!("no announcement for {}", public_key)))
    }

    async fn subscribe_channel_events(&self) -> BackendResult<EventStream<ChannelEvent>> {
        let stream = self
            .lightning()
            .subscribe_channel_events(lnrpc::ChannelEventSubscription {})
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, map_channel_event))
    }

    async fn subscribe_channel_graph(&self) -> BackendResult<EventStream<GraphUpdate>> {
        let stream = self
            .lightning()
            .subscribe_channel_graph(lnrpc::GraphTopologySubscription {})
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |update| map_graph_update(update).map(Some)))
    }

    async fn subscribe_htlc_events(&self) -> BackendResult<EventStream<HtlcEvent>> {
        let stream = self
            .router()
            .subscribe_htlc_events(routerrpc::SubscribeHtlcEventsRequest {})
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |event| Ok(map_htlc_event(event))))
    }

    async fn subscribe_peer_events(&self) -> BackendResult<EventStream<PeerEvent>> {
        let stream = self
            .lightning()
            .subscribe_peer_events(lnrpc::PeerEventSubscription {})
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |event| Ok(Some(map_peer_event(event)))))
    }

    async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> BackendResult<EventStream<Invoice>> {
        let stream = self
            .lightning()
            .subscribe_invoices(lnrpc::InvoiceSubscription {
                add_index,
                settle_index,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |invoice| Ok(Some(map_invoice(invoice)))))
    }

    async fn list_invoices(&self, index_offset: u64, max: u64) -> BackendResult<Vec<Invoice>> {
        let response = self
            .lightning()
            .list_invoices(lnrpc::ListInvoiceRequest {
                index_offset,
                num_max_invoices: max,
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.invoices.into_iter().map(map_invoice).collect())
    }

    async fn subscribe_transactions(&self) -> BackendResult<EventStream<Transaction>> {
        let stream = self
            .lightning()
            .subscribe_transactions(lnrpc::GetTransactionsRequest::default())
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |transaction| {
            Ok(Some(map_transaction(transaction)))
        }))
    }

    async fn get_transactions(&self, start_height: u32) -> BackendResult<Vec<Transaction>> {
        // An end height of -1 includes unconfirmed transactions.
        let response = self
            .lightning()
            .get_transactions(lnrpc::GetTransactionsRequest {
                start_height: start_height as i32,
                end_height: -1,
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response
            .transactions
            .into_iter()
            .map(map_transaction)
            .collect())
    }

    async fn forwarding_history(
        &self,
        start_time_ms: u64,
        index_offset: u32,
        max: u32,
    ) -> BackendResult<Vec<Forward>> {
        let end_time = crate::now_timestamp_as_millis_u64() / 1_000 + 1;
        let response = self
            .lightning()
            .forwarding_history(lnrpc::ForwardingHistoryRequest {
                start_time: start_time_ms / 1_000,
                end_time,
                index_offset,
                num_max_events: max,
                peer_alias_lookup: false,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.forwarding_events.iter().map(map_forward).collect())
    }

    async fn list_payments(&self, index_offset: u64, max: u64) -> BackendResult<Vec<Payment>> {
        let response = self
            .lightning()
            .list_payments(lnrpc::ListPaymentsRequest {
                include_incomplete: true,
                index_offset,
                max_payments: max,
                ..Default::default()
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(response.payments.into_iter().map(map_payment).collect())
    }

    async fn track_payments(&self) -> BackendResult<EventStream<Payment>> {
        let stream = self
            .router()
            .track_payments(routerrpc::TrackPaymentsRequest {
                no_inflight_updates: false,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        Ok(event_stream(stream, |payment| Ok(Some(map_payment(payment)))))
    }
}
