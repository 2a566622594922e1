//! Translation of `lnrpc` and `routerrpc` messages into the backend records.

use lnd_grpc_tonic_client::{lnrpc, routerrpc};

use crate::{
    backend::{
        BackendError, BackendResult, ChannelEdge, ChannelEdgeUpdate, ChannelEvent, ClosedChannel,
        Forward, ForwardStatus, GraphUpdate, Htlc, HtlcEvent, HtlcEventKind, HtlcOutcome, Invoice,
        InvoiceHtlc, InvoiceState, NodeAnnouncement, Payment, PaymentStatus, Peer, PeerEvent,
        RemoteChannel, RoutingPolicy, Transaction,
    },
    commands::types::{DecodedInvoice, NodeInformation, WalletBalance},
    types::{ChannelPoint, ChannelStatus, FailedRequest, Implementation, ShortChannelId},
};

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

/// LND serializes transaction ids in internal byte order.
pub fn txid_from_bytes(bytes: &[u8]) -> String {
    let mut reversed = bytes.to_vec();
    reversed.reverse();
    hex::encode(reversed)
}

pub fn parse_channel_point(channel_point: &str) -> BackendResult<ChannelPoint> {
    channel_point
        .parse()
        .map_err(|e| BackendError::Rpc(format!("{}", e)))
}

pub fn channel_point_from_lnd(channel_point: &lnrpc::ChannelPoint) -> BackendResult<ChannelPoint> {
    use lnrpc::channel_point::FundingTxid;

    let hash = match &channel_point.funding_txid {
        Some(FundingTxid::FundingTxidBytes(bytes)) => txid_from_bytes(bytes),
        Some(FundingTxid::FundingTxidStr(hash)) => hash.clone(),
        None => return Err(BackendError::Rpc("channel point without txid".to_string())),
    };
    Ok(ChannelPoint::new(hash, channel_point.output_index))
}

pub fn channel_point_to_lnd(channel_point: &ChannelPoint) -> lnrpc::ChannelPoint {
    lnrpc::ChannelPoint {
        funding_txid: Some(lnrpc::channel_point::FundingTxid::FundingTxidStr(
            channel_point.funding_transaction_hash.clone(),
        )),
        output_index: channel_point.funding_output_index,
    }
}

pub fn map_information(info: lnrpc::GetInfoResponse) -> NodeInformation {
    NodeInformation {
        node_id: 0,
        implementation: Implementation::Lnd,
        version: info.version,
        public_key: info.identity_pubkey,
        alias: info.alias,
        color: info.color,
        pending_channel_count: info.num_pending_channels,
        active_channel_count: info.num_active_channels,
        inactive_channel_count: info.num_inactive_channels,
        peer_count: info.num_peers,
        block_height: info.block_height,
        block_hash: info.block_hash,
        chain_synced: info.synced_to_chain,
        graph_synced: info.synced_to_graph,
        addresses: info.uris,
    }
}

pub fn map_wallet_balance(balance: lnrpc::WalletBalanceResponse) -> WalletBalance {
    WalletBalance {
        total_balance_sat: non_negative(balance.total_balance),
        confirmed_balance_sat: non_negative(balance.confirmed_balance),
        unconfirmed_balance_sat: non_negative(balance.unconfirmed_balance),
        locked_balance_sat: non_negative(balance.locked_balance),
        reserved_balance_anchor_channel_sat: non_negative(balance.reserved_balance_anchor_chan),
    }
}

fn map_htlc(htlc: lnrpc::Htlc) -> Htlc {
    Htlc {
        incoming: htlc.incoming,
        amount_msat: non_negative(htlc.amount).saturating_mul(1_000),
        hash_lock: hex::encode(htlc.hash_lock),
        expiration_height: htlc.expiration_height,
        htlc_index: htlc.htlc_index,
        forwarding_channel: htlc.forwarding_channel,
        forwarding_htlc_index: htlc.forwarding_htlc_index,
    }
}

pub fn map_channel(channel: lnrpc::Channel) -> BackendResult<RemoteChannel> {
    let local = channel.local_constraints.unwrap_or_default();
    let remote = channel.remote_constraints.unwrap_or_default();
    Ok(RemoteChannel {
        channel_point: parse_channel_point(&channel.channel_point)?,
        lnd_short_channel_id: channel.chan_id,
        remote_public_key: channel.remote_pubkey,
        active: channel.active,
        private: channel.private,
        initiator: channel.initiator,
        capacity_sat: non_negative(channel.capacity),
        local_balance_sat: non_negative(channel.local_balance),
        remote_balance_sat: non_negative(channel.remote_balance),
        commit_fee_sat: non_negative(channel.commit_fee),
        commit_weight: non_negative(channel.commit_weight),
        fee_per_kw: non_negative(channel.fee_per_kw),
        unsettled_balance_sat: non_negative(channel.unsettled_balance),
        total_sent_sat: non_negative(channel.total_satoshis_sent),
        total_received_sat: non_negative(channel.total_satoshis_received),
        num_updates: channel.num_updates,
        lifetime: channel.lifetime,
        local_reserve_sat: local.chan_reserve_sat,
        remote_reserve_sat: remote.chan_reserve_sat,
        local_dust_limit_sat: local.dust_limit_sat,
        remote_dust_limit_sat: remote.dust_limit_sat,
        pending_htlcs: channel.pending_htlcs.into_iter().map(map_htlc).collect(),
    })
}

fn map_initiator(initiator: lnrpc::Initiator) -> Option<bool> {
    match initiator {
        lnrpc::Initiator::Local => Some(true),
        lnrpc::Initiator::Remote => Some(false),
        lnrpc::Initiator::Unknown | lnrpc::Initiator::Both => None,
    }
}

pub fn map_closed_channel(summary: lnrpc::ChannelCloseSummary) -> BackendResult<ClosedChannel> {
    use lnrpc::channel_close_summary::ClosureType;

    let close_type = match summary.close_type() {
        ClosureType::CooperativeClose => ChannelStatus::CooperativeClosed,
        ClosureType::LocalForceClose => ChannelStatus::LocalForceClosed,
        ClosureType::RemoteForceClose => ChannelStatus::RemoteForceClosed,
        ClosureType::BreachClose => ChannelStatus::BreachClosed,
        ClosureType::FundingCanceled => ChannelStatus::FundingCancelled,
        ClosureType::Abandoned => ChannelStatus::Abandoned,
    };
    Ok(ClosedChannel {
        channel_point: parse_channel_point(&summary.channel_point)?,
        lnd_short_channel_id: summary.chan_id,
        open_initiator_local: map_initiator(summary.open_initiator()),
        close_initiator_local: map_initiator(summary.close_initiator()),
        remote_public_key: summary.remote_pubkey,
        capacity_sat: non_negative(summary.capacity),
        close_height: summary.close_height,
        closing_tx_hash: summary.closing_tx_hash,
        close_type,
    })
}

pub fn map_channel_event(update: lnrpc::ChannelEventUpdate) -> BackendResult<Option<ChannelEvent>> {
    use lnrpc::channel_event_update::Channel;

    let Some(channel) = update.channel else {
        return Ok(None);
    };
    let event = match channel {
        Channel::OpenChannel(channel) => ChannelEvent::Open(map_channel(channel)?),
        Channel::ClosedChannel(summary) => ChannelEvent::Closed(map_closed_channel(summary)?),
        Channel::ActiveChannel(point) => ChannelEvent::Active(channel_point_from_lnd(&point)?),
        Channel::InactiveChannel(point) => ChannelEvent::Inactive(channel_point_from_lnd(&point)?),
        Channel::PendingOpenChannel(pending) => ChannelEvent::PendingOpen(ChannelPoint::new(
            txid_from_bytes(&pending.txid),
            pending.output_index,
        )),
        Channel::FullyResolvedChannel(point) => {
            ChannelEvent::FullyResolved(channel_point_from_lnd(&point)?)
        }
    };
    Ok(Some(event))
}

pub fn map_routing_policy(policy: &lnrpc::RoutingPolicy) -> RoutingPolicy {
    RoutingPolicy {
        disabled: policy.disabled,
        time_lock_delta: policy.time_lock_delta,
        min_htlc_msat: non_negative(policy.min_htlc),
        max_htlc_msat: policy.max_htlc_msat,
        fee_base_msat: non_negative(policy.fee_base_msat),
        fee_rate_milli_msat: non_negative(policy.fee_rate_milli_msat),
    }
}

pub fn map_channel_edge(edge: lnrpc::ChannelEdge) -> BackendResult<ChannelEdge> {
    Ok(ChannelEdge {
        lnd_short_channel_id: edge.channel_id,
        channel_point: parse_channel_point(&edge.chan_point)?,
        capacity_sat: non_negative(edge.capacity),
        node1_policy: edge.node1_policy.as_ref().map(map_routing_policy),
        node2_policy: edge.node2_policy.as_ref().map(map_routing_policy),
        node1_public_key: edge.node1_pub,
        node2_public_key: edge.node2_pub,
    })
}

fn sorted_feature_bits<V>(features: &std::collections::HashMap<u32, V>) -> Vec<u32> {
    let mut bits: Vec<u32> = features.keys().copied().collect();
    bits.sort_unstable();
    bits
}

pub fn map_lightning_node(node: lnrpc::LightningNode) -> NodeAnnouncement {
    NodeAnnouncement {
        features: sorted_feature_bits(&node.features),
        public_key: node.pub_key,
        alias: node.alias,
        color: node.color,
        addresses: node.addresses.into_iter().map(|address| address.addr).collect(),
    }
}

fn map_node_update(update: lnrpc::NodeUpdate) -> NodeAnnouncement {
    #[allow(deprecated)]
    let addresses = if update.node_addresses.is_empty() {
        update.addresses
    } else {
        update
            .node_addresses
            .into_iter()
            .map(|address| address.addr)
            .collect()
    };
    NodeAnnouncement {
        features: sorted_feature_bits(&update.features),
        public_key: update.identity_key,
        alias: update.alias,
        color: update.color,
        addresses,
    }
}

fn map_edge_update(update: lnrpc::ChannelEdgeUpdate) -> BackendResult<ChannelEdgeUpdate> {
    let channel_point = update
        .chan_point
        .as_ref()
        .ok_or_else(|| BackendError::Rpc("channel update without channel point".to_string()))
        .and_then(channel_point_from_lnd)?;
    Ok(ChannelEdgeUpdate {
        lnd_short_channel_id: update.chan_id,
        channel_point,
        capacity_sat: non_negative(update.capacity),
        routing_policy: update
            .routing_policy
            .as_ref()
            .map(map_routing_policy)
            .unwrap_or_default(),
        advertising_node: update.advertising_node,
        connecting_node: update.connecting_node,
    })
}

pub fn map_graph_update(update: lnrpc::GraphTopologyUpdate) -> BackendResult<GraphUpdate> {
    Ok(GraphUpdate {
        node_updates: update.node_updates.into_iter().map(map_node_update).collect(),
        channel_updates: update
            .channel_updates
            .into_iter()
            .map(map_edge_update)
            .collect::<BackendResult<_>>()?,
        closed_channels: update.closed_chans.iter().map(|closed| closed.chan_id).collect(),
    })
}

/// `None` for event kinds the plane does not record.
pub fn map_htlc_event(event: routerrpc::HtlcEvent) -> Option<HtlcEvent> {
    use routerrpc::htlc_event::{Event, EventType};

    let kind = match event.event_type() {
        EventType::Send => HtlcEventKind::Send,
        EventType::Receive => HtlcEventKind::Receive,
        EventType::Forward => HtlcEventKind::Forward,
        EventType::Unknown => HtlcEventKind::Unknown,
    };
    let (outcome, info, failure_detail) = match event.event.as_ref()? {
        Event::ForwardEvent(forward) => (HtlcOutcome::ForwardEvent, forward.info.as_ref(), None),
        Event::ForwardFailEvent(_) => (HtlcOutcome::ForwardFailEvent, None, None),
        Event::SettleEvent(_) => (HtlcOutcome::SettleEvent, None, None),
        Event::LinkFailEvent(link) => {
            let detail = if link.failure_string.is_empty() {
                format!("{:?}", link.failure_detail())
            } else {
                link.failure_string.clone()
            };
            (HtlcOutcome::LinkFailEvent, link.info.as_ref(), Some(detail))
        }
        Event::FinalHtlcEvent(_) => (HtlcOutcome::FinalHtlcEvent, None, None),
        Event::SubscribedEvent(_) => (HtlcOutcome::SubscribedEvent, None, None),
    };
    Some(HtlcEvent {
        timestamp_ns: event.timestamp_ns,
        incoming_lnd_short_channel_id: event.incoming_channel_id,
        outgoing_lnd_short_channel_id: event.outgoing_channel_id,
        incoming_htlc_id: event.incoming_htlc_id,
        outgoing_htlc_id: event.outgoing_htlc_id,
        kind,
        outcome,
        incoming_amount_msat: info.map(|info| info.incoming_amt_msat),
        outgoing_amount_msat: info.map(|info| info.outgoing_amt_msat),
        failure_detail,
    })
}

pub fn map_peer_event(event: lnrpc::PeerEvent) -> PeerEvent {
    PeerEvent {
        online: event.r#type() == lnrpc::peer_event::EventType::PeerOnline,
        public_key: event.pub_key,
    }
}

pub fn map_peer(peer: lnrpc::Peer) -> Peer {
    Peer {
        public_key: peer.pub_key,
        address: peer.address,
        inbound: peer.inbound,
        ping_time: peer.ping_time,
        bytes_sent: peer.bytes_sent,
        bytes_received: peer.bytes_recv,
    }
}

pub fn map_invoice(invoice: lnrpc::Invoice) -> Invoice {
    use lnrpc::invoice::InvoiceState as LndInvoiceState;

    let state = match invoice.state() {
        LndInvoiceState::Open => InvoiceState::Open,
        LndInvoiceState::Settled => InvoiceState::Settled,
        LndInvoiceState::Canceled => InvoiceState::Canceled,
        LndInvoiceState::Accepted => InvoiceState::Accepted,
    };
    let payment_hash = hex::encode(&invoice.r_hash);
    Invoice {
        label: payment_hash.clone(),
        payment_hash,
        payment_request: invoice.payment_request,
        memo: invoice.memo,
        value_msat: non_negative(invoice.value_msat),
        amount_paid_msat: non_negative(invoice.amt_paid_msat),
        state,
        add_index: invoice.add_index,
        settle_index: invoice.settle_index,
        creation_date: non_negative(invoice.creation_date).saturating_mul(1_000),
        settle_date: (invoice.settle_date > 0)
            .then(|| non_negative(invoice.settle_date).saturating_mul(1_000)),
        htlcs: invoice
            .htlcs
            .iter()
            .map(|htlc| InvoiceHtlc {
                lnd_short_channel_id: htlc.chan_id,
                amount_msat: htlc.amt_msat,
            })
            .collect(),
    }
}

pub fn map_transaction(transaction: lnrpc::Transaction) -> Transaction {
    let confirmed = transaction.block_height > 0;
    Transaction {
        tx_hash: transaction.tx_hash,
        timestamp: non_negative(transaction.time_stamp).saturating_mul(1_000),
        amount_sat: transaction.amount,
        total_fees_sat: non_negative(transaction.total_fees),
        block_height: confirmed.then_some(transaction.block_height as u32),
        block_hash: (confirmed && !transaction.block_hash.is_empty())
            .then_some(transaction.block_hash),
        dest_addresses: transaction.dest_addresses,
        raw_tx_hex: transaction.raw_tx_hex,
        label: transaction.label,
    }
}

/// LND only reports settled forwards.
pub fn map_forward(event: &lnrpc::ForwardingEvent) -> Forward {
    let timestamp_ns = if event.timestamp_ns > 0 {
        event.timestamp_ns
    } else {
        event.timestamp.saturating_mul(1_000_000_000)
    };
    Forward {
        time_ms: timestamp_ns / 1_000_000,
        time_ns: timestamp_ns % 1_000_000,
        incoming_short_channel_id: ShortChannelId::from_packed(event.chan_id_in).to_string(),
        outgoing_short_channel_id: Some(
            ShortChannelId::from_packed(event.chan_id_out).to_string(),
        ),
        amount_in_msat: event.amt_in_msat,
        amount_out_msat: event.amt_out_msat,
        fee_msat: event.fee_msat,
        incoming_htlc_id: None,
        outgoing_htlc_id: None,
        status: ForwardStatus::Settled,
    }
}

pub fn map_failed_updates(response: lnrpc::PolicyUpdateResponse) -> Vec<FailedRequest> {
    response
        .failed_updates
        .into_iter()
        .map(|failed| FailedRequest {
            reason: format!("{:?}", failed.reason()),
            error: failed.update_error,
        })
        .collect()
}

pub fn map_decoded_invoice(request: lnrpc::PayReq) -> DecodedInvoice {
    DecodedInvoice {
        destination_public_key: request.destination,
        payment_hash: request.payment_hash,
        value_msat: non_negative(request.num_msat),
        created_at: non_negative(request.timestamp),
        expiry_seconds: non_negative(request.expiry),
        cltv_expiry: non_negative(request.cltv_expiry),
        memo: request.description,
        fallback_address: (!request.fallback_addr.is_empty()).then_some(request.fallback_addr),
    }
}

/// LND represents a missing preimage as an all-zero hash.
fn is_payment_preimage_empty(payment_preimage: &str) -> bool {
    payment_preimage.is_empty() || payment_preimage.chars().all(|c| c == '0')
}

pub fn map_payment(payment: lnrpc::Payment) -> Payment {
    use lnrpc::{htlc_attempt::HtlcStatus, payment::PaymentStatus as LndPaymentStatus};

    let status = match LndPaymentStatus::try_from(payment.status) {
        Ok(LndPaymentStatus::InFlight) => PaymentStatus::InFlight,
        Ok(LndPaymentStatus::Succeeded) => PaymentStatus::Succeeded,
        Ok(LndPaymentStatus::Failed) => PaymentStatus::Failed,
        _ => PaymentStatus::Unknown,
    };
    let outgoing_lnd_short_channel_id = payment
        .htlcs
        .iter()
        .find(|htlc| matches!(HtlcStatus::try_from(htlc.status), Ok(HtlcStatus::Succeeded)))
        .and_then(|htlc| htlc.route.as_ref())
        .and_then(|route| route.hops.first())
        .map(|hop| hop.chan_id);
    let failure_reason = (status == PaymentStatus::Failed)
        .then(|| format!("{:?}", payment.failure_reason()));
    Payment {
        payment_preimage: (!is_payment_preimage_empty(&payment.payment_preimage))
            .then(|| payment.payment_preimage.clone()),
        payment_hash: payment.payment_hash,
        payment_request: payment.payment_request,
        payment_index: payment.payment_index,
        status,
        value_msat: non_negative(payment.value_msat),
        fee_msat: non_negative(payment.fee_msat),
        creation_time_ns: non_negative(payment.creation_time_ns),
        failure_reason,
        outgoing_lnd_short_channel_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNDING_TXID: &str = "0101010101010101010101010101010101010101010101010101010101010102";

    #[test]
    fn test_map_succeeded_payment() {
        let payment = lnrpc::Payment {
            payment_hash: "aa".repeat(32),
            payment_preimage: "00".repeat(32),
            value_msat: 7_000,
            fee_msat: 12,
            status: lnrpc::payment::PaymentStatus::Succeeded as i32,
            htlcs: vec![lnrpc::HtlcAttempt {
                status: lnrpc::htlc_attempt::HtlcStatus::Succeeded as i32,
                route: Some(lnrpc::Route {
                    hops: vec![lnrpc::Hop {
                        chan_id: 42,
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mapped = map_payment(payment);
        assert_eq!(mapped.status, PaymentStatus::Succeeded);
        assert_eq!(mapped.outgoing_lnd_short_channel_id, Some(42));
        assert_eq!(mapped.payment_preimage, None);
        assert_eq!(mapped.value_msat, 7_000);
        assert!(mapped.failure_reason.is_none());
    }

    #[test]
    fn test_map_failed_payment() {
        let payment = lnrpc::Payment {
            status: lnrpc::payment::PaymentStatus::Failed as i32,
            ..Default::default()
        };
        let mapped = map_payment(payment);
        assert_eq!(mapped.status, PaymentStatus::Failed);
        assert!(mapped.failure_reason.is_some());
        assert_eq!(mapped.outgoing_lnd_short_channel_id, None);
    }

    #[test]
    fn test_txid_bytes_are_reversed() {
        let mut bytes = vec![1u8; 32];
        bytes[0] = 2;
        assert_eq!(txid_from_bytes(&bytes), FUNDING_TXID);

        let point = lnrpc::ChannelPoint {
            funding_txid: Some(lnrpc::channel_point::FundingTxid::FundingTxidBytes(bytes)),
            output_index: 3,
        };
        let mapped = channel_point_from_lnd(&point).unwrap();
        assert_eq!(mapped, ChannelPoint::new(FUNDING_TXID, 3));
        assert_eq!(
            channel_point_from_lnd(&channel_point_to_lnd(&mapped)).unwrap(),
            mapped
        );
    }

    #[test]
    fn test_map_channel_reads_constraints_and_htlcs() {
        let channel = lnrpc::Channel {
            active: true,
            remote_pubkey: "02aa".to_string(),
            channel_point: format!("{}:1", FUNDING_TXID),
            chan_id: ShortChannelId::new(800_000, 12, 1).packed(),
            capacity: 1_000_000,
            local_balance: 600_000,
            remote_balance: 396_000,
            commit_fee: 4_000,
            local_constraints: Some(lnrpc::ChannelConstraints {
                chan_reserve_sat: 10_000,
                dust_limit_sat: 354,
                ..Default::default()
            }),
            remote_constraints: Some(lnrpc::ChannelConstraints {
                chan_reserve_sat: 9_000,
                dust_limit_sat: 330,
                ..Default::default()
            }),
            pending_htlcs: vec![lnrpc::Htlc {
                incoming: true,
                amount: 21,
                hash_lock: vec![0xab; 32],
                ..Default::default()
            }],
            ..Default::default()
        };
        let mapped = map_channel(channel).unwrap();
        assert_eq!(mapped.channel_point, ChannelPoint::new(FUNDING_TXID, 1));
        assert_eq!(mapped.local_reserve_sat, 10_000);
        assert_eq!(mapped.remote_dust_limit_sat, 330);
        assert_eq!(mapped.commit_fee_sat, 4_000);
        assert_eq!(mapped.pending_htlcs[0].amount_msat, 21_000);
        assert_eq!(mapped.pending_htlcs[0].hash_lock, "ab".repeat(32));

        let broken = lnrpc::Channel {
            channel_point: "not-a-point".to_string(),
            ..Default::default()
        };
        assert!(map_channel(broken).is_err());
    }

    #[test]
    fn test_map_closed_channel_types_and_initiators() {
        let summary = lnrpc::ChannelCloseSummary {
            channel_point: format!("{}:0", FUNDING_TXID),
            chan_id: 7,
            closing_tx_hash: "ff".repeat(32),
            capacity: 500_000,
            close_height: 810_000,
            close_type: lnrpc::channel_close_summary::ClosureType::RemoteForceClose as i32,
            open_initiator: lnrpc::Initiator::Local as i32,
            close_initiator: lnrpc::Initiator::Both as i32,
            ..Default::default()
        };
        let mapped = map_closed_channel(summary).unwrap();
        assert_eq!(mapped.close_type, ChannelStatus::RemoteForceClosed);
        assert_eq!(mapped.open_initiator_local, Some(true));
        assert_eq!(mapped.close_initiator_local, None);
        assert_eq!(mapped.close_height, 810_000);
    }

    #[test]
    fn test_map_channel_event_pending_open() {
        let update = lnrpc::ChannelEventUpdate {
            channel: Some(lnrpc::channel_event_update::Channel::PendingOpenChannel(
                lnrpc::PendingUpdate {
                    txid: {
                        let mut bytes = vec![1u8; 32];
                        bytes[0] = 2;
                        bytes
                    },
                    output_index: 0,
                },
            )),
            ..Default::default()
        };
        assert_eq!(
            map_channel_event(update).unwrap(),
            Some(ChannelEvent::PendingOpen(ChannelPoint::new(FUNDING_TXID, 0)))
        );
        assert_eq!(
            map_channel_event(lnrpc::ChannelEventUpdate::default()).unwrap(),
            None
        );
    }

    #[test]
    fn test_map_link_fail_htlc_event() {
        let event = routerrpc::HtlcEvent {
            incoming_channel_id: 11,
            outgoing_channel_id: 12,
            timestamp_ns: 1_700_000_000_123_456_789,
            event_type: routerrpc::htlc_event::EventType::Forward as i32,
            event: Some(routerrpc::htlc_event::Event::LinkFailEvent(
                routerrpc::LinkFailEvent {
                    info: Some(routerrpc::HtlcInfo {
                        incoming_amt_msat: 10_010,
                        outgoing_amt_msat: 10_000,
                        ..Default::default()
                    }),
                    failure_string: "insufficient balance".to_string(),
                    ..Default::default()
                },
            )),
            ..Default::default()
        };
        let mapped = map_htlc_event(event).unwrap();
        assert_eq!(mapped.kind, HtlcEventKind::Forward);
        assert_eq!(mapped.outcome, HtlcOutcome::LinkFailEvent);
        assert_eq!(mapped.outgoing_amount_msat, Some(10_000));
        assert_eq!(mapped.failure_detail.as_deref(), Some("insufficient balance"));

        assert!(map_htlc_event(routerrpc::HtlcEvent::default()).is_none());
    }

    #[test]
    fn test_map_invoice_dates_in_millis() {
        let invoice = lnrpc::Invoice {
            r_hash: vec![0xcd; 32],
            value_msat: 50_000,
            amt_paid_msat: 50_000,
            creation_date: 1_700_000_000,
            settle_date: 1_700_000_060,
            state: lnrpc::invoice::InvoiceState::Settled as i32,
            htlcs: vec![
                lnrpc::InvoiceHtlc {
                    chan_id: 5,
                    amt_msat: 20_000,
                    ..Default::default()
                },
                lnrpc::InvoiceHtlc {
                    chan_id: 6,
                    amt_msat: 30_000,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mapped = map_invoice(invoice);
        assert_eq!(mapped.payment_hash, "cd".repeat(32));
        assert_eq!(mapped.label, mapped.payment_hash);
        assert_eq!(mapped.state, InvoiceState::Settled);
        assert_eq!(mapped.creation_date, 1_700_000_000_000);
        assert_eq!(mapped.settle_date, Some(1_700_000_060_000));
        assert_eq!(mapped.htlcs.len(), 2);
        assert_eq!(mapped.htlcs[1].lnd_short_channel_id, 6);
    }

    #[test]
    fn test_map_forward_splits_nanoseconds() {
        let event = lnrpc::ForwardingEvent {
            chan_id_in: ShortChannelId::new(700_000, 1, 0).packed(),
            chan_id_out: ShortChannelId::new(700_001, 2, 1).packed(),
            amt_in_msat: 1_001_000,
            amt_out_msat: 1_000_000,
            fee_msat: 1_000,
            timestamp: 1_700_000_000,
            timestamp_ns: 1_700_000_000_123_456_789,
            ..Default::default()
        };
        let forward = map_forward(&event);
        assert_eq!(forward.time_ms, 1_700_000_000_123);
        assert_eq!(forward.time_ns, 456_789);
        assert_eq!(forward.incoming_short_channel_id, "700000x1x0");
        assert_eq!(forward.outgoing_short_channel_id.as_deref(), Some("700001x2x1"));
        assert_eq!(forward.status, ForwardStatus::Settled);
    }
}
