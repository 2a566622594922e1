use std::collections::HashMap;

use super::{
    proto::{self, channel_side, channel_state, close_cause, forward_status, invoice_status},
    ClnChannel, ClnFundsChannel,
};
use crate::{
    backend::{
        ClosedChannel, Forward, ForwardStatus, Htlc, Invoice, InvoiceState, NodeAnnouncement,
        Payment, PaymentStatus, Peer, RoutingPolicy, Transaction,
    },
    commands::types::{DecodedInvoice, NodeInformation, WalletBalance},
    types::{ChannelPoint, ChannelStatus, FailedRequest, Implementation, ShortChannelId},
};

pub fn msat(amount: &Option<proto::Amount>) -> u64 {
    amount.as_ref().map(|amount| amount.msat).unwrap_or_default()
}

pub fn amount(msat: u64) -> proto::Amount {
    proto::Amount { msat }
}

/// CLN sends transaction ids in display order.
pub fn channel_point(txid: &[u8], output_index: u32) -> Option<ChannelPoint> {
    (!txid.is_empty()).then(|| ChannelPoint::new(hex::encode(txid), output_index))
}

fn lnd_short_channel_id(short_channel_id: Option<&str>) -> u64 {
    short_channel_id
        .and_then(|scid| scid.parse::<ShortChannelId>().ok())
        .map(|scid| scid.packed())
        .unwrap_or_default()
}

fn node_address(item_type: i32, address: Option<&str>, port: u32) -> Option<String> {
    const IPV6: i32 = 2;
    let address = address?;
    Some(if item_type == IPV6 {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    })
}

/// Feature bitmaps are big endian; bit 0 is the lowest bit of the last byte.
pub fn feature_bits(bitmap: &[u8]) -> Vec<u32> {
    let mut bits = Vec::new();
    for (position, byte) in bitmap.iter().rev().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                bits.push(position as u32 * 8 + bit);
            }
        }
    }
    bits
}

pub fn map_information(info: proto::GetinfoResponse) -> NodeInformation {
    let public_key = hex::encode(&info.id);
    let synced = info.warning_bitcoind_sync.is_none() && info.warning_lightningd_sync.is_none();
    let addresses = info
        .address
        .iter()
        .filter_map(|address| {
            node_address(address.item_type, address.address.as_deref(), address.port)
        })
        .map(|address| format!("{}@{}", public_key, address))
        .collect();
    NodeInformation {
        node_id: 0,
        implementation: Implementation::Cln,
        version: info.version,
        alias: info.alias.unwrap_or_default(),
        color: hex::encode(&info.color),
        pending_channel_count: info.num_pending_channels,
        active_channel_count: info.num_active_channels,
        inactive_channel_count: info.num_inactive_channels,
        peer_count: info.num_peers,
        block_height: info.blockheight,
        block_hash: String::new(),
        chain_synced: synced,
        graph_synced: synced,
        addresses,
        public_key,
    }
}

pub fn map_wallet_balance(funds: &proto::ListfundsResponse) -> WalletBalance {
    use proto::output_status::{CONFIRMED, IMMATURE, UNCONFIRMED};

    let mut balance = WalletBalance::default();
    for output in &funds.outputs {
        let sat = msat(&output.amount_msat) / 1_000;
        match output.status {
            CONFIRMED => balance.confirmed_balance_sat += sat,
            UNCONFIRMED | IMMATURE => balance.unconfirmed_balance_sat += sat,
            _ => continue,
        }
        if output.reserved {
            balance.locked_balance_sat += sat;
        }
        balance.total_balance_sat += sat;
    }
    balance
}

pub fn map_peer(peer: proto::ListpeersPeers) -> Peer {
    Peer {
        public_key: hex::encode(&peer.id),
        address: peer
            .remote_addr
            .or_else(|| peer.netaddr.into_iter().next())
            .unwrap_or_default(),
        inbound: false,
        ping_time: 0,
        bytes_sent: 0,
        bytes_received: 0,
    }
}

fn peer_channel_status(state: i32) -> ChannelStatus {
    match state {
        channel_state::OPENINGD
        | channel_state::CHANNELD_AWAITING_LOCKIN
        | channel_state::DUALOPEND_OPEN_INIT
        | channel_state::DUALOPEND_AWAITING_LOCKIN => ChannelStatus::Opening,
        channel_state::CHANNELD_NORMAL => ChannelStatus::Open,
        _ => ChannelStatus::Closing,
    }
}

pub fn map_routing_policy(channel: &proto::ListchannelsChannels) -> RoutingPolicy {
    RoutingPolicy {
        disabled: !channel.active,
        time_lock_delta: channel.delay,
        min_htlc_msat: msat(&channel.htlc_minimum_msat),
        max_htlc_msat: msat(&channel.htlc_maximum_msat),
        fee_base_msat: channel.base_fee_millisatoshi as u64,
        fee_rate_milli_msat: channel.fee_per_millionth as u64,
    }
}

/// Policies announced for each short channel id, keyed by `BLOCKxTXxOUTPUT`.
pub fn policies_by_channel(
    channels: &[proto::ListchannelsChannels],
) -> HashMap<String, RoutingPolicy> {
    channels
        .iter()
        .map(|channel| (channel.short_channel_id.clone(), map_routing_policy(channel)))
        .collect()
}

pub fn map_peer_channel(
    channel: proto::ListpeerchannelsChannels,
    local_policies: &HashMap<String, RoutingPolicy>,
    remote_policies: &HashMap<String, RoutingPolicy>,
) -> ClnChannel {
    let policy = |policies: &HashMap<String, RoutingPolicy>| {
        channel
            .short_channel_id
            .as_ref()
            .and_then(|scid| policies.get(scid))
            .copied()
    };
    let local_policy = policy(local_policies);
    let remote_policy = policy(remote_policies);
    ClnChannel {
        peer_public_key: hex::encode(&channel.peer_id),
        peer_connected: channel.peer_connected,
        channel_point: channel
            .funding_txid
            .as_deref()
            .and_then(|txid| channel_point(txid, channel.funding_outnum.unwrap_or_default())),
        status: peer_channel_status(channel.state),
        capacity_sat: msat(&channel.total_msat) / 1_000,
        to_us_msat: msat(&channel.to_us_msat),
        private: channel.private.unwrap_or_default(),
        opener_local: channel.opener == channel_side::LOCAL,
        local_policy,
        remote_policy,
        htlcs: channel
            .htlcs
            .iter()
            .map(|htlc| Htlc {
                incoming: htlc.direction == proto::htlc_direction::IN,
                amount_msat: msat(&htlc.amount_msat),
                hash_lock: hex::encode(&htlc.payment_hash),
                expiration_height: htlc.expiry,
                htlc_index: htlc.id,
                forwarding_channel: 0,
                forwarding_htlc_index: 0,
            })
            .collect(),
        short_channel_id: channel.short_channel_id,
    }
}

fn close_type(cause: i32) -> ChannelStatus {
    match cause {
        close_cause::USER => ChannelStatus::CooperativeClosed,
        close_cause::REMOTE => ChannelStatus::RemoteForceClosed,
        close_cause::LOCAL => ChannelStatus::LocalForceClosed,
        close_cause::PROTOCOL => ChannelStatus::BreachClosed,
        close_cause::ONCHAIN => ChannelStatus::Abandoned,
        _ => ChannelStatus::FundingCancelled,
    }
}

fn side_is_local(side: i32) -> Option<bool> {
    match side {
        channel_side::LOCAL => Some(true),
        channel_side::REMOTE => Some(false),
        _ => None,
    }
}

pub fn map_closed_channel(
    channel: proto::ListclosedchannelsClosedchannels,
) -> Option<ClosedChannel> {
    Some(ClosedChannel {
        channel_point: channel_point(&channel.funding_txid, channel.funding_outnum)?,
        lnd_short_channel_id: lnd_short_channel_id(channel.short_channel_id.as_deref()),
        remote_public_key: channel.peer_id.as_deref().map(hex::encode).unwrap_or_default(),
        capacity_sat: msat(&channel.total_msat) / 1_000,
        close_height: 0,
        closing_tx_hash: String::new(),
        close_type: close_type(channel.close_cause),
        open_initiator_local: side_is_local(channel.opener),
        close_initiator_local: channel.closer.and_then(side_is_local),
    })
}

pub fn map_funds_channel(channel: proto::ListfundsChannels) -> ClnFundsChannel {
    let shutting_down = channel.state >= channel_state::CHANNELD_SHUTTING_DOWN
        && channel.state < channel_state::DUALOPEND_OPEN_INIT;
    ClnFundsChannel {
        peer_public_key: hex::encode(&channel.peer_id),
        channel_point: channel_point(&channel.funding_txid, channel.funding_output),
        our_amount_msat: channel.our_amount_msat.map(|amount| amount.msat),
        amount_msat: channel.amount_msat.map(|amount| amount.msat),
        short_channel_id: channel.short_channel_id,
        shutting_down,
    }
}

pub fn map_node(node: proto::ListnodesNodes) -> NodeAnnouncement {
    NodeAnnouncement {
        public_key: hex::encode(&node.nodeid),
        alias: node.alias.unwrap_or_default(),
        color: node.color.as_deref().map(hex::encode).unwrap_or_default(),
        addresses: node
            .addresses
            .iter()
            .filter_map(|address| {
                node_address(address.item_type, address.address.as_deref(), address.port)
            })
            .collect(),
        features: node.features.as_deref().map(feature_bits).unwrap_or_default(),
    }
}

/// `listtransactions` carries neither amounts nor times; `first_seen_ms` stands in for the
/// timestamp.
pub fn map_transaction(
    transaction: proto::ListtransactionsTransactions,
    first_seen_ms: u64,
) -> Transaction {
    Transaction {
        tx_hash: hex::encode(&transaction.hash),
        timestamp: first_seen_ms,
        amount_sat: 0,
        total_fees_sat: 0,
        block_height: (transaction.blockheight > 0).then_some(transaction.blockheight),
        block_hash: None,
        dest_addresses: Vec::new(),
        raw_tx_hex: hex::encode(&transaction.rawtx),
        label: String::new(),
    }
}

pub fn forward_status_code(status: ForwardStatus) -> i32 {
    match status {
        ForwardStatus::Offered => forward_status::OFFERED,
        ForwardStatus::Settled => forward_status::SETTLED,
        ForwardStatus::LocalFailed => forward_status::LOCAL_FAILED,
        ForwardStatus::Failed => forward_status::FAILED,
    }
}

fn map_forward_status(status: i32) -> ForwardStatus {
    match status {
        forward_status::OFFERED => ForwardStatus::Offered,
        forward_status::SETTLED => ForwardStatus::Settled,
        forward_status::LOCAL_FAILED => ForwardStatus::LocalFailed,
        _ => ForwardStatus::Failed,
    }
}

pub fn map_forward(forward: proto::ListforwardsForwards) -> Forward {
    let received_ns = (forward.received_time.max(0.0) * 1e9) as u64;
    Forward {
        time_ms: received_ns / 1_000_000,
        time_ns: received_ns % 1_000_000,
        amount_in_msat: msat(&forward.in_msat),
        amount_out_msat: msat(&forward.out_msat),
        fee_msat: msat(&forward.fee_msat),
        incoming_htlc_id: forward.in_htlc_id,
        outgoing_htlc_id: forward.out_htlc_id,
        status: map_forward_status(forward.status),
        incoming_short_channel_id: forward.in_channel,
        outgoing_short_channel_id: forward.out_channel,
    }
}

/// `creation_date_ms` comes from decoding the bolt11, `listinvoices` does not report it.
pub fn map_invoice(invoice: proto::ListinvoicesInvoices, creation_date_ms: u64) -> Invoice {
    let state = match invoice.status {
        invoice_status::PAID => InvoiceState::Settled,
        invoice_status::EXPIRED => InvoiceState::Canceled,
        _ => InvoiceState::Open,
    };
    Invoice {
        payment_hash: hex::encode(&invoice.payment_hash),
        payment_request: invoice.bolt11.unwrap_or_default(),
        memo: invoice.description.unwrap_or_default(),
        value_msat: msat(&invoice.amount_msat),
        amount_paid_msat: msat(&invoice.amount_received_msat),
        state,
        add_index: 0,
        settle_index: invoice.pay_index.unwrap_or_default(),
        creation_date: creation_date_ms,
        settle_date: invoice.paid_at.map(|paid_at| paid_at.saturating_mul(1_000)),
        htlcs: Vec::new(),
        label: invoice.label,
    }
}

pub fn map_sendpay(payment: proto::ListsendpaysPayments) -> Payment {
    use proto::sendpay_status::{COMPLETE, FAILED, PENDING};

    let status = match payment.status {
        PENDING => PaymentStatus::InFlight,
        COMPLETE => PaymentStatus::Succeeded,
        FAILED => PaymentStatus::Failed,
        _ => PaymentStatus::Unknown,
    };
    let value_msat = msat(&payment.amount_msat);
    let sent_msat = msat(&payment.amount_sent_msat);
    Payment {
        payment_hash: hex::encode(&payment.payment_hash),
        payment_preimage: payment.payment_preimage.as_deref().map(hex::encode),
        payment_request: payment.bolt11.unwrap_or_default(),
        payment_index: payment.id,
        status,
        value_msat,
        fee_msat: sent_msat.saturating_sub(value_msat),
        creation_time_ns: payment.created_at.saturating_mul(1_000_000_000),
        failure_reason: (status == PaymentStatus::Failed)
            .then(|| "payment failed, see erroronion".to_string()),
        outgoing_lnd_short_channel_id: None,
    }
}

pub fn map_pay(response: proto::PayResponse, payment_request: String) -> Payment {
    use proto::pay_status::{COMPLETE, FAILED, PENDING};

    let status = match response.status {
        COMPLETE => PaymentStatus::Succeeded,
        PENDING => PaymentStatus::InFlight,
        FAILED => PaymentStatus::Failed,
        _ => PaymentStatus::Unknown,
    };
    let value_msat = msat(&response.amount_msat);
    Payment {
        payment_hash: hex::encode(&response.payment_hash),
        payment_preimage: (!response.payment_preimage.is_empty())
            .then(|| hex::encode(&response.payment_preimage)),
        payment_request,
        payment_index: 0,
        status,
        value_msat,
        fee_msat: msat(&response.amount_sent_msat).saturating_sub(value_msat),
        creation_time_ns: (response.created_at.max(0.0) * 1e9) as u64,
        failure_reason: response.warning_partial_completion,
        outgoing_lnd_short_channel_id: None,
    }
}

pub fn map_decoded_invoice(decoded: proto::DecodepayResponse) -> DecodedInvoice {
    DecodedInvoice {
        destination_public_key: hex::encode(&decoded.payee),
        payment_hash: hex::encode(&decoded.payment_hash),
        value_msat: msat(&decoded.amount_msat),
        created_at: decoded.created_at,
        expiry_seconds: decoded.expiry,
        cltv_expiry: decoded.min_final_cltv_expiry as u64,
        memo: decoded.description.unwrap_or_default(),
        fallback_address: decoded
            .fallbacks
            .into_iter()
            .find_map(|fallback| fallback.addr),
    }
}

pub fn map_setchannel_warnings(response: proto::SetchannelResponse) -> Vec<FailedRequest> {
    let mut failed = Vec::new();
    for channel in response.channels {
        if let Some(warning) = channel.warning_htlcmin_too_low {
            failed.push(FailedRequest {
                reason: format!("{}: minimum htlc too low", channel.short_channel_id),
                error: warning,
            });
        }
        if let Some(warning) = channel.warning_htlcmax_too_high {
            failed.push(FailedRequest {
                reason: format!("{}: maximum htlc too high", channel.short_channel_id),
                error: warning,
            });
        }
    }
    failed
}

/// Splits `host:port`, keeping bracketed IPv6 hosts intact.
pub fn split_host_port(address: &str) -> (String, Option<u32>) {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.contains(']') => match port.parse() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (address.to_string(), None),
        },
        _ => (address.to_string(), None),
    }
}

/// Labels are unique per node; CLN has no counter to derive one from.
pub fn invoice_label(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%d.%H%M%S.%6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const OUR_SCID: &str = "800000x7x1";

    fn peer_channel(state: i32) -> proto::ListpeerchannelsChannels {
        proto::ListpeerchannelsChannels {
            peer_id: vec![0x02; 33],
            peer_connected: true,
            state,
            short_channel_id: Some(OUR_SCID.to_string()),
            funding_txid: Some(vec![0xab; 32]),
            funding_outnum: Some(1),
            total_msat: Some(amount(2_000_000_000)),
            to_us_msat: Some(amount(750_000_000)),
            opener: channel_side::REMOTE,
            htlcs: vec![proto::ListpeerchannelsChannelsHtlcs {
                direction: proto::htlc_direction::IN,
                id: 4,
                amount_msat: Some(amount(5_000)),
                expiry: 800_144,
                payment_hash: vec![0xcd; 32],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_map_peer_channel_joins_policies() {
        let announced = proto::ListchannelsChannels {
            short_channel_id: OUR_SCID.to_string(),
            active: true,
            base_fee_millisatoshi: 1_000,
            fee_per_millionth: 250,
            delay: 34,
            htlc_minimum_msat: Some(amount(1)),
            htlc_maximum_msat: Some(amount(1_980_000_000)),
            ..Default::default()
        };
        let local = policies_by_channel(&[announced]);
        let mapped = map_peer_channel(
            peer_channel(channel_state::CHANNELD_NORMAL),
            &local,
            &HashMap::new(),
        );

        assert_eq!(mapped.status, ChannelStatus::Open);
        assert_eq!(mapped.capacity_sat, 2_000_000);
        assert_eq!(mapped.to_us_msat, 750_000_000);
        assert!(!mapped.opener_local);
        assert_eq!(mapped.channel_point, Some(ChannelPoint::new("ab".repeat(32), 1)));
        let policy = mapped.local_policy.unwrap();
        assert_eq!(policy.fee_rate_milli_msat, 250);
        assert_eq!(policy.time_lock_delta, 34);
        assert!(!policy.disabled);
        assert_eq!(mapped.remote_policy, None);
        assert!(mapped.htlcs[0].incoming);
        assert_eq!(mapped.htlcs[0].hash_lock, "cd".repeat(32));
    }

    #[test]
    fn test_peer_channel_states() {
        let status = peer_channel_status;
        assert_eq!(status(channel_state::OPENINGD), ChannelStatus::Opening);
        assert_eq!(status(channel_state::DUALOPEND_AWAITING_LOCKIN), ChannelStatus::Opening);
        assert_eq!(status(channel_state::CHANNELD_NORMAL), ChannelStatus::Open);
        assert_eq!(status(channel_state::CHANNELD_SHUTTING_DOWN), ChannelStatus::Closing);
        assert!(status(8).is_closed());
    }

    #[test]
    fn test_map_closed_channel_causes() {
        let closed = |cause| proto::ListclosedchannelsClosedchannels {
            peer_id: Some(vec![0x03; 33]),
            short_channel_id: Some(OUR_SCID.to_string()),
            opener: channel_side::LOCAL,
            closer: Some(channel_side::REMOTE),
            funding_txid: vec![0xab; 32],
            funding_outnum: 0,
            total_msat: Some(amount(1_000_000_000)),
            close_cause: cause,
            ..Default::default()
        };
        let mapped = map_closed_channel(closed(close_cause::USER)).unwrap();
        assert_eq!(mapped.close_type, ChannelStatus::CooperativeClosed);
        assert_eq!(mapped.open_initiator_local, Some(true));
        assert_eq!(mapped.close_initiator_local, Some(false));
        assert_eq!(
            mapped.lnd_short_channel_id,
            ShortChannelId::new(800_000, 7, 1).packed()
        );
        assert_eq!(
            map_closed_channel(closed(close_cause::PROTOCOL)).unwrap().close_type,
            ChannelStatus::BreachClosed
        );
        assert_eq!(
            map_closed_channel(closed(close_cause::UNKNOWN)).unwrap().close_type,
            ChannelStatus::FundingCancelled
        );

        let unfunded = proto::ListclosedchannelsClosedchannels::default();
        assert!(map_closed_channel(unfunded).is_none());
    }

    #[test]
    fn test_wallet_balance_from_outputs() {
        use proto::output_status::*;
        let output = |status, sat: u64, reserved| proto::ListfundsOutputs {
            amount_msat: Some(amount(sat * 1_000)),
            status,
            reserved,
            ..Default::default()
        };
        let funds = proto::ListfundsResponse {
            outputs: vec![
                output(CONFIRMED, 100_000, false),
                output(CONFIRMED, 20_000, true),
                output(UNCONFIRMED, 3_000, false),
                output(IMMATURE, 400, false),
                output(SPENT, 9_999_999, false),
            ],
            channels: Vec::new(),
        };
        let balance = map_wallet_balance(&funds);
        assert_eq!(balance.confirmed_balance_sat, 120_000);
        assert_eq!(balance.unconfirmed_balance_sat, 3_400);
        assert_eq!(balance.locked_balance_sat, 20_000);
        assert_eq!(balance.total_balance_sat, 123_400);
    }

    #[test]
    fn test_map_forward_received_time() {
        let forward = proto::ListforwardsForwards {
            in_channel: "700000x1x0".to_string(),
            in_msat: Some(amount(1_001_000)),
            status: forward_status::LOCAL_FAILED,
            received_time: 1_700_000_000.25,
            out_channel: Some("700001x2x1".to_string()),
            in_htlc_id: Some(9),
            ..Default::default()
        };
        let mapped = map_forward(forward);
        assert_eq!(mapped.time_ms, 1_700_000_000_250);
        assert_eq!(mapped.status, ForwardStatus::LocalFailed);
        assert_eq!(mapped.amount_in_msat, 1_001_000);
        assert_eq!(mapped.amount_out_msat, 0);
        assert_eq!(mapped.incoming_htlc_id, Some(9));
        assert_eq!(forward_status_code(mapped.status), forward_status::LOCAL_FAILED);
    }

    #[test]
    fn test_map_funds_channel_shutting_down() {
        let funds = |state| proto::ListfundsChannels {
            peer_id: vec![0x02; 33],
            funding_txid: vec![0x11; 32],
            state,
            ..Default::default()
        };
        assert!(!map_funds_channel(funds(channel_state::CHANNELD_NORMAL)).shutting_down);
        assert!(map_funds_channel(funds(channel_state::CHANNELD_SHUTTING_DOWN)).shutting_down);
        assert!(!map_funds_channel(funds(channel_state::DUALOPEND_OPEN_INIT)).shutting_down);
    }

    #[test]
    fn test_feature_bits_and_addresses() {
        assert_eq!(feature_bits(&[0x01, 0x02]), vec![1, 8]);
        assert_eq!(split_host_port("10.0.0.1:9735"), ("10.0.0.1".to_string(), Some(9735)));
        assert_eq!(split_host_port("[::1]:9735"), ("[::1]".to_string(), Some(9735)));
        assert_eq!(split_host_port("node.onion"), ("node.onion".to_string(), None));
        assert_eq!(node_address(2, Some("::1"), 9735).as_deref(), Some("[::1]:9735"));
    }

    #[test]
    fn test_invoice_label_format() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(invoice_label(now), "20240309.070501.000042");
    }

    #[test]
    fn test_map_sendpay_fee() {
        let payment = proto::ListsendpaysPayments {
            id: 3,
            payment_hash: vec![0xee; 32],
            status: proto::sendpay_status::COMPLETE,
            amount_msat: Some(amount(10_000)),
            amount_sent_msat: Some(amount(10_012)),
            created_at: 1_700_000_000,
            payment_preimage: Some(vec![0x01; 32]),
            ..Default::default()
        };
        let mapped = map_sendpay(payment);
        assert_eq!(mapped.status, PaymentStatus::Succeeded);
        assert_eq!(mapped.fee_msat, 12);
        assert_eq!(mapped.payment_index, 3);
        assert_eq!(mapped.creation_time_ns, 1_700_000_000_000_000_000);
        assert_eq!(mapped.payment_preimage, Some("01".repeat(32)));
    }
}
