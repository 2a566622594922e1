//! Persistence and cache updates shared by the LND and CLN subscribers.

use std::{collections::HashSet, str::FromStr};

use tracing::{debug, error, trace, warn};

use super::SubscriberContext;
use crate::{
    backend::{
        ChannelEdgeUpdate, ClosedChannel, Forward, ForwardStatus, HtlcEvent, HtlcEventKind,
        HtlcOutcome, Invoice, InvoiceState, NodeAnnouncement, Payment, PaymentStatus, Peer,
        RemoteChannel, RoutingPolicy, Transaction,
    },
    events::{
        BalanceUpdateSource, BlockEvent, ChannelEvent, ChannelEventKind, ForwardEvent,
        InvoiceEvent, PaymentEvent, PeerEvent, RoutingPolicyEvent,
    },
    now_timestamp_as_millis_u64,
    store::{
        ClnForwardStatus, ConnectionHistoryRecord, ForwardRecord, HtlcEventRecord, InvoiceRecord,
        NodeEventRecord, PaymentRecord, PlaneStore, RoutingPolicyRecord, TransactionRecord,
        UpsertOutcome,
    },
    types::{
        ChannelFlags, ChannelId, ChannelPoint, ChannelSettings, ChannelStatus, CustomSettings,
        NodeId, NodeKey, NodeRole, NodeSettings, ShortChannelId, Status,
    },
};

pub fn custom_settings<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> CustomSettings {
    ctx.registry
        .get_connection_details(node_id)
        .map(|details| details.custom_settings)
        .unwrap_or_default()
}

/// Failed payments are only kept when the node imports them.
pub fn wanted_payment(settings: CustomSettings, payment: &Payment) -> bool {
    payment.status != PaymentStatus::Failed
        || settings.contains(CustomSettings::IMPORT_FAILED_PAYMENTS)
}

/// Node id of `public_key` seen from the managed node `node_id`. Unknown keys are stored
/// as peers on the same chain and network, with the implementation of the observer.
pub fn ensure_node<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    public_key: &str,
) -> anyhow::Result<NodeId> {
    let observer = ctx
        .registry
        .get_node_settings(node_id)
        .ok_or_else(|| anyhow::anyhow!("node {} is not registered", node_id))?;
    let key = NodeKey::new(public_key, observer.key.chain, observer.key.network);
    if let Some(existing) = ctx.registry.get_node_id(&key) {
        return Ok(existing);
    }
    let settings = ctx.store.save_node(NodeSettings {
        node_id: 0,
        key,
        implementation: observer.implementation,
        name: String::new(),
        alias: None,
        color: None,
        css_color: None,
        role: NodeRole::Peer,
        status: Status::Active,
    });
    debug!(node_id, peer_node_id = settings.node_id, public_key, "new peer node");
    ctx.registry.set_node_settings(settings.clone());
    Ok(settings.node_id)
}

fn save_channel<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    settings: ChannelSettings,
) -> ChannelSettings {
    let settings = ctx.store.save_channel(settings);
    ctx.registry.set_channel_settings(settings.clone());
    settings
}

fn existing_channel<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    channel_point: Option<&ChannelPoint>,
    short_channel_id: Option<&ShortChannelId>,
) -> Option<ChannelSettings> {
    channel_point
        .and_then(|point| ctx.registry.get_channel_id_by_channel_point(point))
        .or_else(|| {
            short_channel_id.and_then(|scid| ctx.registry.get_channel_id_by_short_channel_id(scid))
        })
        .and_then(|channel_id| ctx.registry.get_channel_settings(channel_id))
}

/// Channel id of a textual short channel id (`AxBxC`). Unknown ids resolve to `None`.
pub fn channel_id_of<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    short_channel_id: &str,
) -> Option<ChannelId> {
    let scid = match ShortChannelId::from_str(short_channel_id) {
        Ok(scid) => scid,
        Err(err) => {
            error!(short_channel_id, "invalid short channel id: {}", err);
            return None;
        }
    };
    let channel_id = ctx.registry.get_channel_id_by_short_channel_id(&scid);
    if channel_id.is_none() {
        error!(short_channel_id, "short channel id is not registered");
    }
    channel_id
}

/// Channel id of a packed LND short channel id; zero means none.
pub fn channel_id_of_packed<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    packed: u64,
) -> Option<ChannelId> {
    if packed == 0 {
        return None;
    }
    ctx.registry.get_channel_id_by_lnd_short_channel_id(packed)
}

/// Inserts or refreshes an open channel of `node_id`. Returns the row and whether it is
/// new or was not open before.
pub fn upsert_open_channel<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    channel: &RemoteChannel,
) -> anyhow::Result<(ChannelSettings, bool)> {
    let remote_node_id = ensure_node(ctx, node_id, &channel.remote_public_key)?;
    let short_channel_id = (channel.lnd_short_channel_id != 0)
        .then(|| ShortChannelId::from_packed(channel.lnd_short_channel_id));
    let (initiating, accepting) = if channel.initiator {
        (node_id, remote_node_id)
    } else {
        (remote_node_id, node_id)
    };
    let existing = existing_channel(ctx, Some(&channel.channel_point), short_channel_id.as_ref());
    let (mut settings, opened) = match existing {
        Some(existing) => {
            let opened = existing.status != ChannelStatus::Open;
            (existing, opened)
        }
        None => (
            ChannelSettings::new(
                short_channel_id,
                Some(channel.channel_point.clone()),
                channel.capacity_sat,
                node_id,
                remote_node_id,
            ),
            true,
        ),
    };
    let before = settings.clone();
    settings.short_channel_id = short_channel_id.or(settings.short_channel_id);
    settings.capacity_sat = channel.capacity_sat;
    settings.private = channel.private;
    settings.initiating_node_id = Some(initiating);
    settings.accepting_node_id = Some(accepting);
    settings.status = ChannelStatus::Open;
    if settings.funding_block_height.is_none() {
        settings.funding_block_height = settings.short_channel_id.map(|scid| scid.block_height);
    }
    if settings != before || settings.channel_id == 0 {
        settings = save_channel(ctx, settings);
    }
    Ok((settings, opened))
}

/// Records the closing of a channel. Returns the row and whether its status changed.
pub fn upsert_closed_channel<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    closed: &ClosedChannel,
) -> anyhow::Result<(ChannelSettings, bool)> {
    let remote_node_id = ensure_node(ctx, node_id, &closed.remote_public_key)?;
    let short_channel_id = (closed.lnd_short_channel_id != 0)
        .then(|| ShortChannelId::from_packed(closed.lnd_short_channel_id));
    let mut settings = existing_channel(ctx, Some(&closed.channel_point), short_channel_id.as_ref())
        .unwrap_or_else(|| {
            ChannelSettings::new(
                short_channel_id,
                Some(closed.channel_point.clone()),
                closed.capacity_sat,
                node_id,
                remote_node_id,
            )
        });
    let before = settings.clone();
    settings.short_channel_id = short_channel_id.or(settings.short_channel_id);
    settings.status = closed.close_type;
    if !closed.closing_tx_hash.is_empty() {
        settings.closing_transaction_hash = Some(closed.closing_tx_hash.clone());
    }
    if closed.close_height > 0 {
        settings.closing_block_height = Some(closed.close_height);
    }
    match closed.open_initiator_local {
        Some(true) => settings.initiating_node_id = Some(node_id),
        Some(false) => settings.initiating_node_id = Some(remote_node_id),
        None => {}
    }
    match closed.close_initiator_local {
        Some(true) => settings.closing_node_id = Some(node_id),
        Some(false) => settings.closing_node_id = Some(remote_node_id),
        None => {}
    }
    let changed = settings.status != before.status;
    if settings != before || settings.channel_id == 0 {
        settings = save_channel(ctx, settings);
    }
    Ok((settings, changed))
}

pub fn publish_channel_event<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    channel_id: ChannelId,
    kind: ChannelEventKind,
    status: ChannelStatus,
) {
    ctx.events.channel.send(ChannelEvent {
        node_id,
        channel_id,
        kind,
        status,
        timestamp: now_timestamp_as_millis_u64(),
    });
}

/// Applies a channel event of an LND channel-event stream.
pub fn process_channel_event<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    event: crate::backend::ChannelEvent,
) -> anyhow::Result<()> {
    use crate::backend::ChannelEvent as Backend;
    match event {
        Backend::Open(channel) => {
            let (settings, opened) = upsert_open_channel(ctx, node_id, &channel)?;
            let remote_node_id = settings.remote_node_id(node_id).unwrap_or_default();
            let policy = |announcer| {
                ctx.store
                    .get_latest_routing_policy_by_announcer(settings.channel_id, announcer)
                    .map(|record| record.policy)
                    .unwrap_or_default()
            };
            ctx.cache.set_channel_state(crate::channel_state::ChannelState::from_remote_channel(
                node_id,
                settings.channel_id,
                remote_node_id,
                &channel,
                policy(node_id),
                policy(remote_node_id),
            ));
            if opened {
                publish_channel_event(
                    ctx,
                    node_id,
                    settings.channel_id,
                    ChannelEventKind::Open,
                    settings.status,
                );
            }
        }
        Backend::Closed(closed) => {
            let (settings, changed) = upsert_closed_channel(ctx, node_id, &closed)?;
            ctx.cache.remove_channel_state_from_cache(settings.channel_id);
            if changed {
                publish_channel_event(
                    ctx,
                    node_id,
                    settings.channel_id,
                    ChannelEventKind::Close,
                    settings.status,
                );
            }
        }
        Backend::Active(point) => set_channel_activity(ctx, node_id, &point, true),
        Backend::Inactive(point) => set_channel_activity(ctx, node_id, &point, false),
        Backend::PendingOpen(point) => debug!(node_id, %point, "pending open channel"),
        Backend::FullyResolved(point) => debug!(node_id, %point, "channel fully resolved"),
    }
    Ok(())
}

fn set_channel_activity<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    point: &ChannelPoint,
    active: bool,
) {
    let Some(channel_id) = ctx.registry.get_channel_id_by_channel_point(point) else {
        warn!(node_id, %point, "activity change of an unknown channel");
        return;
    };
    let (status, kind) = if active {
        (Status::Active, ChannelEventKind::Active)
    } else {
        (Status::Inactive, ChannelEventKind::Inactive)
    };
    ctx.cache.set_channel_status(node_id, channel_id, status);
    let channel_status = ctx
        .registry
        .get_channel_settings(channel_id)
        .map(|settings| settings.status)
        .unwrap_or(ChannelStatus::Open);
    publish_channel_event(ctx, node_id, channel_id, kind, channel_status);
}

/// Applies one batch of the graph topology stream.
pub fn process_graph_update<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    update: crate::backend::GraphUpdate,
) -> anyhow::Result<()> {
    for announcement in &update.node_updates {
        process_node_announcement(ctx, node_id, announcement)?;
    }
    for edge in &update.channel_updates {
        process_channel_edge_update(ctx, node_id, edge)?;
    }
    for packed in update.closed_channels {
        trace!(
            node_id,
            short_channel_id = %ShortChannelId::from_packed(packed),
            "graph channel closed"
        );
    }
    Ok(())
}

/// Stores a routing policy announced for one of our channels. Returns whether a row was
/// written; updates of channels the plane does not know are ignored.
pub fn process_channel_edge_update<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    update: &ChannelEdgeUpdate,
) -> anyhow::Result<bool> {
    let short_channel_id = (update.lnd_short_channel_id != 0)
        .then(|| ShortChannelId::from_packed(update.lnd_short_channel_id));
    let channel_point = Some(&update.channel_point);
    let Some(channel) = existing_channel(ctx, channel_point, short_channel_id.as_ref()) else {
        return Ok(false);
    };
    let announcing_node_id = ensure_node(ctx, node_id, &update.advertising_node)?;
    let connecting_node_id = ensure_node(ctx, node_id, &update.connecting_node)?;
    let outbound = announcing_node_id == node_id;
    let timestamp = now_timestamp_as_millis_u64();
    let inserted = ctx.store.insert_routing_policy(RoutingPolicyRecord {
        timestamp,
        channel_id: channel.channel_id,
        announcing_node_id,
        connecting_node_id,
        node_id,
        outbound,
        policy: update.routing_policy,
    });
    ctx.cache
        .set_routing_policy(node_id, channel.channel_id, outbound, update.routing_policy);
    if inserted {
        debug!(node_id, channel_id = channel.channel_id, outbound, "routing policy changed");
        ctx.events.routing_policy.send(RoutingPolicyEvent {
            node_id,
            channel_id: channel.channel_id,
            announcing_node_id,
            connecting_node_id,
            outbound,
            policy: update.routing_policy,
            timestamp,
        });
    }
    Ok(inserted)
}

/// Both sides of a channel as known to the graph, as two edge updates.
pub fn edge_updates(edge: &crate::backend::ChannelEdge) -> Vec<ChannelEdgeUpdate> {
    let update = |advertising: &str, connecting: &str, policy: Option<RoutingPolicy>| {
        policy.map(|routing_policy| ChannelEdgeUpdate {
            lnd_short_channel_id: edge.lnd_short_channel_id,
            channel_point: edge.channel_point.clone(),
            capacity_sat: edge.capacity_sat,
            advertising_node: advertising.to_string(),
            connecting_node: connecting.to_string(),
            routing_policy,
        })
    };
    [
        update(&edge.node1_public_key, &edge.node2_public_key, edge.node1_policy),
        update(&edge.node2_public_key, &edge.node1_public_key, edge.node2_policy),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Records a node announcement of a known node and refreshes its alias and color.
pub fn process_node_announcement<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    announcement: &NodeAnnouncement,
) -> anyhow::Result<bool> {
    let Some(observer) = ctx.registry.get_node_settings(node_id) else {
        return Ok(false);
    };
    let Some(event_node_id) = ctx.registry.get_node_id_by_public_key(
        &announcement.public_key,
        observer.key.chain,
        observer.key.network,
    ) else {
        return Ok(false);
    };
    let inserted = ctx.store.insert_node_event(NodeEventRecord {
        timestamp: now_timestamp_as_millis_u64(),
        node_id,
        event_node_id,
        announcement: announcement.clone(),
    });
    if !inserted {
        return Ok(false);
    }
    if let Some(mut settings) = ctx.registry.get_node_settings(event_node_id) {
        let alias = (!announcement.alias.is_empty()).then(|| announcement.alias.clone());
        let color = (!announcement.color.is_empty()).then(|| announcement.color.clone());
        if settings.alias != alias || settings.color != color {
            settings.alias = alias;
            settings.color = color;
            let settings = ctx.store.save_node(settings);
            ctx.registry.set_node_settings(settings);
        }
    }
    Ok(true)
}

pub fn process_htlc_event<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    event: &HtlcEvent,
) -> bool {
    ctx.store.insert_htlc_event(HtlcEventRecord {
        node_id,
        time_ms: event.timestamp_ns / 1_000_000,
        event_type: event.outcome,
        event_origin: Some(event.kind),
        incoming_channel_id: channel_id_of_packed(ctx, event.incoming_lnd_short_channel_id),
        outgoing_channel_id: channel_id_of_packed(ctx, event.outgoing_lnd_short_channel_id),
        incoming_htlc_id: Some(event.incoming_htlc_id),
        outgoing_htlc_id: Some(event.outgoing_htlc_id),
        incoming_amount_msat: event.incoming_amount_msat,
        outgoing_amount_msat: event.outgoing_amount_msat,
        failure_detail: event.failure_detail.clone(),
        cln_forward_status: None,
    })
}

/// Appends the connection history of a peer and flips the status of its channels.
pub fn process_peer_event<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    public_key: &str,
    connected: bool,
    address: Option<String>,
) -> anyhow::Result<()> {
    let peer_node_id = ensure_node(ctx, node_id, public_key)?;
    let timestamp = now_timestamp_as_millis_u64();
    let inserted = ctx.store.insert_connection_history(ConnectionHistoryRecord {
        timestamp,
        node_id,
        peer_node_id,
        connected,
        address,
    });
    let status = if connected {
        Status::Active
    } else {
        Status::Inactive
    };
    ctx.cache.set_channel_status_by_remote(node_id, peer_node_id, status);
    if inserted {
        debug!(node_id, peer_node_id, connected, "peer connection changed");
        ctx.events.peer.send(PeerEvent {
            node_id,
            peer_node_id,
            connected,
            timestamp,
        });
    }
    Ok(())
}

/// Records every listed peer as connected and every channel counterparty missing from
/// the list as disconnected.
pub fn reconcile_peers<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    peers: Vec<Peer>,
) -> anyhow::Result<()> {
    let mut connected = HashSet::new();
    for peer in peers {
        process_peer_event(ctx, node_id, &peer.public_key, true, Some(peer.address))?;
        connected.insert(peer.public_key);
    }
    let counterparties: HashSet<_> = ctx
        .registry
        .get_open_channel_ids_by_node(node_id)
        .into_iter()
        .filter_map(|channel_id| ctx.registry.get_channel_settings(channel_id))
        .filter_map(|settings| settings.remote_node_id(node_id))
        .filter_map(|remote| ctx.registry.get_node_settings(remote))
        .map(|settings| settings.key.public_key)
        .collect();
    for public_key in counterparties.difference(&connected) {
        process_peer_event(ctx, node_id, public_key, false, None)?;
    }
    Ok(())
}

fn apply_balance_update<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    channel_id: ChannelId,
    inbound: bool,
    amount_msat: u64,
    source: BalanceUpdateSource,
) {
    if let Some(event) = ctx
        .cache
        .update_balance_msat(node_id, channel_id, inbound, amount_msat, source)
    {
        ctx.events.channel_balance.send(event);
    }
}

/// Stores an invoice. A live invoice settling for the first time credits every channel
/// one of its HTLCs arrived over with that HTLC's amount.
pub fn process_invoice<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    invoice: Invoice,
    live: bool,
) -> UpsertOutcome {
    let credits: Vec<(Option<ChannelId>, u64)> = invoice
        .htlcs
        .iter()
        .map(|htlc| {
            (
                channel_id_of_packed(ctx, htlc.lnd_short_channel_id),
                htlc.amount_msat,
            )
        })
        .collect();
    let channel_id = credits.iter().find_map(|(channel_id, _)| *channel_id);
    let was_settled = ctx
        .store
        .get_invoice(node_id, &invoice.label)
        .is_some_and(|previous| previous.invoice.state == InvoiceState::Settled);
    let outcome = ctx.store.save_invoice(InvoiceRecord {
        node_id,
        channel_id,
        invoice: invoice.clone(),
        updated_on: now_timestamp_as_millis_u64(),
    });
    if outcome == UpsertOutcome::Unchanged {
        return outcome;
    }
    if live && !was_settled && invoice.state == InvoiceState::Settled {
        for (channel_id, amount_msat) in credits {
            let Some(channel_id) = channel_id else {
                continue;
            };
            apply_balance_update(
                ctx,
                node_id,
                channel_id,
                true,
                amount_msat,
                BalanceUpdateSource::Invoice,
            );
        }
    }
    ctx.events.invoice.send(InvoiceEvent {
        node_id,
        channel_id,
        label: invoice.label,
        state: invoice.state,
        amount_paid_msat: invoice.amount_paid_msat,
        timestamp: now_timestamp_as_millis_u64(),
    });
    outcome
}

/// Stores a payment. A live payment succeeding for the first time debits its first hop
/// by the amount plus fee.
pub fn process_payment<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    payment: Payment,
    live: bool,
) -> UpsertOutcome {
    let outgoing_channel_id = payment
        .outgoing_lnd_short_channel_id
        .and_then(|packed| channel_id_of_packed(ctx, packed));
    let was_succeeded = ctx
        .store
        .get_payment(node_id, &payment.payment_hash)
        .is_some_and(|previous| previous.payment.status == PaymentStatus::Succeeded);
    let outcome = ctx.store.save_payment(PaymentRecord {
        node_id,
        payment: payment.clone(),
        updated_on: now_timestamp_as_millis_u64(),
    });
    if outcome == UpsertOutcome::Unchanged {
        return outcome;
    }
    if live && !was_succeeded && payment.status == PaymentStatus::Succeeded {
        if let Some(channel_id) = outgoing_channel_id {
            apply_balance_update(
                ctx,
                node_id,
                channel_id,
                false,
                payment.value_msat + payment.fee_msat,
                BalanceUpdateSource::Payment,
            );
        }
    }
    ctx.events.payment.send(PaymentEvent {
        node_id,
        outgoing_channel_id,
        payment_hash: payment.payment_hash,
        status: payment.status,
        amount_msat: payment.value_msat,
        fee_msat: payment.fee_msat,
        timestamp: now_timestamp_as_millis_u64(),
    });
    outcome
}

/// Stores a settled forward. Returns whether it was new; a new live forward moves the
/// balances of both channels.
pub fn process_forward<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    forward: &Forward,
    live: bool,
) -> bool {
    let incoming_channel_id = channel_id_of(ctx, &forward.incoming_short_channel_id);
    let outgoing_channel_id = forward
        .outgoing_short_channel_id
        .as_deref()
        .and_then(|scid| channel_id_of(ctx, scid));
    let inserted = ctx.store.insert_forward(ForwardRecord {
        node_id,
        time_ms: forward.time_ms,
        time_ns: forward.time_ns,
        incoming_channel_id,
        outgoing_channel_id,
        incoming_amount_msat: forward.amount_in_msat,
        outgoing_amount_msat: forward.amount_out_msat,
        fee_msat: forward.fee_msat,
    });
    if !inserted {
        return false;
    }
    if live {
        if let Some(channel_id) = incoming_channel_id {
            apply_balance_update(
                ctx,
                node_id,
                channel_id,
                true,
                forward.amount_in_msat,
                BalanceUpdateSource::Forward,
            );
        }
        if let Some(channel_id) = outgoing_channel_id {
            apply_balance_update(
                ctx,
                node_id,
                channel_id,
                false,
                forward.amount_out_msat,
                BalanceUpdateSource::Forward,
            );
        }
    }
    ctx.events.forward.send(ForwardEvent {
        node_id,
        incoming_channel_id,
        outgoing_channel_id,
        forward: forward.clone(),
    });
    true
}

/// Stores a CLN forward that did not settle as an HTLC event.
pub fn process_unsettled_forward<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    forward: &Forward,
) -> bool {
    let (event_type, status) = match forward.status {
        ForwardStatus::Settled => return false,
        ForwardStatus::Offered => (HtlcOutcome::ForwardEvent, ClnForwardStatus::Offered),
        ForwardStatus::LocalFailed => {
            (HtlcOutcome::ForwardFailEvent, ClnForwardStatus::LocalFailed)
        }
        ForwardStatus::Failed => (HtlcOutcome::ForwardFailEvent, ClnForwardStatus::RemoteFailed),
    };
    ctx.store.insert_htlc_event(HtlcEventRecord {
        node_id,
        time_ms: forward.time_ms,
        event_type,
        event_origin: Some(HtlcEventKind::Forward),
        incoming_channel_id: channel_id_of(ctx, &forward.incoming_short_channel_id),
        outgoing_channel_id: forward
            .outgoing_short_channel_id
            .as_deref()
            .and_then(|scid| channel_id_of(ctx, scid)),
        incoming_htlc_id: forward.incoming_htlc_id,
        outgoing_htlc_id: forward.outgoing_htlc_id,
        incoming_amount_msat: Some(forward.amount_in_msat),
        outgoing_amount_msat: Some(forward.amount_out_msat),
        failure_detail: None,
        cln_forward_status: Some(status),
    })
}

pub fn process_transaction<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    transaction: Transaction,
) -> bool {
    ctx.store.insert_transaction(TransactionRecord {
        node_id,
        transaction,
    })
}

/// Records the tip reported by a node and publishes it when it moved forward.
pub fn process_block_height<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    block_height: u32,
) {
    let Some(node) = ctx.registry.get_node_settings(node_id) else {
        return;
    };
    let previous = ctx.registry.get_block_height(node.key.chain, node.key.network);
    if ctx
        .registry
        .set_block_height(node.key.chain, node.key.network, block_height)
        && previous != Some(block_height)
    {
        ctx.events.block.send(BlockEvent {
            node_id,
            block_height,
        });
    }
}

/// Marks a channel as fully imported so later passes skip it.
pub fn set_channel_flags<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    channel_id: ChannelId,
    flags: ChannelFlags,
) {
    if let Some(mut settings) = ctx.registry.get_channel_settings(channel_id) {
        if !settings.has_flags(flags) {
            settings.flags |= flags;
            save_channel(ctx, settings);
        }
    }
}
