use std::str::FromStr;

use tracing::{debug, info};

use super::{processors, SubscriberContext};
use crate::{
    backend::{
        cln::{ClnChannel, ForwardQuery},
        ChannelEdgeUpdate, ForwardStatus, RemoteChannel,
    },
    channel_state::ChannelState,
    events::ChannelEventKind,
    store::{ClnForwardStatus, PlaneStore},
    types::{ChannelFlags, ChannelStatus, CustomSettings, NodeId, ShortChannelId, Status},
};

/// Forwards before 2000-01-01 are never imported.
const FORWARDS_EPOCH_MS: u64 = 946_684_800_000;

fn remote_channel(channel: &ClnChannel) -> Option<RemoteChannel> {
    let channel_point = channel.channel_point.clone()?;
    let lnd_short_channel_id = channel
        .short_channel_id
        .as_deref()
        .and_then(|scid| ShortChannelId::from_str(scid).ok())
        .map(|scid| scid.packed())
        .unwrap_or_default();
    let local_balance_sat = channel.to_us_msat / 1000;
    Some(RemoteChannel {
        channel_point,
        lnd_short_channel_id,
        remote_public_key: channel.peer_public_key.clone(),
        active: channel.peer_connected && channel.status == ChannelStatus::Open,
        private: channel.private,
        initiator: channel.opener_local,
        capacity_sat: channel.capacity_sat,
        local_balance_sat,
        remote_balance_sat: channel.capacity_sat.saturating_sub(local_balance_sat),
        commit_fee_sat: 0,
        commit_weight: 0,
        fee_per_kw: 0,
        unsettled_balance_sat: 0,
        total_sent_sat: 0,
        total_received_sat: 0,
        num_updates: 0,
        lifetime: 0,
        local_reserve_sat: 0,
        remote_reserve_sat: 0,
        local_dust_limit_sat: 0,
        remote_dust_limit_sat: 0,
        pending_htlcs: channel.htlcs.clone(),
    })
}

/// Lists the peer channels, refreshes their rows and policies and replaces the cached
/// channel states of the node.
pub async fn poll_channels<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let node = ctx
        .registry
        .get_node_settings(node_id)
        .ok_or_else(|| anyhow::anyhow!("node {} is not registered", node_id))?;
    let client = ctx.clients.cln.acquire(node_id).await?;
    let channels = client.list_peer_channels().await?;

    let mut states = Vec::new();
    for channel in &channels {
        if channel.status.is_closed() {
            continue;
        }
        let Some(remote) = remote_channel(channel) else {
            debug!(node_id, peer = channel.peer_public_key, "channel without funding outpoint");
            continue;
        };
        let (settings, opened) = processors::upsert_open_channel(ctx, node_id, &remote)?;
        if opened {
            processors::publish_channel_event(
                ctx,
                node_id,
                settings.channel_id,
                ChannelEventKind::Open,
                settings.status,
            );
        }

        let sides = [
            (&node.key.public_key, &channel.peer_public_key, channel.local_policy),
            (&channel.peer_public_key, &node.key.public_key, channel.remote_policy),
        ];
        for (advertising, connecting, policy) in sides {
            let Some(routing_policy) = policy else {
                continue;
            };
            processors::process_channel_edge_update(
                ctx,
                node_id,
                &ChannelEdgeUpdate {
                    lnd_short_channel_id: remote.lnd_short_channel_id,
                    channel_point: remote.channel_point.clone(),
                    capacity_sat: remote.capacity_sat,
                    advertising_node: advertising.clone(),
                    connecting_node: connecting.clone(),
                    routing_policy,
                },
            )?;
        }

        let remote_node_id = settings.remote_node_id(node_id).unwrap_or_default();
        let capacity_msat = channel.capacity_sat * 1000;
        let htlc_msat: u64 = channel.htlcs.iter().map(|htlc| htlc.amount_msat).sum();
        let mut state = ChannelState {
            node_id,
            channel_id: settings.channel_id,
            remote_node_id,
            status: if remote.active {
                Status::Active
            } else {
                Status::Inactive
            },
            private: channel.private,
            initiator: channel.opener_local,
            capacity_msat,
            local_balance_msat: channel.to_us_msat,
            remote_balance_msat: capacity_msat
                .saturating_sub(channel.to_us_msat)
                .saturating_sub(htlc_msat),
            local_routing_policy: channel.local_policy.unwrap_or_default(),
            remote_routing_policy: channel.remote_policy.unwrap_or_default(),
            balance_tolerance_msat: None,
            ..Default::default()
        };
        state.set_pending_htlcs(channel.htlcs.clone());
        states.push(state);
    }
    ctx.cache.set_channel_states(node_id, states);
    Ok(())
}

pub async fn poll_closed_channels<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    for closed in client.list_closed_channels().await? {
        let (settings, changed) = processors::upsert_closed_channel(ctx, node_id, &closed)?;
        ctx.cache.remove_channel_state_from_cache(settings.channel_id);
        if changed {
            processors::publish_channel_event(
                ctx,
                node_id,
                settings.channel_id,
                ChannelEventKind::Close,
                settings.status,
            );
        }
    }
    Ok(())
}

pub async fn poll_peers<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    let peers = client.list_connected_peers().await?;
    processors::reconcile_peers(ctx, node_id, peers)
}

/// Refreshes the cached balances from `listfunds`. Channels shutting down turn inactive.
pub async fn poll_funds<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    for funds in client.list_funds().await? {
        let channel_id = funds
            .channel_point
            .as_ref()
            .and_then(|point| ctx.registry.get_channel_id_by_channel_point(point))
            .or_else(|| {
                funds
                    .short_channel_id
                    .as_deref()
                    .and_then(|scid| processors::channel_id_of(ctx, scid))
            });
        let Some(channel_id) = channel_id else {
            continue;
        };
        if funds.shutting_down {
            ctx.cache.set_channel_status(node_id, channel_id, Status::Inactive);
            continue;
        }
        if let (Some(ours), Some(total)) = (funds.our_amount_msat, funds.amount_msat) {
            ctx.cache
                .set_balances_msat(node_id, channel_id, ours, total.saturating_sub(ours));
        }
    }
    Ok(())
}

pub async fn poll_nodes<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    let mut updated = 0;
    for announcement in client.list_nodes().await? {
        if processors::process_node_announcement(ctx, node_id, &announcement)? {
            updated += 1;
        }
    }
    if updated > 0 {
        debug!(node_id, updated, "node announcements updated");
    }
    Ok(())
}

pub async fn poll_transactions<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    for transaction in client.list_transactions().await? {
        processors::process_transaction(ctx, node_id, transaction);
    }
    Ok(())
}

pub async fn poll_invoices<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    live: bool,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    for invoice in client.list_invoices().await? {
        processors::process_invoice(ctx, node_id, invoice, live);
    }
    Ok(())
}

pub async fn poll_payments<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    live: bool,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    let settings = processors::custom_settings(ctx, node_id);
    for payment in client.list_payments().await? {
        if processors::wanted_payment(settings, &payment) {
            processors::process_payment(ctx, node_id, payment, live);
        }
    }
    Ok(())
}

fn cln_forward_status(status: ForwardStatus) -> Option<ClnForwardStatus> {
    match status {
        ForwardStatus::Settled => None,
        ForwardStatus::Offered => Some(ClnForwardStatus::Offered),
        ForwardStatus::LocalFailed => Some(ClnForwardStatus::LocalFailed),
        ForwardStatus::Failed => Some(ClnForwardStatus::RemoteFailed),
    }
}

/// Imports forwards channel by channel, in both directions. Settled forwards go to the
/// forward table; with HTLC events enabled the other statuses go to the HTLC event table.
/// Channels that reached a final closed status are flagged once imported.
pub async fn import_forwards<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.cln.acquire(node_id).await?;
    let import_htlc_events =
        processors::custom_settings(ctx, node_id).contains(CustomSettings::IMPORT_HTLC_EVENTS);
    let mut statuses = vec![ForwardStatus::Settled];
    if import_htlc_events {
        statuses.extend([
            ForwardStatus::Offered,
            ForwardStatus::LocalFailed,
            ForwardStatus::Failed,
        ]);
    }

    let (mut forwards, mut htlc_events) = (0, 0);
    for channel_id in ctx.registry.get_channel_ids_by_node(node_id) {
        let Some(settings) = ctx.registry.get_channel_settings(channel_id) else {
            continue;
        };
        if settings.has_flags(ChannelFlags::IMPORTED_FORWARDS) {
            continue;
        }
        let Some(short_channel_id) = settings.short_channel_id.map(|scid| scid.to_string()) else {
            continue;
        };
        for incoming in [true, false] {
            for status in &statuses {
                let cln_status = cln_forward_status(*status);
                let cursor = match cln_status {
                    None => ctx
                        .store
                        .get_latest_forward_time(node_id, Some((channel_id, incoming))),
                    Some(cln_status) => ctx.store.get_latest_cln_htlc_event_time(
                        node_id,
                        channel_id,
                        incoming,
                        cln_status,
                    ),
                }
                .unwrap_or(FORWARDS_EPOCH_MS);
                let query = ForwardQuery {
                    in_channel: incoming.then(|| short_channel_id.clone()),
                    out_channel: (!incoming).then(|| short_channel_id.clone()),
                    status: *status,
                };
                for forward in client.list_forwards(&query).await? {
                    if forward.time_ms < cursor {
                        continue;
                    }
                    if cln_status.is_none() {
                        if processors::process_forward(ctx, node_id, &forward, false) {
                            forwards += 1;
                        }
                    } else if processors::process_unsettled_forward(ctx, node_id, &forward) {
                        htlc_events += 1;
                    }
                }
            }
        }
        if settings.status.is_final() {
            let mut flags = ChannelFlags::IMPORTED_FORWARDS;
            if import_htlc_events {
                flags |= ChannelFlags::IMPORTED_HTLC_EVENTS;
            }
            processors::set_channel_flags(ctx, channel_id, flags);
        }
    }
    if forwards > 0 || htlc_events > 0 {
        info!(node_id, forwards, htlc_events, "imported forwards");
    }
    Ok(())
}
