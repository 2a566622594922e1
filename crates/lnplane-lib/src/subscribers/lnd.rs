use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{next_event, processors, SubscriberContext};
use crate::{
    backend::{HtlcOutcome, PaymentStatus},
    now_timestamp_as_millis_u64,
    store::PlaneStore,
    supervisor::ServiceContext,
    types::{CustomSettings, NodeId},
};

pub async fn import_channels<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let info = client.get_information().await?;
    processors::process_block_height(ctx, node_id, info.block_height);

    let channels = client.list_channels().await?;
    for channel in &channels {
        processors::upsert_open_channel(ctx, node_id, channel)?;
    }
    let closed = client.closed_channels().await?;
    for channel in &closed {
        let (settings, _) = processors::upsert_closed_channel(ctx, node_id, channel)?;
        ctx.cache.remove_channel_state_from_cache(settings.channel_id);
    }
    info!(
        node_id,
        open = channels.len(),
        closed = closed.len(),
        "imported channels"
    );
    Ok(())
}

pub async fn follow_channel_events<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut stream = client.subscribe_channel_events().await?;
    service.mark_active();
    loop {
        let event = next_event(&mut stream).await?;
        processors::process_channel_event(ctx, node_id, event)?;
    }
}

/// Imports the routing policies of both sides of every open channel and the
/// announcements of the nodes at their ends.
pub async fn import_graph<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut public_keys = HashSet::new();
    if let Some(node) = ctx.registry.get_node_settings(node_id) {
        public_keys.insert(node.key.public_key);
    }
    for channel_id in ctx.registry.get_open_channel_ids_by_node(node_id) {
        let Some(settings) = ctx.registry.get_channel_settings(channel_id) else {
            continue;
        };
        let Some(packed) = settings.lnd_short_channel_id() else {
            continue;
        };
        let edge = client.get_channel_edge(packed).await?;
        for update in processors::edge_updates(&edge) {
            processors::process_channel_edge_update(ctx, node_id, &update)?;
        }
        public_keys.insert(edge.node1_public_key);
        public_keys.insert(edge.node2_public_key);
    }
    for public_key in public_keys {
        match client.get_node_announcement(&public_key).await {
            Ok(announcement) => {
                processors::process_node_announcement(ctx, node_id, &announcement)?;
            }
            Err(err) => warn!(node_id, public_key, "no node announcement: {}", err),
        }
    }
    Ok(())
}

pub async fn follow_graph<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut stream = client.subscribe_channel_graph().await?;
    service.mark_active();
    loop {
        let update = next_event(&mut stream).await?;
        processors::process_graph_update(ctx, node_id, update)?;
    }
}

pub async fn follow_htlc_events<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut stream = client.subscribe_htlc_events().await?;
    service.mark_active();
    loop {
        let event = next_event(&mut stream).await?;
        if event.outcome == HtlcOutcome::SubscribedEvent {
            continue;
        }
        processors::process_htlc_event(ctx, node_id, &event);
    }
}

pub async fn import_peers<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let peers = client.list_peers().await?;
    processors::reconcile_peers(ctx, node_id, peers)
}

pub async fn follow_peer_events<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut stream = client.subscribe_peer_events().await?;
    service.mark_active();
    loop {
        let event = next_event(&mut stream).await?;
        processors::process_peer_event(ctx, node_id, &event.public_key, event.online, None)?;
    }
}

/// Pages through the invoices added after the latest stored one.
pub async fn import_invoices<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    live: bool,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let (mut add_index, _) = ctx.store.get_max_invoice_indexes(node_id);
    let batch_size = ctx.settings.list_batch_size;
    loop {
        let invoices = client.list_invoices(add_index, batch_size).await?;
        let count = invoices.len() as u64;
        for invoice in invoices {
            add_index = add_index.max(invoice.add_index);
            processors::process_invoice(ctx, node_id, invoice, live);
        }
        if count < batch_size {
            break;
        }
    }
    debug!(node_id, add_index, "imported invoices");
    Ok(())
}

pub async fn follow_invoices<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let (add_index, settle_index) = ctx.store.get_max_invoice_indexes(node_id);
    let mut stream = client.subscribe_invoices(add_index, settle_index).await?;
    service.mark_active();
    loop {
        let invoice = next_event(&mut stream).await?;
        processors::process_invoice(ctx, node_id, invoice, true);
    }
}

pub async fn import_transactions<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let start_height = ctx
        .store
        .get_max_transaction_block_height(node_id)
        .unwrap_or_default();
    let mut inserted = 0;
    for transaction in client.get_transactions(start_height).await? {
        if processors::process_transaction(ctx, node_id, transaction) {
            inserted += 1;
        }
    }
    debug!(node_id, start_height, inserted, "imported transactions");
    Ok(())
}

pub async fn follow_transactions<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let mut stream = client.subscribe_transactions().await?;
    service.mark_active();
    loop {
        let transaction = next_event(&mut stream).await?;
        processors::process_transaction(ctx, node_id, transaction);
    }
}

/// Imports the forwarding history since the latest stored forward. Without a stored
/// forward the history starts now, unless historic forwards are requested.
pub async fn import_forwards<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    live: bool,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let start_time_ms = match ctx.store.get_latest_forward_time(node_id, None) {
        Some(time_ms) => time_ms,
        None if processors::custom_settings(ctx, node_id)
            .contains(CustomSettings::IMPORT_HISTORIC_FORWARDS) =>
        {
            0
        }
        None => now_timestamp_as_millis_u64(),
    };
    let batch_size = ctx.settings.forward_batch_size;
    let mut index_offset = 0;
    let mut inserted = 0;
    loop {
        let forwards = client
            .forwarding_history(start_time_ms, index_offset, batch_size)
            .await?;
        let count = forwards.len() as u32;
        for forward in &forwards {
            if processors::process_forward(ctx, node_id, forward, live) {
                inserted += 1;
            }
        }
        if count < batch_size {
            break;
        }
        index_offset += count;
    }
    if inserted > 0 {
        debug!(node_id, inserted, "imported forwards");
    }
    Ok(())
}

/// Pages through the payments after the latest stored index.
pub async fn import_payments<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    live: bool,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let settings = processors::custom_settings(ctx, node_id);
    let mut index_offset = ctx.store.get_max_payment_index(node_id);
    let batch_size = ctx.settings.list_batch_size;
    loop {
        let payments = client.list_payments(index_offset, batch_size).await?;
        let count = payments.len() as u64;
        for payment in payments {
            index_offset = index_offset.max(payment.payment_index);
            if processors::wanted_payment(settings, &payment) {
                processors::process_payment(ctx, node_id, payment, live);
            }
        }
        if count < batch_size {
            break;
        }
    }
    Ok(())
}

pub async fn follow_payments<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
    service: &ServiceContext,
) -> anyhow::Result<()> {
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let settings = processors::custom_settings(ctx, node_id);
    let mut stream = client.track_payments().await?;
    service.mark_active();
    loop {
        let payment = next_event(&mut stream).await?;
        if processors::wanted_payment(settings, &payment) {
            processors::process_payment(ctx, node_id, payment, true);
        }
    }
}

/// Re-lists payments from the oldest one still in flight so their final status lands.
pub async fn refresh_in_flight_payments<S: PlaneStore>(
    ctx: &SubscriberContext<S>,
    node_id: NodeId,
) -> anyhow::Result<()> {
    let Some(oldest) = ctx
        .store
        .get_payments(node_id)
        .into_iter()
        .filter(|record| record.payment.status == PaymentStatus::InFlight)
        .map(|record| record.payment.payment_index)
        .min()
    else {
        return Ok(());
    };
    let client = ctx.clients.lnd.acquire(node_id).await?;
    let settings = processors::custom_settings(ctx, node_id);
    let batch_size = ctx.settings.list_batch_size;
    let mut index_offset = oldest.saturating_sub(1);
    loop {
        let payments = client.list_payments(index_offset, batch_size).await?;
        let count = payments.len() as u64;
        for payment in payments {
            index_offset = index_offset.max(payment.payment_index);
            if processors::wanted_payment(settings, &payment) {
                processors::process_payment(ctx, node_id, payment, true);
            }
        }
        if count < batch_size {
            break;
        }
    }
    Ok(())
}
