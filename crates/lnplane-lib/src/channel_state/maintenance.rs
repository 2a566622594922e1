use anyhow::{anyhow, bail};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ChannelState;
use crate::{
    registry::ServiceKey,
    store::PlaneStore,
    subscribers::SubscriberContext,
    supervisor::{ManagedService, ServiceContext},
    types::{NodeId, ServiceStatus, ServiceType},
};

/// Keeps the LND channel-state snapshot of a node in sync with `ListChannels`.
pub struct ChannelBalanceCacheService<S> {
    ctx: SubscriberContext<S>,
    node_id: NodeId,
}

impl<S: PlaneStore> ChannelBalanceCacheService<S> {
    pub fn new(ctx: SubscriberContext<S>, node_id: NodeId) -> Self {
        Self { ctx, node_id }
    }

    /// Whether every stream feeding the snapshot is active.
    fn streams_active(&self) -> bool {
        let services = self.ctx.registry.services();
        ServiceType::readiness_set(crate::types::Implementation::Lnd)
            .iter()
            .filter(|service_type| !service_type.is_channel_balance_cache())
            .all(|service_type| {
                services.status(ServiceKey::node(*service_type, self.node_id))
                    == ServiceStatus::Active
            })
    }

    fn channel_event_stream_active(&self) -> bool {
        self.ctx.registry.services().status(ServiceKey::node(
            ServiceType::LndServiceChannelEventStream,
            self.node_id,
        )) == ServiceStatus::Active
    }

    /// Rebuilds the snapshot of the node. Returns `false` when skipped because the
    /// streams are not active yet.
    pub async fn sync(&self) -> anyhow::Result<bool> {
        let node_id = self.node_id;
        if !self.streams_active() {
            warn!(node_id, "channel balance cache is out-of-sync, streams are not active");
            return Ok(false);
        }
        let node = self
            .ctx
            .registry
            .get_node_settings(node_id)
            .ok_or_else(|| anyhow!("node {} is not registered", node_id))?;
        let client = self.ctx.clients.lnd.acquire(node_id).await?;
        let channels = client.list_channels().await?;

        let mut states = Vec::with_capacity(channels.len());
        for channel in &channels {
            let channel_id = self
                .ctx
                .registry
                .get_channel_id_by_channel_point(&channel.channel_point)
                .unwrap_or_default();
            if channel_id == 0 {
                bail!(
                    "channel {} of node {} is not registered",
                    channel.channel_point,
                    node_id
                );
            }
            let remote_node_id = self
                .ctx
                .registry
                .get_node_id_by_public_key(
                    &channel.remote_public_key,
                    node.key.chain,
                    node.key.network,
                )
                .unwrap_or_default();
            let local_policy = self
                .ctx
                .store
                .get_latest_routing_policy_by_announcer(channel_id, node_id)
                .map(|record| record.policy)
                .unwrap_or_default();
            let remote_policy = self
                .ctx
                .store
                .get_latest_routing_policy_by_announcer(channel_id, remote_node_id)
                .map(|record| record.policy)
                .unwrap_or_default();
            states.push(ChannelState::from_remote_channel(
                node_id,
                channel_id,
                remote_node_id,
                channel,
                local_policy,
                remote_policy,
            ));
        }
        self.ctx.cache.set_channel_states(node_id, states);
        debug!(node_id, channels = channels.len(), "channel balance cache synced");
        Ok(true)
    }
}

#[async_trait::async_trait]
impl<S: PlaneStore> ManagedService for ChannelBalanceCacheService<S> {
    async fn run(&mut self, service: &ServiceContext) -> anyhow::Result<()> {
        let mut sync_ticker = tokio::time::interval(self.ctx.settings.balance_sync_interval);
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fast_ticker = tokio::time::interval(self.ctx.settings.balance_fast_tick);
        fast_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stream_active = self.channel_event_stream_active();
        let mut synced = false;

        loop {
            let resync = tokio::select! {
                _ = sync_ticker.tick() => true,
                _ = fast_ticker.tick() => {
                    let active = self.channel_event_stream_active();
                    let reconnected = active && !stream_active;
                    stream_active = active;
                    if reconnected {
                        info!(
                            node_id = self.node_id,
                            "channel event stream reconnected, resyncing balances"
                        );
                    }
                    reconnected || (!synced && self.streams_active())
                }
            };
            if resync && self.sync().await? {
                synced = true;
                service.mark_active();
            }
        }
    }
}
