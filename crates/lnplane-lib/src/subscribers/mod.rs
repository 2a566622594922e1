//! Routines importing what the daemons report into the store, the channel-state cache
//! and the event bus.
//!
//! LND pushes most of its data over long-lived streams, CLN is polled. Either way a
//! subscriber first imports history (`bootstrap`), then follows the daemon until it is
//! cancelled. Events of one stream are applied in the order they are received.

mod cln;
mod lnd;
pub mod processors;

use std::{future::Future, sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::time::MissedTickBehavior;

use crate::{
    backend::{BackendError, EventStream},
    channel_state::{maintenance::ChannelBalanceCacheService, ChannelStateCache},
    connection::Clients,
    events::EventBus,
    rebalancer::RebalanceService,
    registry::Registry,
    store::PlaneStore,
    supervisor::{ManagedService, ServiceContext, ServiceFactory},
    types::{NodeConnectionDetails, NodeId, ServiceType},
    PlaneConfig,
};

#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub funds_interval: Duration,
    /// Channels, closed channels and peers.
    pub channels_interval: Duration,
    /// Nodes, forwards, invoices, payments and transactions.
    pub slow_interval: Duration,
    pub lnd_forwards_interval: Duration,
    pub in_flight_payments_interval: Duration,
    pub balance_sync_interval: Duration,
    pub balance_fast_tick: Duration,
    pub forward_batch_size: u32,
    pub list_batch_size: u64,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            funds_interval: Duration::from_secs(10),
            channels_interval: Duration::from_secs(60),
            slow_interval: Duration::from_secs(15 * 60),
            lnd_forwards_interval: Duration::from_secs(10),
            in_flight_payments_interval: Duration::from_secs(60),
            balance_sync_interval: Duration::from_secs(150),
            balance_fast_tick: Duration::from_secs(10),
            forward_batch_size: 50_000,
            list_batch_size: 1_000,
        }
    }
}

impl SubscriberSettings {
    pub fn from_config(config: &PlaneConfig) -> Self {
        Self {
            balance_sync_interval: config.balance_sync_interval(),
            balance_fast_tick: config.balance_fast_tick(),
            ..Default::default()
        }
    }
}

/// Everything a subscriber reads or writes.
#[derive(Debug, Clone)]
pub struct SubscriberContext<S> {
    pub registry: Arc<Registry>,
    pub cache: Arc<ChannelStateCache>,
    pub store: S,
    pub events: Arc<EventBus>,
    pub clients: Clients,
    pub settings: SubscriberSettings,
}

impl<S: PlaneStore> SubscriberContext<S> {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<ChannelStateCache>,
        store: S,
        events: Arc<EventBus>,
        clients: Clients,
        settings: SubscriberSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
            events,
            clients,
            settings,
        }
    }
}

/// Next item of a daemon stream. A stream ending is an error: the daemon went away.
pub(crate) async fn next_event<T>(stream: &mut EventStream<T>) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(event)) => Ok(event),
        Some(Err(err)) => Err(err.into()),
        None => Err(BackendError::StreamClosed.into()),
    }
}

/// Runs `tick` immediately and then every `period`, marking the service active after
/// the first successful pass.
pub(crate) async fn poll<F, Fut>(
    service: &ServiceContext,
    period: Duration,
    mut tick: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tick().await?;
        service.mark_active();
    }
}

/// The routine of one (node, service type).
pub struct Subscriber<S> {
    ctx: SubscriberContext<S>,
    node_id: NodeId,
    service_type: ServiceType,
}

impl<S: PlaneStore> Subscriber<S> {
    pub fn new(ctx: SubscriberContext<S>, node_id: NodeId, service_type: ServiceType) -> Self {
        Self {
            ctx,
            node_id,
            service_type,
        }
    }
}

#[async_trait::async_trait]
impl<S: PlaneStore> ManagedService for Subscriber<S> {
    async fn bootstrap(&mut self, _service: &ServiceContext) -> anyhow::Result<()> {
        let (ctx, node_id) = (&self.ctx, self.node_id);
        match self.service_type {
            ServiceType::LndServiceChannelEventStream => lnd::import_channels(ctx, node_id).await,
            ServiceType::LndServiceGraphEventStream => lnd::import_graph(ctx, node_id).await,
            ServiceType::LndServicePeerEventStream => lnd::import_peers(ctx, node_id).await,
            ServiceType::LndServiceInvoiceStream => lnd::import_invoices(ctx, node_id, false).await,
            ServiceType::LndServiceTransactionStream => {
                lnd::import_transactions(ctx, node_id).await
            }
            ServiceType::LndServiceForwardsService => {
                lnd::import_forwards(ctx, node_id, false).await
            }
            ServiceType::LndServicePaymentsService => {
                lnd::import_payments(ctx, node_id, false).await
            }
            ServiceType::ClnServiceChannelsService => cln::poll_channels(ctx, node_id).await,
            ServiceType::ClnServiceClosedChannelsService => {
                cln::poll_closed_channels(ctx, node_id).await
            }
            ServiceType::ClnServiceNodesService => cln::poll_nodes(ctx, node_id).await,
            ServiceType::ClnServiceTransactionsService => {
                cln::poll_transactions(ctx, node_id).await
            }
            ServiceType::ClnServiceForwardsService => cln::import_forwards(ctx, node_id).await,
            ServiceType::ClnServiceInvoicesService => cln::poll_invoices(ctx, node_id, false).await,
            ServiceType::ClnServicePaymentsService => cln::poll_payments(ctx, node_id, false).await,
            _ => Ok(()),
        }
    }

    async fn run(&mut self, service: &ServiceContext) -> anyhow::Result<()> {
        let (ctx, node_id) = (&self.ctx, self.node_id);
        let settings = &ctx.settings;
        match self.service_type {
            ServiceType::LndServiceChannelEventStream => {
                lnd::follow_channel_events(ctx, node_id, service).await
            }
            ServiceType::LndServiceGraphEventStream => {
                lnd::follow_graph(ctx, node_id, service).await
            }
            ServiceType::LndServiceHtlcEventStream => {
                lnd::follow_htlc_events(ctx, node_id, service).await
            }
            ServiceType::LndServicePeerEventStream => {
                lnd::follow_peer_events(ctx, node_id, service).await
            }
            ServiceType::LndServiceInvoiceStream => {
                lnd::follow_invoices(ctx, node_id, service).await
            }
            ServiceType::LndServiceTransactionStream => {
                lnd::follow_transactions(ctx, node_id, service).await
            }
            ServiceType::LndServicePaymentsService => {
                lnd::follow_payments(ctx, node_id, service).await
            }
            ServiceType::LndServiceForwardsService => {
                poll(service, settings.lnd_forwards_interval, || {
                    lnd::import_forwards(ctx, node_id, true)
                })
                .await
            }
            ServiceType::LndServiceInFlightPaymentsService => {
                poll(service, settings.in_flight_payments_interval, || {
                    lnd::refresh_in_flight_payments(ctx, node_id)
                })
                .await
            }
            ServiceType::ClnServiceChannelsService => {
                poll(service, settings.channels_interval, || cln::poll_channels(ctx, node_id)).await
            }
            ServiceType::ClnServiceClosedChannelsService => {
                poll(service, settings.channels_interval, || {
                    cln::poll_closed_channels(ctx, node_id)
                })
                .await
            }
            ServiceType::ClnServicePeersService => {
                poll(service, settings.channels_interval, || cln::poll_peers(ctx, node_id)).await
            }
            ServiceType::ClnServiceFundsService => {
                poll(service, settings.funds_interval, || cln::poll_funds(ctx, node_id)).await
            }
            ServiceType::ClnServiceNodesService => {
                poll(service, settings.slow_interval, || cln::poll_nodes(ctx, node_id)).await
            }
            ServiceType::ClnServiceTransactionsService => {
                poll(service, settings.slow_interval, || {
                    cln::poll_transactions(ctx, node_id)
                })
                .await
            }
            ServiceType::ClnServiceForwardsService => {
                poll(service, settings.slow_interval, || cln::import_forwards(ctx, node_id)).await
            }
            ServiceType::ClnServiceInvoicesService => {
                poll(service, settings.slow_interval, || {
                    cln::poll_invoices(ctx, node_id, true)
                })
                .await
            }
            ServiceType::ClnServicePaymentsService => {
                poll(service, settings.slow_interval, || {
                    cln::poll_payments(ctx, node_id, true)
                })
                .await
            }
            other => anyhow::bail!("{} has no subscriber routine", other),
        }
    }
}

/// Builds the routine of every node service type the plane knows how to run.
pub struct SubscriberFactory<S> {
    ctx: SubscriberContext<S>,
}

impl<S: PlaneStore> SubscriberFactory<S> {
    pub fn new(ctx: SubscriberContext<S>) -> Self {
        Self { ctx }
    }
}

impl<S: PlaneStore> ServiceFactory for SubscriberFactory<S> {
    fn create(
        &self,
        node: &NodeConnectionDetails,
        service_type: ServiceType,
    ) -> Option<Box<dyn ManagedService>> {
        let ctx = self.ctx.clone();
        match service_type {
            ServiceType::LndServiceChannelBalanceCacheService => {
                Some(Box::new(ChannelBalanceCacheService::new(ctx, node.node_id)))
            }
            ServiceType::LndServiceRebalanceService => Some(Box::new(RebalanceService)),
            // External ping services are declared only.
            ServiceType::LndServiceVectorService
            | ServiceType::LndServiceAmbossService
            | ServiceType::ClnServiceVectorService
            | ServiceType::ClnServiceAmbossService => None,
            service_type if service_type.implementation().is_some() => {
                Some(Box::new(Subscriber::new(ctx, node.node_id, service_type)))
            }
            _ => None,
        }
    }
}
