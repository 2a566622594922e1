use std::fmt::Debug;
use std::sync::Arc;

use lnplane::actors::RootActor;
use lnplane::backend::{GrpcClnConnector, GrpcLndConnector};
use lnplane::channel_state::ChannelStateCache;
use lnplane::commands::{CommandBus, CommandSettings};
use lnplane::connection::{Clients, ConnectionPool};
use lnplane::events::EventBus;
use lnplane::metrics::start_metrics;
use lnplane::rebalancer::Rebalancer;
use lnplane::registry::{Registry, ServiceKey};
use lnplane::store::{NodeStore, Store};
use lnplane::subscribers::{SubscriberContext, SubscriberFactory, SubscriberSettings};
use lnplane::supervisor::{ServiceReporter, SupervisorActor, SupervisorArgs, SupervisorMessage};
use lnplane::tasks::{
    cancel_tasks_and_wait_for_completion, new_tokio_cancellation_token, new_tokio_task_tracker,
};
use lnplane::types::{ServiceStatus, ServiceType};
use lnplane::workflow::engine::WorkflowEngine;
use lnplane::workflow::triggers::{WorkflowTriggerActor, WorkflowTriggerArgs, DEFAULT_CRON_TICK};
use lnplane::load_config;
use tracing::{debug, info, info_span, warn};
use tracing_subscriber::{field::MakeExt, fmt, fmt::format, EnvFilter};

/// Core services whose lifetime is the lifetime of the process.
const CORE_SERVICES: [ServiceType; 6] = [
    ServiceType::RootService,
    ServiceType::AutomationIntervalTriggerService,
    ServiceType::AutomationChannelBalanceEventTriggerService,
    ServiceType::AutomationChannelEventTriggerService,
    ServiceType::AutomationScheduledTriggerService,
    ServiceType::CronService,
];

pub struct ExitMessage(String);

#[tokio::main]
pub async fn main() -> Result<(), ExitMessage> {
    // ractor sets "id" for each actor, map it with the plane prefix
    let node_formatter = format::debug_fn(|writer, field, value| {
        let prefix = if field.name() == "id" {
            let r = lnplane::get_node_prefix();
            if !r.is_empty() {
                format!(" on {}", r)
            } else {
                "".to_string()
            }
        } else {
            "".to_string()
        };
        write!(writer, "{}: {:?}{}", field, value, prefix)
    })
    .delimited(", ");
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .fmt_fields(node_formatter)
        .try_init()
        .map_err(|err| ExitMessage(format!("failed to initialize logger: {}", err)))?;

    info!("Starting lnplane {}", env!("CARGO_PKG_VERSION"));
    let _span = info_span!("plane", prefix = lnplane::get_node_prefix()).entered();

    let config = load_config().map_err(ExitMessage)?;
    config
        .plane
        .create_base_dir()
        .map_err(|err| ExitMessage(format!("failed to create base dir: {}", err)))?;

    if let Some(metrics_addr) = config.plane.metrics_addr.as_deref() {
        start_metrics(metrics_addr)
            .map_err(|err| ExitMessage(format!("failed to start metrics exporter: {}", err)))?;
        info!("metrics exporter listening on {}", metrics_addr);
    }

    let store = Store::new(config.plane.store_path()).map_err(ExitMessage)?;

    let registry = Arc::new(Registry::new());
    let base_dir = config.plane.base_dir();
    for node in &config.nodes {
        store.save_node(node.node_settings());
    }
    registry.load(&store);
    for node in &config.nodes {
        let details = node
            .connection_details(&base_dir)
            .map_err(|err| ExitMessage(format!("node {}: {}", node.name, err)))?;
        registry.set_connection_details(details);
    }
    info!(nodes = config.nodes.len(), "managed nodes registered");

    let cache = Arc::new(ChannelStateCache::default());
    let events = EventBus::new();
    let reporter = ServiceReporter::new(registry.clone(), events.clone());
    let clients = Clients::new(
        Arc::new(ConnectionPool::new(GrpcLndConnector, registry.clone())),
        Arc::new(ConnectionPool::new(GrpcClnConnector, registry.clone())),
    );

    let tracker = new_tokio_task_tracker();
    let token = new_tokio_cancellation_token();
    let root_actor = RootActor::start(tracker.clone(), token.clone())
        .await
        .map_err(|err| ExitMessage(format!("failed to start root actor: {}", err)))?;

    for service_type in CORE_SERVICES {
        mark_core_service(
            &reporter,
            service_type,
            &[ServiceStatus::Pending, ServiceStatus::Initializing],
        );
    }

    let commands = CommandBus::new(
        registry.clone(),
        cache.clone(),
        store.clone(),
        clients.clone(),
        CommandSettings::from_config(&config.plane),
    )
    .with_token(token.clone());

    let subscriber_ctx = SubscriberContext::new(
        registry.clone(),
        cache.clone(),
        store.clone(),
        events.clone(),
        clients,
        SubscriberSettings::from_config(&config.plane),
    );
    let supervisor = SupervisorActor::start(
        SupervisorArgs {
            reporter: reporter.clone(),
            factory: Arc::new(SubscriberFactory::new(subscriber_ctx)),
            token: token.clone(),
            tracker: tracker.clone(),
        },
        root_actor.get_cell(),
    )
    .await
    .map_err(|err| ExitMessage(format!("failed to start supervisor: {}", err)))?;
    for node_id in registry.get_managed_node_ids() {
        if registry.get_connection_details(node_id).is_none() {
            warn!(node_id, "managed node without connection details, not starting");
            continue;
        }
        supervisor
            .send_message(SupervisorMessage::StartNode(node_id))
            .map_err(|err| ExitMessage(format!("supervisor is gone: {}", err)))?;
    }

    let rebalancer = Arc::new(Rebalancer::new(commands.clone(), tracker.clone(), token.clone()));
    let engine = Arc::new(WorkflowEngine::new(cache, store, commands, rebalancer));
    WorkflowTriggerActor::start(
        WorkflowTriggerArgs {
            engine,
            events,
            tracker: tracker.clone(),
            token: token.clone(),
            cron_tick: DEFAULT_CRON_TICK,
        },
        root_actor.get_cell(),
    )
    .await
    .map_err(|err| ExitMessage(format!("failed to start workflow triggers: {}", err)))?;

    for service_type in CORE_SERVICES {
        mark_core_service(&reporter, service_type, &[ServiceStatus::Active]);
    }
    info!("lnplane started");

    signal_listener().await;

    for service_type in CORE_SERVICES {
        mark_core_service(&reporter, service_type, &[ServiceStatus::Inactive]);
    }
    info!("stopping services");
    cancel_tasks_and_wait_for_completion().await;
    debug!("all tasks finished");
    Ok(())
}

fn mark_core_service(
    reporter: &ServiceReporter,
    service_type: ServiceType,
    steps: &[ServiceStatus],
) {
    for status in steps {
        if let Err(err) = reporter.transition(ServiceKey::core(service_type), *status, None) {
            warn!(%service_type, "cannot move core service to {:?}: {}", status, err);
        }
    }
}

impl Debug for ExitMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Exit because {}", self.0)
    }
}

#[cfg(target_family = "unix")]
async fn signal_listener() {
    use tokio::signal::unix::{signal, SignalKind};
    // SIGTERM is commonly sent for graceful shutdown of applications,
    // followed by 30 seconds of grace time, then a SIGKILL.
    let mut sigterm = signal(SignalKind::terminate()).expect("listen for SIGTERM");
    // SIGINT is usually sent due to ctrl-c in the terminal.
    let mut sigint = signal(SignalKind::interrupt()).expect("listen for SIGINT");

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    };
}

#[cfg(not(target_family = "unix"))]
async fn signal_listener() {
    tokio::signal::ctrl_c()
        .await
        .expect("listen for Ctrl-c signal");
    info!("Ctrl-c received, shutting down");
}
