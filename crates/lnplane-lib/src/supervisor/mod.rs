//! Lifecycle of every (node, service type) task.
//!
//! A service is a long-running routine implementing [`ManagedService`]. The supervisor
//! schedules it (`Pending`), and [`run_service`] drives it through `Initializing` and
//! `Active` until it is cancelled (`Inactive`), returns an error or panics (`Failed`).
//! Failed services stay failed until an operator restarts them.

pub mod state_machine;

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    events::{EventBus, ServiceEvent},
    metrics::record_service_state,
    panic_message,
    registry::{Registry, ServiceKey},
    types::{NodeConnectionDetails, NodeId, ServiceStatus, ServiceType},
    Error, Result,
};

/// Applies service transitions and reports them to the metrics sink and the event bus.
#[derive(Clone, Debug)]
pub struct ServiceReporter {
    registry: Arc<Registry>,
    events: Arc<EventBus>,
}

impl ServiceReporter {
    pub fn new(registry: Arc<Registry>, events: Arc<EventBus>) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn transition(
        &self,
        key: ServiceKey,
        to: ServiceStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let Some(entry) = self.registry.services().transition(key, to, reason)? else {
            return Ok(());
        };
        let previous = entry.previous.unwrap_or_default();
        debug!(
            service_type = %key.service_type,
            node_id = ?key.node_id,
            from = %previous,
            to = %to,
            "service transition"
        );
        record_service_state(key.service_type, key.node_id, to);
        self.events.service.send(ServiceEvent {
            service_type: key.service_type,
            node_id: key.node_id,
            previous,
            status: to,
            timestamp: entry.updated_on,
        });
        Ok(())
    }

    /// Moves a stopped service to `Inactive`. A service cancelled while `Initializing`
    /// passes through `Active` first.
    pub fn stop(&self, key: ServiceKey) -> Result<()> {
        if self.registry.services().status(key) == ServiceStatus::Initializing {
            self.transition(key, ServiceStatus::Active, Some("stopping".to_string()))?;
        }
        self.transition(key, ServiceStatus::Inactive, None)
    }

    /// Moves the service to `Failed`. Always permitted.
    pub fn fail(&self, key: ServiceKey, reason: String) {
        if let Err(err) = self.transition(key, ServiceStatus::Failed, Some(reason)) {
            error!(service_type = %key.service_type, "failed to mark service failed: {}", err);
        }
    }
}

/// What a running service can see of its own lifecycle.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    pub key: ServiceKey,
    pub token: CancellationToken,
    reporter: ServiceReporter,
}

impl ServiceContext {
    pub fn new(key: ServiceKey, token: CancellationToken, reporter: ServiceReporter) -> Self {
        Self {
            key,
            token,
            reporter,
        }
    }

    /// Zero for core services.
    pub fn node_id(&self) -> NodeId {
        self.key.node_id.unwrap_or_default()
    }

    pub fn service_type(&self) -> ServiceType {
        self.key.service_type
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.reporter.registry()
    }

    pub fn status(&self) -> ServiceStatus {
        self.registry().services().status(self.key)
    }

    /// Called after the first successful steady-state iteration; later calls are no-ops.
    pub fn mark_active(&self) {
        if let Err(err) = self
            .reporter
            .transition(self.key, ServiceStatus::Active, None)
        {
            warn!(service_type = %self.key.service_type, node_id = ?self.key.node_id, "{}", err);
        }
    }
}

/// A long-running routine supervised per (node, service type).
#[async_trait::async_trait]
pub trait ManagedService: Send + 'static {
    /// Imports historical state. Interrupted when the service is cancelled.
    async fn bootstrap(&mut self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The steady-state loop. Must call [`ServiceContext::mark_active`] after its first
    /// successful iteration and only return on error.
    async fn run(&mut self, ctx: &ServiceContext) -> anyhow::Result<()>;
}

async fn drive(
    service: &mut dyn ManagedService,
    ctx: &ServiceContext,
    reporter: &ServiceReporter,
) -> Result<ServiceStatus> {
    reporter.transition(ctx.key, ServiceStatus::Initializing, None)?;
    match ctx.token.run_until_cancelled(service.bootstrap(ctx)).await {
        None => return Ok(ServiceStatus::Inactive),
        Some(result) => result.map_err(Error::InternalError)?,
    }
    match ctx.token.run_until_cancelled(service.run(ctx)).await {
        None | Some(Ok(())) => Ok(ServiceStatus::Inactive),
        Some(Err(err)) => Err(Error::InternalError(err)),
    }
}

/// Runs a scheduled service to completion and returns its terminal status.
///
/// The service must already be `Pending`. Panics are caught here and turned into a
/// `Failed` transition.
pub async fn run_service(
    mut service: Box<dyn ManagedService>,
    ctx: ServiceContext,
    reporter: ServiceReporter,
) -> ServiceStatus {
    let key = ctx.key;
    let outcome = AssertUnwindSafe(drive(service.as_mut(), &ctx, &reporter))
        .catch_unwind()
        .await;

    let status = match outcome {
        Ok(Ok(status)) => {
            if let Err(err) = reporter.stop(key) {
                warn!(service_type = %key.service_type, node_id = ?key.node_id, "{}", err);
            }
            status
        }
        Ok(Err(err)) => {
            error!(
                service_type = %key.service_type,
                node_id = ?key.node_id,
                "service failed: {:#}", err
            );
            reporter.fail(key, err.to_string());
            ServiceStatus::Failed
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                target: "lnplane::critical",
                service_type = %key.service_type,
                node_id = ?key.node_id,
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "service panicked: {}", message
            );
            reporter.fail(key, format!("panic: {}", message));
            ServiceStatus::Failed
        }
    };
    info!(service_type = %key.service_type, node_id = ?key.node_id, %status, "terminated");
    status
}

/// Builds the routine of a node service. Returns `None` for service types it has no
/// routine for; those stay `Inactive`.
pub trait ServiceFactory: Send + Sync + 'static {
    fn create(
        &self,
        node: &NodeConnectionDetails,
        service_type: ServiceType,
    ) -> Option<Box<dyn ManagedService>>;
}

pub enum SupervisorMessage {
    /// Schedules every enabled service of a node.
    StartNode(NodeId),
    /// Cancels every service of a node.
    StopNode(NodeId),
    /// Operator-triggered restart of a failed (or inactive) service.
    RestartService(ServiceType, NodeId),
    ServiceTerminated(ServiceKey, ServiceStatus),
    GetStatus(NodeId, RpcReplyPort<Vec<(ServiceType, ServiceStatus)>>),
}

pub struct SupervisorArgs {
    pub reporter: ServiceReporter,
    pub factory: Arc<dyn ServiceFactory>,
    pub token: CancellationToken,
    pub tracker: TaskTracker,
}

pub struct SupervisorState {
    reporter: ServiceReporter,
    factory: Arc<dyn ServiceFactory>,
    token: CancellationToken,
    tracker: TaskTracker,
    node_tokens: HashMap<NodeId, CancellationToken>,
}

impl SupervisorState {
    fn node_token(&mut self, node_id: NodeId) -> CancellationToken {
        let token = &self.token;
        self.node_tokens
            .entry(node_id)
            .or_insert_with(|| token.child_token())
            .clone()
    }

    /// Failed services are only rescheduled on `restart`.
    fn schedule(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        node: &NodeConnectionDetails,
        service_type: ServiceType,
        restart: bool,
    ) {
        let key = ServiceKey::node(service_type, node.node_id);
        match self.reporter.registry().services().status(key) {
            ServiceStatus::Pending | ServiceStatus::Initializing | ServiceStatus::Active => {
                debug!(%service_type, node_id = node.node_id, "service already running");
                return;
            }
            ServiceStatus::Failed if !restart => {
                debug!(%service_type, node_id = node.node_id, "service failed, awaiting restart");
                return;
            }
            _ => {}
        }
        let Some(service) = self.factory.create(node, service_type) else {
            debug!(%service_type, node_id = node.node_id, "no routine for service type");
            return;
        };
        if let Err(err) = self
            .reporter
            .transition(key, ServiceStatus::Pending, None)
        {
            warn!(%service_type, node_id = node.node_id, "cannot schedule service: {}", err);
            return;
        }
        let ctx = ServiceContext::new(key, self.node_token(node.node_id), self.reporter.clone());
        let reporter = self.reporter.clone();
        let myself = myself.clone();
        self.tracker.spawn(async move {
            let status = run_service(service, ctx, reporter).await;
            let _ = myself.send_message(SupervisorMessage::ServiceTerminated(key, status));
        });
    }
}

pub struct SupervisorActor;

impl SupervisorActor {
    pub async fn start(
        args: SupervisorArgs,
        root_actor: ActorCell,
    ) -> Result<ActorRef<SupervisorMessage>> {
        let (actor, _handle) = Actor::spawn_linked(
            Some("supervisor_actor".to_string()),
            SupervisorActor,
            args,
            root_actor,
        )
        .await?;
        Ok(actor)
    }
}

#[async_trait::async_trait]
impl Actor for SupervisorActor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        Ok(SupervisorState {
            reporter: args.reporter,
            factory: args.factory,
            token: args.token,
            tracker: args.tracker,
            node_tokens: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::StartNode(node_id) => {
                let Some(node) = state.reporter.registry().get_connection_details(node_id) else {
                    warn!(node_id, "cannot start services of unknown node");
                    return Ok(());
                };
                info!(node_id, implementation = %node.implementation, "starting node services");
                for service_type in ServiceType::node_types(node.implementation) {
                    if service_type.is_enabled_for(node.custom_settings, node.ping_systems) {
                        state.schedule(&myself, &node, service_type, false);
                    }
                }
            }
            SupervisorMessage::StopNode(node_id) => {
                if let Some(token) = state.node_tokens.remove(&node_id) {
                    info!(node_id, "stopping node services");
                    token.cancel();
                }
            }
            SupervisorMessage::RestartService(service_type, node_id) => {
                let Some(node) = state.reporter.registry().get_connection_details(node_id) else {
                    warn!(node_id, %service_type, "cannot restart service of unknown node");
                    return Ok(());
                };
                info!(node_id, %service_type, "restarting service");
                state.schedule(&myself, &node, service_type, true);
            }
            SupervisorMessage::ServiceTerminated(key, status) => {
                debug!(
                    service_type = %key.service_type,
                    node_id = ?key.node_id,
                    %status,
                    "service task ended"
                );
            }
            SupervisorMessage::GetStatus(node_id, reply) => {
                let statuses = state
                    .reporter
                    .registry()
                    .services()
                    .node_entries(node_id)
                    .into_iter()
                    .map(|(service_type, entry)| (service_type, entry.status))
                    .collect();
                let _ = reply.send(statuses);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        for token in state.node_tokens.values() {
            token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
