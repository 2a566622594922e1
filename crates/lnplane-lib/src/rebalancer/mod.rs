//! Circular self-payments that move liquidity into (or out of) a focal channel.
//!
//! One controller runs per `(origin, origin id, focal channel)`. Workflows submit batches
//! through [`RebalanceDispatcher`] and reap the controllers their latest run no longer
//! asks for.


use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    backend::PaymentStatus,
    commands::{
        types::{NewInvoiceRequest, NewPaymentRequest},
        CommandBus,
    },
    registry::{read_lock, write_lock, Registry},
    store::PlaneStore,
    supervisor::{ManagedService, ServiceContext},
    types::{ChannelId, NodeId},
    Error, Result,
};

pub const DEFAULT_MAXIMUM_CONCURRENCY: u32 = 1;
pub const PAYMENT_TIMEOUT_SECONDS: u32 = 60;
/// How long the final response of a controller stays readable.
pub const RESULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum RebalanceOrigin {
    Manual,
    WorkflowNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceRequest {
    pub origin: RebalanceOrigin,
    pub origin_id: u32,
    pub origin_reference: String,
    pub node_id: NodeId,
    /// Zero when the outgoing channel is the focal one.
    pub incoming_channel_id: ChannelId,
    /// Zero when the incoming channel is the focal one.
    pub outgoing_channel_id: ChannelId,
    /// Candidates on the unfocused side.
    pub channel_ids: Vec<ChannelId>,
    pub amount_msat: u64,
    pub maximum_cost_msat: u64,
    pub maximum_concurrency: u32,
    /// JSON list of the workflow nodes that produced the unfocused side.
    pub workflow_unfocused_path: String,
}

impl RebalanceRequest {
    pub fn focal_channel_id(&self) -> ChannelId {
        if self.incoming_channel_id != 0 {
            self.incoming_channel_id
        } else {
            self.outgoing_channel_id
        }
    }

    pub fn key(&self) -> RebalancerKey {
        RebalancerKey {
            origin: self.origin,
            origin_id: self.origin_id,
            channel_id: self.focal_channel_id(),
        }
    }

    /// `(outgoing, last hop)` of a payment through `candidate`.
    fn route(&self, candidate: ChannelId) -> (ChannelId, ChannelId) {
        if self.incoming_channel_id != 0 {
            (candidate, self.incoming_channel_id)
        } else {
            (self.outgoing_channel_id, candidate)
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum RebalanceStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceResponse {
    pub request: RebalanceRequest,
    pub status: RebalanceStatus,
    pub message: Option<String>,
}

impl RebalanceResponse {
    fn new(request: RebalanceRequest, status: RebalanceStatus, message: Option<String>) -> Self {
        Self {
            request,
            status,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RebalancerKey {
    pub origin: RebalanceOrigin,
    pub origin_id: u32,
    pub channel_id: ChannelId,
}

/// What the workflow engine needs from a rebalancer.
#[async_trait::async_trait]
pub trait RebalanceDispatcher: Send + Sync {
    /// Starts one controller per request. The responses carry the immediate outcome:
    /// `Running` or `Failed` when the request is rejected.
    async fn submit(&self, requests: Vec<RebalanceRequest>) -> Vec<RebalanceResponse>;

    fn cancel_rebalancers_except(
        &self,
        origin: RebalanceOrigin,
        origin_id: u32,
        active_channel_ids: &[ChannelId],
    );

    fn cancel_rebalancer(&self, origin: RebalanceOrigin, origin_id: u32, channel_id: ChannelId);
}

struct Controller {
    generation: u64,
    token: CancellationToken,
}

struct FinishedRebalance {
    finished_at: Instant,
    response: RebalanceResponse,
}

type Results = Arc<RwLock<HashMap<RebalancerKey, FinishedRebalance>>>;

pub struct Rebalancer<S> {
    commands: CommandBus<S>,
    registry: Arc<Registry>,
    controllers: Arc<RwLock<HashMap<RebalancerKey, Controller>>>,
    results: Results,
    result_retention: Duration,
    generation: AtomicU64,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl<S: PlaneStore> Rebalancer<S> {
    pub fn new(commands: CommandBus<S>, tracker: TaskTracker, token: CancellationToken) -> Self {
        Self {
            registry: commands.registry().clone(),
            commands,
            controllers: Default::default(),
            results: Default::default(),
            result_retention: RESULT_RETENTION,
            generation: AtomicU64::new(0),
            tracker,
            token,
        }
    }

    pub fn with_result_retention(mut self, retention: Duration) -> Self {
        self.result_retention = retention;
        self
    }

    pub fn is_running(&self, key: &RebalancerKey) -> bool {
        read_lock(&self.controllers).contains_key(key)
    }

    pub fn running_keys(&self) -> Vec<RebalancerKey> {
        read_lock(&self.controllers).keys().copied().collect()
    }

    /// Final response of the last finished controller of `key`. Cleared when a new
    /// controller starts for the key and dropped after the retention period.
    pub fn get_result(&self, key: &RebalancerKey) -> Option<RebalanceResponse> {
        read_lock(&self.results)
            .get(key)
            .map(|finished| finished.response.clone())
    }

    pub fn result_count(&self) -> usize {
        read_lock(&self.results).len()
    }

    fn validate(&self, request: &RebalanceRequest) -> Result<()> {
        if !self.registry.is_managed_node(request.node_id) {
            return Err(Error::Rebalance(format!(
                "node {} is not managed",
                request.node_id
            )));
        }
        if (request.incoming_channel_id == 0) == (request.outgoing_channel_id == 0) {
            return Err(Error::Rebalance(
                "exactly one of the incoming and outgoing channels must be set".to_string(),
            ));
        }
        if request.amount_msat == 0 {
            return Err(Error::Rebalance("amount must be positive".to_string()));
        }
        let focal = request.focal_channel_id();
        let channel = self
            .registry
            .get_channel_settings(focal)
            .ok_or(Error::ChannelNotFound(focal))?;
        if !channel.has_node(request.node_id) {
            return Err(Error::Rebalance(format!(
                "channel {} does not belong to node {}",
                focal, request.node_id
            )));
        }
        if !request.channel_ids.iter().any(|id| *id != 0 && *id != focal) {
            return Err(Error::Rebalance("no candidate channels".to_string()));
        }
        Ok(())
    }

    fn start(&self, mut request: RebalanceRequest) -> RebalanceResponse {
        if let Err(err) = self.validate(&request) {
            warn!(
                node_id = request.node_id,
                channel_id = request.focal_channel_id(),
                "rebalance rejected: {}",
                err
            );
            return RebalanceResponse::new(request, RebalanceStatus::Failed, Some(err.to_string()));
        }
        request.maximum_concurrency = request.maximum_concurrency.max(DEFAULT_MAXIMUM_CONCURRENCY);

        let key = request.key();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.token.child_token();
        let previous = write_lock(&self.controllers).insert(
            key,
            Controller {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(channel_id = key.channel_id, "replacing running rebalancer");
            previous.token.cancel();
        }
        write_lock(&self.results).remove(&key);

        let commands = self.commands.clone();
        let controllers = self.controllers.clone();
        let results = self.results.clone();
        let retention = self.result_retention;
        let task_request = request.clone();
        self.tracker.spawn(async move {
            let response = run_rebalancer(&commands, task_request, &token).await;
            info!(
                node_id = response.request.node_id,
                channel_id = key.channel_id,
                status = %response.status,
                "rebalancer finished"
            );
            let mut controllers = write_lock(&controllers);
            if controllers
                .get(&key)
                .is_some_and(|controller| controller.generation == generation)
            {
                controllers.remove(&key);
            }
            drop(controllers);
            record_result(&results, retention, key, response);
        });
        RebalanceResponse::new(request, RebalanceStatus::Running, None)
    }

    fn cancel_where(&self, predicate: impl Fn(&RebalancerKey) -> bool) {
        write_lock(&self.controllers).retain(|key, controller| {
            if predicate(key) {
                debug!(channel_id = key.channel_id, origin = %key.origin, "cancelling rebalancer");
                controller.token.cancel();
                false
            } else {
                true
            }
        });
    }
}

/// Stores the final response of `key`, evicting results past their retention.
fn record_result(
    results: &Results,
    retention: Duration,
    key: RebalancerKey,
    response: RebalanceResponse,
) {
    let mut results = write_lock(results);
    results.retain(|_, finished| finished.finished_at.elapsed() <= retention);
    results.insert(
        key,
        FinishedRebalance {
            finished_at: Instant::now(),
            response,
        },
    );
}

#[async_trait::async_trait]
impl<S: PlaneStore> RebalanceDispatcher for Rebalancer<S> {
    async fn submit(&self, requests: Vec<RebalanceRequest>) -> Vec<RebalanceResponse> {
        requests
            .into_iter()
            .map(|request| self.start(request))
            .collect()
    }

    fn cancel_rebalancers_except(
        &self,
        origin: RebalanceOrigin,
        origin_id: u32,
        active_channel_ids: &[ChannelId],
    ) {
        self.cancel_where(|key| {
            key.origin == origin
                && key.origin_id == origin_id
                && !active_channel_ids.contains(&key.channel_id)
        });
    }

    fn cancel_rebalancer(&self, origin: RebalanceOrigin, origin_id: u32, channel_id: ChannelId) {
        self.cancel_where(|key| {
            key.origin == origin && key.origin_id == origin_id && key.channel_id == channel_id
        });
    }
}

/// One round over the candidates, `maximum_concurrency` attempts at a time.
async fn run_rebalancer<S: PlaneStore>(
    commands: &CommandBus<S>,
    request: RebalanceRequest,
    token: &CancellationToken,
) -> RebalanceResponse {
    let focal = request.focal_channel_id();
    let candidates: Vec<ChannelId> = request
        .channel_ids
        .iter()
        .copied()
        .filter(|id| *id != 0 && *id != focal)
        .collect();
    let mut failures = Vec::new();
    for batch in candidates.chunks(request.maximum_concurrency as usize) {
        let attempts = join_all(
            batch
                .iter()
                .map(|candidate| attempt(commands, &request, *candidate)),
        );
        let outcomes = tokio::select! {
            _ = token.cancelled() => {
                return RebalanceResponse::new(request, RebalanceStatus::Cancelled, None);
            }
            outcomes = attempts => outcomes,
        };
        for (candidate, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Ok(fee_msat) => {
                    let message =
                        format!("rebalanced over channel {} for {} msat", candidate, fee_msat);
                    return RebalanceResponse::new(
                        request,
                        RebalanceStatus::Completed,
                        Some(message),
                    );
                }
                Err(reason) => {
                    debug!(channel_id = focal, candidate, "rebalance attempt failed: {}", reason);
                    failures.push(format!("{}: {}", candidate, reason));
                }
            }
        }
    }
    RebalanceResponse::new(request, RebalanceStatus::Failed, Some(failures.join("; ")))
}

/// Pays an invoice of the node to itself over `candidate`. Returns the fee paid.
async fn attempt<S: PlaneStore>(
    commands: &CommandBus<S>,
    request: &RebalanceRequest,
    candidate: ChannelId,
) -> std::result::Result<u64, String> {
    let invoice = commands
        .new_invoice(&NewInvoiceRequest {
            node_id: request.node_id,
            memo: Some(format!("Rebalance {}", request.focal_channel_id())),
            value_msat: Some(request.amount_msat),
            ..Default::default()
        })
        .await
        .map_err(|err| err.to_string())?;
    let Some(invoice) = invoice.data else {
        return Err(invoice
            .error
            .unwrap_or_else(|| "invoice creation failed".to_string()));
    };

    let (outgoing_channel_id, last_hop_channel_id) = request.route(candidate);
    let payment = commands
        .new_payment(&NewPaymentRequest {
            node_id: request.node_id,
            invoice: Some(invoice.payment_request),
            timeout_seconds: PAYMENT_TIMEOUT_SECONDS,
            fee_limit_msat: Some(request.maximum_cost_msat),
            allow_self_payment: true,
            outgoing_channel_id: Some(outgoing_channel_id),
            last_hop_channel_id: Some(last_hop_channel_id),
            ..Default::default()
        })
        .await
        .map_err(|err| err.to_string())?;
    match payment.data {
        Some(payment) if payment.status == PaymentStatus::Succeeded => Ok(payment.fee_msat),
        Some(payment) => Err(payment
            .failure_reason
            .unwrap_or_else(|| format!("payment ended {:?}", payment.status))),
        None => Err(payment
            .error
            .unwrap_or_else(|| "payment failed".to_string())),
    }
}

/// Marks a node ready to accept rebalance requests for as long as it is supervised.
pub struct RebalanceService;

#[async_trait::async_trait]
impl ManagedService for RebalanceService {
    async fn run(&mut self, ctx: &ServiceContext) -> anyhow::Result<()> {
        ctx.mark_active();
        ctx.token.cancelled().await;
        Ok(())
    }
}
