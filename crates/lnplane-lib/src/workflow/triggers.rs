use std::{marker::PhantomData, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use ractor::{concurrency::JoinHandle, Actor, ActorCell, ActorProcessingErr, ActorRef};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{
    engine::{Activation, WorkflowEngine, WorkflowEvent},
    graph::WorkflowGraph,
    parameters::{self, CronTriggerParameters, IntervalTriggerParameters},
    WorkflowError, WorkflowNodeType, WorkflowVersionNode,
};
use crate::{
    events::{ChannelBalanceEvent, ChannelEvent, ChannelEventKind, EventBus},
    now_timestamp_as_millis_u64,
    store::PlaneStore,
    types::{WorkflowVersionId, WorkflowVersionNodeId},
    Result,
};

pub const DEFAULT_CRON_TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum WorkflowTriggerMessage {
    /// Re-reads the active workflow versions and reschedules their triggers.
    Reload,
    Interval(WorkflowVersionId, WorkflowVersionNodeId),
    CronTick,
    ChannelBalanceEvent(ChannelBalanceEvent),
    ChannelEvent(ChannelEvent),
}

pub struct WorkflowTriggerArgs<S> {
    pub engine: Arc<WorkflowEngine<S>>,
    pub events: Arc<EventBus>,
    pub tracker: TaskTracker,
    pub token: CancellationToken,
    pub cron_tick: Duration,
}

struct CronTrigger {
    workflow_version_id: WorkflowVersionId,
    workflow_version_node_id: WorkflowVersionNodeId,
    schedule: cron::Schedule,
    next: Option<DateTime<Utc>>,
}

pub struct WorkflowTriggerState<S> {
    engine: Arc<WorkflowEngine<S>>,
    tracker: TaskTracker,
    token: CancellationToken,
    intervals: Vec<JoinHandle<()>>,
    crons: Vec<CronTrigger>,
    /// Event triggers of the active versions.
    event_triggers: Vec<(WorkflowVersionId, WorkflowVersionNode)>,
}

impl<S: PlaneStore> WorkflowTriggerState<S> {
    fn reload(&mut self, myself: &ActorRef<WorkflowTriggerMessage>) {
        for handle in self.intervals.drain(..) {
            handle.abort();
        }
        self.crons.clear();
        self.event_triggers.clear();

        for version in self.engine.store().get_workflow_versions() {
            if !version.active {
                continue;
            }
            if let Err(err) = WorkflowGraph::new(&version) {
                warn!(
                    workflow_version_id = version.workflow_version_id,
                    "skipping invalid workflow: {}", err
                );
                continue;
            }
            for node in version.nodes.iter().filter(|node| node.active) {
                self.schedule(myself, version.workflow_version_id, node);
            }
        }
        info!(
            intervals = self.intervals.len(),
            crons = self.crons.len(),
            events = self.event_triggers.len(),
            "workflow triggers loaded"
        );
    }

    fn schedule(
        &mut self,
        myself: &ActorRef<WorkflowTriggerMessage>,
        workflow_version_id: WorkflowVersionId,
        node: &WorkflowVersionNode,
    ) {
        let node_id = node.workflow_version_node_id;
        match node.node_type {
            WorkflowNodeType::IntervalTrigger => {
                let parameters: IntervalTriggerParameters = match parameters::parse(node) {
                    Ok(parameters) => parameters,
                    Err(err) => {
                        warn!(workflow_version_node_id = node_id, "{}", err);
                        return;
                    }
                };
                if parameters.seconds == 0 {
                    warn!(workflow_version_node_id = node_id, "interval of zero seconds");
                    return;
                }
                let handle = myself.send_interval(Duration::from_secs(parameters.seconds), move || {
                    WorkflowTriggerMessage::Interval(workflow_version_id, node_id)
                });
                self.intervals.push(handle);
            }
            WorkflowNodeType::CronTrigger => {
                let schedule = parameters::parse::<CronTriggerParameters>(node).and_then(|p| {
                    parse_schedule(&p.cron_value)
                        .map_err(|err| WorkflowError::invalid_parameters(node_id, err))
                });
                match schedule {
                    Ok(schedule) => self.crons.push(CronTrigger {
                        workflow_version_id,
                        workflow_version_node_id: node_id,
                        next: schedule.upcoming(Utc).next(),
                        schedule,
                    }),
                    Err(err) => warn!(workflow_version_node_id = node_id, "{}", err),
                }
            }
            WorkflowNodeType::ChannelBalanceEventTrigger
            | WorkflowNodeType::ChannelOpenEventTrigger
            | WorkflowNodeType::ChannelCloseEventTrigger => {
                self.event_triggers.push((workflow_version_id, node.clone()));
            }
            _ => {}
        }
    }

    fn spawn_run(&self, workflow_version_id: WorkflowVersionId, activation: Activation) {
        let engine = self.engine.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            let trigger = activation.trigger_node_id;
            match engine.trigger(workflow_version_id, activation, &token).await {
                Ok(_) => debug!(workflow_version_id, trigger, "workflow run finished"),
                Err(err) => warn!(workflow_version_id, trigger, "workflow run failed: {}", err),
            }
        });
    }

    fn fire_event_triggers(&self, node_type: WorkflowNodeType, event: WorkflowEvent) {
        for (workflow_version_id, node) in &self.event_triggers {
            if node.node_type != node_type {
                continue;
            }
            let activation = Activation::new(
                node.workflow_version_node_id,
                format!("{}-{}", node_type, event.channel_id()),
            )
            .with_events(vec![event.clone()]);
            self.spawn_run(*workflow_version_id, activation);
        }
    }
}

/// Five-field expressions are read with a leading seconds field of zero.
pub(crate) fn parse_schedule(
    expression: &str,
) -> std::result::Result<cron::Schedule, cron::error::Error> {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {}", expression))
    } else {
        cron::Schedule::from_str(expression)
    }
}

/// Decides when workflow versions run: intervals, cron expressions and channel events.
pub struct WorkflowTriggerActor<S>(PhantomData<S>);

impl<S: PlaneStore> WorkflowTriggerActor<S> {
    pub async fn start(
        args: WorkflowTriggerArgs<S>,
        root_actor: ActorCell,
    ) -> Result<ActorRef<WorkflowTriggerMessage>> {
        let (actor, _handle) = Actor::spawn_linked(
            Some("workflow_trigger_actor".to_string()),
            WorkflowTriggerActor(PhantomData),
            args,
            root_actor,
        )
        .await?;
        Ok(actor)
    }
}

#[ractor::async_trait]
impl<S: PlaneStore> Actor for WorkflowTriggerActor<S> {
    type Msg = WorkflowTriggerMessage;
    type State = WorkflowTriggerState<S>;
    type Arguments = WorkflowTriggerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        args.events
            .channel_balance
            .subscribe(myself.clone(), |event| {
                Some(WorkflowTriggerMessage::ChannelBalanceEvent(event))
            });
        args.events.channel.subscribe(myself.clone(), |event| {
            Some(WorkflowTriggerMessage::ChannelEvent(event))
        });
        myself.send_interval(args.cron_tick, || WorkflowTriggerMessage::CronTick);

        let mut state = WorkflowTriggerState {
            engine: args.engine,
            tracker: args.tracker,
            token: args.token,
            intervals: Vec::new(),
            crons: Vec::new(),
            event_triggers: Vec::new(),
        };
        state.reload(&myself);
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            WorkflowTriggerMessage::Reload => state.reload(&myself),
            WorkflowTriggerMessage::Interval(workflow_version_id, node_id) => {
                let reference = format!("interval-{}", now_timestamp_as_millis_u64());
                state.spawn_run(workflow_version_id, Activation::new(node_id, reference));
            }
            WorkflowTriggerMessage::CronTick => {
                let now = Utc::now();
                let mut due = Vec::new();
                for cron in &mut state.crons {
                    if cron.next.is_some_and(|next| next <= now) {
                        due.push((cron.workflow_version_id, cron.workflow_version_node_id));
                        cron.next = cron.schedule.after(&now).next();
                    }
                }
                for (workflow_version_id, node_id) in due {
                    let reference = format!("cron-{}", now.timestamp_millis());
                    state.spawn_run(workflow_version_id, Activation::new(node_id, reference));
                }
            }
            WorkflowTriggerMessage::ChannelBalanceEvent(event) => {
                state.fire_event_triggers(
                    WorkflowNodeType::ChannelBalanceEventTrigger,
                    WorkflowEvent::ChannelBalance(event),
                );
            }
            WorkflowTriggerMessage::ChannelEvent(event) => {
                let node_type = match event.kind {
                    ChannelEventKind::Open => WorkflowNodeType::ChannelOpenEventTrigger,
                    ChannelEventKind::Close => WorkflowNodeType::ChannelCloseEventTrigger,
                    ChannelEventKind::Active | ChannelEventKind::Inactive => return Ok(()),
                };
                state.fire_event_triggers(node_type, WorkflowEvent::Channel(event));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        for handle in state.intervals.drain(..) {
            handle.abort();
        }
        Ok(())
    }
}
