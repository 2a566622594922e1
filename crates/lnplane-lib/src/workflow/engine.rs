//! Staged interpretation of a workflow version.
//!
//! A run starts at one trigger node. Every stage is visited until no node can make
//! progress; a node is ready once each of its distinct input labels has at least one
//! `Active` parent. Values travel as JSON strings, unkeyed or keyed by channel id, and the
//! outputs of a finished stage seed the inputs of the next one. A node that errors or
//! panics is logged and left inactive, so its children never become ready while its
//! siblings still run.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt as _;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    filter::{
        channel_balance_event_record, channel_record, record_channel_id, FilterClauses, Record,
    },
    graph::WorkflowGraph,
    label,
    parameters::{
        self, ChannelBalanceEventFilterParameters, ChannelSourceKind, ChannelSourceParameters,
        RebalanceConfiguration, RebalanceFocus, RoutingPolicyConfiguration, TagParameters,
        TagTarget, UnfocusedPathNode, VariableParameters,
    },
    Labels, LabelsByReference, WorkflowError, WorkflowNodeLog, WorkflowNodeType,
    WorkflowVersionNode,
};
use crate::{
    channel_state::{ChannelState, ChannelStateCache},
    commands::{
        routing_policy::{MANUAL_RATE_LIMIT_COUNT, MANUAL_RATE_LIMIT_SECONDS},
        types::{CommandResponse, RoutingPolicyUpdateRequest},
        CommandBus,
    },
    events::{ChannelBalanceEvent, ChannelEvent},
    now_timestamp_as_millis_u64, panic_message,
    rebalancer::{
        RebalanceDispatcher, RebalanceOrigin, RebalanceRequest, DEFAULT_MAXIMUM_CONCURRENCY,
    },
    registry::{Registry, ServiceKey},
    store::PlaneStore,
    types::{
        ChannelId, NodeId, ServiceStatus, ServiceType, Status, TaggedEntity, WorkflowVersionId,
        WorkflowVersionNodeId,
    },
};

pub const MAX_STAGE_ITERATIONS: usize = 100;

/// An event a run was triggered by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    ChannelBalance(ChannelBalanceEvent),
    Channel(ChannelEvent),
}

impl WorkflowEvent {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            WorkflowEvent::ChannelBalance(event) => event.channel_id,
            WorkflowEvent::Channel(event) => event.channel_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub trigger_node_id: WorkflowVersionNodeId,
    pub reference: String,
    pub events: Vec<WorkflowEvent>,
}

impl Activation {
    pub fn new(trigger_node_id: WorkflowVersionNodeId, reference: impl Into<String>) -> Self {
        Self {
            trigger_node_id,
            reference: reference.into(),
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<WorkflowEvent>) -> Self {
        self.events = events;
        self
    }

    fn event_channel_ids(&self) -> Vec<ChannelId> {
        let mut ids = Vec::new();
        for event in &self.events {
            let id = event.channel_id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn balance_events(&self) -> impl Iterator<Item = &ChannelBalanceEvent> {
        self.events.iter().filter_map(|event| match event {
            WorkflowEvent::ChannelBalance(event) => Some(event),
            WorkflowEvent::Channel(_) => None,
        })
    }
}

/// Caches of one node during a run.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub inputs: Labels,
    pub inputs_by_reference: LabelsByReference,
    pub outputs: Labels,
    pub outputs_by_reference: LabelsByReference,
    /// Input labels fed by a link.
    linked: BTreeSet<String>,
    /// References whose outputs this node produced.
    updated: BTreeSet<ChannelId>,
}

impl NodeData {
    fn seeded(seed: &Labels, seed_by_reference: &LabelsByReference) -> Self {
        Self {
            inputs: seed.clone(),
            inputs_by_reference: seed_by_reference.clone(),
            ..Default::default()
        }
    }

    fn is_linked(&self, label: &str) -> bool {
        self.linked.contains(label)
    }

    /// Channel ids of an input; empty when absent.
    fn channel_ids(
        &self,
        id: WorkflowVersionNodeId,
        label: &str,
    ) -> Result<Vec<ChannelId>, WorkflowError> {
        match self.inputs.get(label) {
            Some(value) => decode_ids(value).map_err(|err| {
                WorkflowError::invalid_parameters(id, format!("{}: {}", label, err))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Channel ids of an input that must be wired.
    fn linked_channel_ids(
        &self,
        id: WorkflowVersionNodeId,
        label: &str,
    ) -> Result<Vec<ChannelId>, WorkflowError> {
        if !self.is_linked(label) {
            return Err(WorkflowError::missing_input(id, label));
        }
        self.channel_ids(id, label)
    }

    fn set_channel_ids(&mut self, label: &str, ids: &[ChannelId]) {
        self.outputs.insert(label.to_string(), encode_ids(ids));
    }

    fn reference_input<T: DeserializeOwned>(
        &self,
        id: WorkflowVersionNodeId,
        reference: ChannelId,
        label: &str,
    ) -> Result<Option<T>, WorkflowError> {
        decode_reference(&self.inputs_by_reference, id, reference, label)
    }

    /// Reads what this node currently emits for `reference`. Inherited values are
    /// included since outputs start as a copy of the inputs.
    fn reference_output<T: DeserializeOwned>(
        &self,
        id: WorkflowVersionNodeId,
        reference: ChannelId,
        label: &str,
    ) -> Result<Option<T>, WorkflowError> {
        decode_reference(&self.outputs_by_reference, id, reference, label)
    }

    fn set_reference_output<T: Serialize>(
        &mut self,
        id: WorkflowVersionNodeId,
        reference: ChannelId,
        label: &str,
        value: &T,
    ) -> Result<(), WorkflowError> {
        let value = encode(id, value)?;
        self.outputs_by_reference
            .entry(reference)
            .or_default()
            .insert(label.to_string(), value);
        self.updated.insert(reference);
        Ok(())
    }
}

/// What a run left behind, for callers and tests.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub statuses: HashMap<WorkflowVersionNodeId, Status>,
    pub data: HashMap<WorkflowVersionNodeId, NodeData>,
    /// Nodes that failed, with the logged error. Their children are skipped.
    pub failures: HashMap<WorkflowVersionNodeId, String>,
}

impl RunOutcome {
    pub fn status(&self, id: WorkflowVersionNodeId) -> Status {
        self.statuses.get(&id).copied().unwrap_or_default()
    }

    pub fn failure(&self, id: WorkflowVersionNodeId) -> Option<&str> {
        self.failures.get(&id).map(String::as_str)
    }

    pub fn output(&self, id: WorkflowVersionNodeId, label: &str) -> Option<&str> {
        self.data
            .get(&id)
            .and_then(|data| data.outputs.get(label))
            .map(String::as_str)
    }

    pub fn reference_output(
        &self,
        id: WorkflowVersionNodeId,
        reference: ChannelId,
        label: &str,
    ) -> Option<&str> {
        self.data
            .get(&id)
            .and_then(|data| data.outputs_by_reference.get(&reference))
            .and_then(|labels| labels.get(label))
            .map(String::as_str)
    }
}

struct Run<'a> {
    graph: &'a WorkflowGraph,
    activation: &'a Activation,
    trigger_type: WorkflowNodeType,
    event_channel_ids: Vec<ChannelId>,
    outcome: RunOutcome,
}

pub struct WorkflowEngine<S> {
    registry: Arc<Registry>,
    cache: Arc<ChannelStateCache>,
    store: S,
    commands: CommandBus<S>,
    rebalancer: Arc<dyn RebalanceDispatcher>,
}

impl<S: PlaneStore> WorkflowEngine<S> {
    pub fn new(
        cache: Arc<ChannelStateCache>,
        store: S,
        commands: CommandBus<S>,
        rebalancer: Arc<dyn RebalanceDispatcher>,
    ) -> Self {
        Self {
            registry: commands.registry().clone(),
            cache,
            store,
            commands,
            rebalancer,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the version from the store and runs it from `activation`.
    pub async fn trigger(
        &self,
        workflow_version_id: WorkflowVersionId,
        activation: Activation,
        token: &CancellationToken,
    ) -> Result<RunOutcome, WorkflowError> {
        let version = self
            .store
            .get_workflow_version(workflow_version_id)
            .ok_or(WorkflowError::VersionNotFound(workflow_version_id))?;
        let graph = WorkflowGraph::new(&version)?;
        self.run(&graph, &activation, token).await
    }

    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        activation: &Activation,
        token: &CancellationToken,
    ) -> Result<RunOutcome, WorkflowError> {
        let trigger = graph
            .node(activation.trigger_node_id)
            .ok_or(WorkflowError::NodeNotFound(activation.trigger_node_id))?;
        let mut run = Run {
            graph,
            activation,
            trigger_type: trigger.node_type,
            event_channel_ids: activation.event_channel_ids(),
            outcome: RunOutcome::default(),
        };
        info!(
            workflow_version_id = graph.workflow_version_id(),
            trigger = %trigger.node_type,
            reference = %activation.reference,
            "running workflow"
        );

        let mut seed = self.initial_inputs(&run)?;
        let mut seed_by_reference = LabelsByReference::new();
        let mut stages = vec![trigger];
        stages.extend(graph.stage_triggers_after(trigger.stage));
        stages.dedup_by_key(|node| node.stage);
        for stage_trigger in stages {
            let (outputs, outputs_by_reference) = self
                .run_stage(&mut run, stage_trigger, &seed, &seed_by_reference, token)
                .await?;
            seed.extend(outputs);
            for (reference, labels) in outputs_by_reference {
                seed_by_reference.entry(reference).or_default().extend(labels);
            }
        }
        Ok(run.outcome)
    }

    fn initial_inputs(&self, run: &Run<'_>) -> Result<Labels, WorkflowError> {
        let id = run.activation.trigger_node_id;
        Ok(Labels::from([
            (
                label::EVENT_CHANNELS.to_string(),
                encode_ids(&run.event_channel_ids),
            ),
            (label::ALL_CHANNELS.to_string(), encode_ids(&self.all_channel_ids())),
            (label::EVENTS.to_string(), encode(id, &run.activation.events)?),
        ]))
    }

    /// Open channels of the managed nodes, without those between two managed nodes.
    fn all_channel_ids(&self) -> Vec<ChannelId> {
        let mut ids = BTreeSet::new();
        for node_id in self.registry.get_managed_node_ids() {
            for channel_id in self.registry.get_open_channel_ids_by_node(node_id) {
                let Some(settings) = self.registry.get_channel_settings(channel_id) else {
                    continue;
                };
                if self.registry.is_managed_node(settings.first_node_id)
                    && self.registry.is_managed_node(settings.second_node_id)
                {
                    continue;
                }
                ids.insert(channel_id);
            }
        }
        ids.into_iter().collect()
    }

    /// Returns the stage's outputs: every unkeyed output plus the references updated by
    /// its nodes.
    async fn run_stage(
        &self,
        run: &mut Run<'_>,
        stage_trigger: &WorkflowVersionNode,
        seed: &Labels,
        seed_by_reference: &LabelsByReference,
        token: &CancellationToken,
    ) -> Result<(Labels, LabelsByReference), WorkflowError> {
        let stage = stage_trigger.stage;
        let nodes: Vec<&WorkflowVersionNode> = run
            .graph
            .nodes_in_stage(stage)
            .into_iter()
            .filter(|node| node.active)
            .collect();

        let mut pending = Vec::new();
        for node in &nodes {
            if node.node_type.is_grouped() {
                let mut data = NodeData::seeded(seed, seed_by_reference);
                data.outputs = data.inputs.clone();
                data.outputs_by_reference = data.inputs_by_reference.clone();
                if is_event_trigger(node.node_type) {
                    let is_stage_trigger =
                        node.workflow_version_node_id == stage_trigger.workflow_version_node_id;
                    let ids = if is_stage_trigger {
                        run.event_channel_ids.clone()
                    } else {
                        Vec::new()
                    };
                    data.set_channel_ids(label::CHANNELS, &ids);
                }
                run.outcome.data.insert(node.workflow_version_node_id, data);
                run.outcome
                    .statuses
                    .insert(node.workflow_version_node_id, Status::Active);
            } else {
                run.outcome
                    .statuses
                    .insert(node.workflow_version_node_id, Status::Pending);
                pending.push(*node);
            }
        }

        let mut executed = Vec::new();
        let mut iterations = 0;
        while !pending.is_empty() {
            iterations += 1;
            if iterations > MAX_STAGE_ITERATIONS {
                return Err(WorkflowError::IterationLimit {
                    workflow_version_id: run.graph.workflow_version_id(),
                    stage,
                });
            }
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|node| is_ready(run, node.workflow_version_node_id));
            pending = waiting;
            if ready.is_empty() {
                debug!(
                    workflow_version_id = run.graph.workflow_version_id(),
                    stage,
                    unreachable = pending.len(),
                    "stage settled"
                );
                break;
            }
            for node in ready {
                if token.is_cancelled() {
                    return Err(WorkflowError::Cancelled(run.graph.workflow_version_id()));
                }
                let id = node.workflow_version_node_id;
                let mut data = collect_inputs(run, node, seed, seed_by_reference);
                let result = self.execute_guarded(run, node, &mut data).await;
                self.write_log(run, node, &data, result.as_ref().err())?;
                match result {
                    Ok(()) => {
                        run.outcome.statuses.insert(id, Status::Active);
                        run.outcome.data.insert(id, data);
                        executed.push(id);
                    }
                    Err(err @ WorkflowError::Cancelled(_)) => return Err(err),
                    Err(err) => {
                        warn!(
                            workflow_version_id = run.graph.workflow_version_id(),
                            workflow_version_node_id = id,
                            node_type = %node.node_type,
                            "workflow node failed: {}", err
                        );
                        run.outcome.statuses.insert(id, Status::Inactive);
                        run.outcome.failures.insert(id, err.to_string());
                    }
                }
            }
        }

        let mut outputs = Labels::new();
        let mut outputs_by_reference = LabelsByReference::new();
        for id in executed {
            let Some(data) = run.outcome.data.get(&id) else {
                continue;
            };
            outputs.extend(data.outputs.clone());
            for reference in &data.updated {
                if let Some(labels) = data.outputs_by_reference.get(reference) {
                    outputs_by_reference
                        .entry(*reference)
                        .or_default()
                        .extend(labels.clone());
                }
            }
        }
        Ok((outputs, outputs_by_reference))
    }

    fn write_log(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &NodeData,
        error: Option<&WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let id = node.workflow_version_node_id;
        self.store.insert_workflow_node_log(WorkflowNodeLog {
            workflow_version_id: run.graph.workflow_version_id(),
            workflow_version_node_id: id,
            triggering_workflow_version_node_id: Some(run.activation.trigger_node_id),
            trigger_reference: run.activation.reference.clone(),
            input_data: encode(id, &(&data.inputs, &data.inputs_by_reference))?,
            output_data: encode(id, &(&data.outputs, &data.outputs_by_reference))?,
            error_data: error.map(ToString::to_string),
            created_on: now_timestamp_as_millis_u64(),
        });
        Ok(())
    }

    /// A panicking node fails like any other; the stage goes on with its siblings.
    async fn execute_guarded(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<(), WorkflowError> {
        let workflow_version_node_id = node.workflow_version_node_id;
        match AssertUnwindSafe(self.execute(run, node, data))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    target: "lnplane::critical",
                    workflow_version_node_id,
                    "workflow node panicked: {}", message
                );
                Err(WorkflowError::Panicked {
                    workflow_version_node_id,
                    message,
                })
            }
        }
    }

    async fn execute(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<(), WorkflowError> {
        debug!(
            workflow_version_node_id = node.workflow_version_node_id,
            node_type = %node.node_type,
            "executing workflow node"
        );
        match node.node_type {
            WorkflowNodeType::ChannelSource => self.channel_source(node, data),
            WorkflowNodeType::ChannelFilter => self.channel_filter(node, data),
            WorkflowNodeType::ChannelBalanceEventFilter => {
                self.channel_balance_event_filter(run, node, data)
            }
            WorkflowNodeType::AddTag | WorkflowNodeType::RemoveTag => self.tag(node, data),
            WorkflowNodeType::ChannelPolicyConfigurator => {
                self.configure_routing_policies(node, data).map(|_| ())
            }
            WorkflowNodeType::ChannelPolicyAutoRun => {
                let channel_ids = self.configure_routing_policies(node, data)?;
                self.run_routing_policies(run, node, data, &channel_ids).await
            }
            WorkflowNodeType::ChannelPolicyRun => {
                let channel_ids =
                    data.linked_channel_ids(node.workflow_version_node_id, label::CHANNELS)?;
                self.run_routing_policies(run, node, data, &channel_ids).await
            }
            WorkflowNodeType::RebalanceConfigurator => {
                self.configure_rebalances(run, node, data).map(|_| ())
            }
            WorkflowNodeType::RebalanceAutoRun => {
                let configurations = self.configure_rebalances(run, node, data)?;
                self.run_rebalances(run, node, data, configurations).await
            }
            WorkflowNodeType::RebalanceRun => {
                let references: Vec<ChannelId> = data.inputs_by_reference.keys().copied().collect();
                let mut configurations = Vec::new();
                for reference in references {
                    let configuration = data.reference_input(
                        node.workflow_version_node_id,
                        reference,
                        label::REBALANCE_SETTINGS,
                    )?;
                    configurations.extend(configuration);
                }
                self.run_rebalances(run, node, data, configurations).await
            }
            WorkflowNodeType::SetVariable => {
                let parameters: VariableParameters = parameters::parse(node)?;
                data.outputs
                    .insert(parameters.variable_name, parameters.value);
                Ok(())
            }
            WorkflowNodeType::FilterOnVariable => {
                let parameters: VariableParameters = parameters::parse(node)?;
                if data.inputs.get(&parameters.variable_name) != Some(&parameters.value) {
                    data.set_channel_ids(label::CHANNELS, &[]);
                }
                Ok(())
            }
            // Triggers are marked active without being executed.
            _ => Ok(()),
        }
    }

    fn channel_source(
        &self,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<(), WorkflowError> {
        let parameters: ChannelSourceParameters = parameters::parse(node)?;
        let id = node.workflow_version_node_id;
        let event_channel_ids = data.channel_ids(id, label::EVENT_CHANNELS)?;
        let channel_ids = match parameters.source {
            ChannelSourceKind::All => data.channel_ids(id, label::ALL_CHANNELS)?,
            ChannelSourceKind::Event => event_channel_ids,
            ChannelSourceKind::EventXorAll if !event_channel_ids.is_empty() => event_channel_ids,
            ChannelSourceKind::EventXorAll => data.channel_ids(id, label::ALL_CHANNELS)?,
        };
        data.set_channel_ids(label::CHANNELS, &channel_ids);
        Ok(())
    }

    fn channel_record(&self, channel_id: ChannelId) -> Option<Record> {
        let settings = self.registry.get_channel_settings(channel_id)?;
        let node_id = self.registry.get_managed_node_of_channel(channel_id)?;
        let remote_node_id = settings.remote_node_id(node_id)?;
        let state = self
            .cache
            .get_channel_state(node_id, channel_id)
            .unwrap_or_else(|| ChannelState {
                node_id,
                channel_id,
                remote_node_id,
                ..Default::default()
            });
        Some(channel_record(
            &settings,
            &state,
            self.registry.get_tag_ids(TaggedEntity::Channel(channel_id)),
            self.registry.get_tag_ids(TaggedEntity::Node(remote_node_id)),
        ))
    }

    fn channel_filter(
        &self,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<(), WorkflowError> {
        let clauses: FilterClauses = parameters::parse(node)?;
        let channel_ids = data.linked_channel_ids(node.workflow_version_node_id, label::CHANNELS)?;
        if !clauses.is_configured() {
            data.set_channel_ids(label::CHANNELS, &channel_ids);
            return Ok(());
        }
        let records: Vec<Record> = channel_ids
            .iter()
            .filter_map(|channel_id| self.channel_record(*channel_id))
            .collect();
        let filtered: Vec<ChannelId> = clauses
            .compile()
            .apply(&records)
            .into_iter()
            .filter_map(record_channel_id)
            .collect();
        data.set_channel_ids(label::CHANNELS, &filtered);
        Ok(())
    }

    fn channel_balance_event_filter(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<(), WorkflowError> {
        let parameters: ChannelBalanceEventFilterParameters = parameters::parse(node)?;
        let id = node.workflow_version_node_id;
        let channel_ids = data.linked_channel_ids(id, label::CHANNELS)?;
        if channel_ids.is_empty() {
            return Err(WorkflowError::missing_input(id, label::CHANNELS));
        }
        let records: Vec<Record> = run
            .activation
            .balance_events()
            .map(channel_balance_event_record)
            .collect();
        if records.is_empty() {
            if parameters.ignore_when_eventless {
                data.set_channel_ids(label::CHANNELS, &channel_ids);
                return Ok(());
            }
            return Err(WorkflowError::NoEvents(id));
        }
        if !parameters.filter_clauses.is_configured() {
            data.set_channel_ids(label::CHANNELS, &channel_ids);
            return Ok(());
        }
        let matching: BTreeSet<ChannelId> = parameters
            .filter_clauses
            .compile()
            .apply(&records)
            .into_iter()
            .filter_map(record_channel_id)
            .collect();
        let filtered: Vec<ChannelId> = channel_ids
            .into_iter()
            .filter(|channel_id| matching.contains(channel_id))
            .collect();
        data.set_channel_ids(label::CHANNELS, &filtered);
        Ok(())
    }

    fn tag(&self, node: &WorkflowVersionNode, data: &mut NodeData) -> Result<(), WorkflowError> {
        let parameters: TagParameters = parameters::parse(node)?;
        let channel_ids = data.linked_channel_ids(node.workflow_version_node_id, label::CHANNELS)?;
        let adding = node.node_type == WorkflowNodeType::AddTag;
        let tag_ids = if adding {
            &parameters.added_tags
        } else {
            &parameters.removed_tags
        };

        let mut entities = BTreeSet::new();
        for channel_id in &channel_ids {
            match parameters.apply_to {
                TagTarget::Channels => {
                    entities.insert(TaggedEntity::Channel(*channel_id));
                }
                TagTarget::Nodes => {
                    if let Some(peer) = self.peer_of(*channel_id) {
                        entities.insert(TaggedEntity::Node(peer));
                    }
                }
            }
        }
        for tag_id in tag_ids.iter().filter(|tag_id| **tag_id != 0) {
            for entity in &entities {
                if adding {
                    self.registry.add_tag_to(*entity, *tag_id);
                    self.store.add_tag(*entity, *tag_id);
                } else {
                    self.registry.remove_tag_from(*entity, *tag_id);
                    self.store.remove_tag(*entity, *tag_id);
                }
            }
        }
        Ok(())
    }

    /// The unmanaged end of a channel. None when both ends are managed.
    fn peer_of(&self, channel_id: ChannelId) -> Option<NodeId> {
        let settings = self.registry.get_channel_settings(channel_id)?;
        let first_managed = self.registry.is_managed_node(settings.first_node_id);
        let second_managed = self.registry.is_managed_node(settings.second_node_id);
        match (first_managed, second_managed) {
            (true, false) => Some(settings.second_node_id),
            (false, true) => Some(settings.first_node_id),
            _ => None,
        }
    }

    /// Merges the node's policy into the upstream settings of every linked channel.
    fn configure_routing_policies(
        &self,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<Vec<ChannelId>, WorkflowError> {
        let id = node.workflow_version_node_id;
        let configuration: RoutingPolicyConfiguration = parameters::parse(node)?;
        let channel_ids = data.linked_channel_ids(id, label::CHANNELS)?;
        for channel_id in &channel_ids {
            let upstream = data.reference_input(id, *channel_id, label::ROUTING_POLICY_SETTINGS)?;
            let merged = configuration.merge_into(upstream, *channel_id);
            data.set_reference_output(id, *channel_id, label::ROUTING_POLICY_SETTINGS, &merged)?;
        }
        data.set_channel_ids(label::CHANNELS, &channel_ids);
        Ok(channel_ids)
    }

    async fn run_routing_policies(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
        channel_ids: &[ChannelId],
    ) -> Result<(), WorkflowError> {
        let id = node.workflow_version_node_id;
        let manual = run.trigger_type == WorkflowNodeType::ManualTrigger;
        let mut responses = Vec::new();
        for channel_id in channel_ids {
            let configuration: Option<RoutingPolicyConfiguration> =
                data.reference_output(id, *channel_id, label::ROUTING_POLICY_SETTINGS)?;
            let Some(configuration) = configuration.filter(|c| c.channel_id != 0) else {
                continue;
            };
            let node_id = self
                .registry
                .get_managed_node_of_channel(configuration.channel_id)
                .ok_or(WorkflowError::UnmanagedChannel {
                    workflow_version_node_id: id,
                    channel_id: configuration.channel_id,
                })?;
            let request = RoutingPolicyUpdateRequest {
                node_id,
                channel_id: configuration.channel_id,
                policy: configuration.policy,
                rate_limit_seconds: manual.then_some(MANUAL_RATE_LIMIT_SECONDS),
                rate_limit_count: manual.then_some(MANUAL_RATE_LIMIT_COUNT),
            };
            let response = match self.commands.update_routing_policy(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(
                        workflow_version_node_id = id,
                        node_id,
                        channel_id = request.channel_id,
                        "routing policy update failed: {}",
                        err
                    );
                    CommandResponse::failed(err.to_string())
                }
            };
            responses.push(response);
        }
        data.outputs.insert(label::STATUS.to_string(), encode(id, &responses)?);
        Ok(())
    }

    /// One configuration per focal channel, each carrying its unfocused path.
    fn configure_rebalances(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
    ) -> Result<Vec<RebalanceConfiguration>, WorkflowError> {
        let id = node.workflow_version_node_id;
        let configuration: RebalanceConfiguration = parameters::parse(node)?;
        let focus = configuration
            .focus
            .ok_or_else(|| WorkflowError::invalid_parameters(id, "focus is required"))?;
        let (focus_label, _) = focus_labels(focus);
        let incoming_channel_ids = data.channel_ids(id, label::INCOMING_CHANNELS)?;
        let outgoing_channel_ids = data.channel_ids(id, label::OUTGOING_CHANNELS)?;
        let focal_channel_ids = data.linked_channel_ids(id, focus_label)?;
        let unfocused_path = unfocused_path(run.graph, node, focus);

        let mut configurations = Vec::new();
        for channel_id in &focal_channel_ids {
            let upstream = data.reference_input(id, *channel_id, label::REBALANCE_SETTINGS)?;
            let mut merged = configuration.configure(
                upstream,
                *channel_id,
                &incoming_channel_ids,
                &outgoing_channel_ids,
                id,
            )?;
            merged.workflow_unfocused_path = unfocused_path.clone();
            data.set_reference_output(id, *channel_id, label::REBALANCE_SETTINGS, &merged)?;
            configurations.push(merged);
        }
        Ok(configurations)
    }

    async fn run_rebalances(
        &self,
        run: &Run<'_>,
        node: &WorkflowVersionNode,
        data: &mut NodeData,
        configurations: Vec<RebalanceConfiguration>,
    ) -> Result<(), WorkflowError> {
        let id = node.workflow_version_node_id;
        let mut requests = Vec::new();
        let mut checked_nodes = BTreeSet::new();
        for configuration in configurations.iter().filter(|c| c.is_runnable()) {
            let Some(focus) = configuration.focus else {
                continue;
            };
            let (focal_channel_ids, candidates) = match focus {
                RebalanceFocus::IncomingChannels => (
                    &configuration.incoming_channel_ids,
                    &configuration.outgoing_channel_ids,
                ),
                RebalanceFocus::OutgoingChannels => (
                    &configuration.outgoing_channel_ids,
                    &configuration.incoming_channel_ids,
                ),
            };
            let channel_ids: Vec<ChannelId> =
                candidates.iter().copied().filter(|c| *c != 0).collect();
            let workflow_unfocused_path = encode(id, &configuration.workflow_unfocused_path)?;
            for focal in focal_channel_ids.iter().filter(|c| **c != 0) {
                let node_id = self.registry.get_managed_node_of_channel(*focal).ok_or(
                    WorkflowError::UnmanagedChannel {
                        workflow_version_node_id: id,
                        channel_id: *focal,
                    },
                )?;
                if checked_nodes.insert(node_id) {
                    let status = self.registry.services().status(ServiceKey::node(
                        ServiceType::LndServiceRebalanceService,
                        node_id,
                    ));
                    if status != ServiceStatus::Active {
                        return Err(WorkflowError::RebalanceServiceInactive(node_id));
                    }
                }
                let (incoming_channel_id, outgoing_channel_id) = match focus {
                    RebalanceFocus::IncomingChannels => (*focal, 0),
                    RebalanceFocus::OutgoingChannels => (0, *focal),
                };
                requests.push(RebalanceRequest {
                    origin: RebalanceOrigin::WorkflowNode,
                    origin_id: id,
                    origin_reference: run.activation.reference.clone(),
                    node_id,
                    incoming_channel_id,
                    outgoing_channel_id,
                    channel_ids: channel_ids.clone(),
                    amount_msat: configuration.amount_msat.unwrap_or_default(),
                    maximum_cost_msat: configuration.maximum_cost(),
                    maximum_concurrency: DEFAULT_MAXIMUM_CONCURRENCY,
                    workflow_unfocused_path: workflow_unfocused_path.clone(),
                });
            }
        }
        requests.sort_by_key(|request| (request.node_id, request.focal_channel_id()));

        let active_channel_ids: Vec<ChannelId> =
            requests.iter().map(RebalanceRequest::focal_channel_id).collect();
        if run.event_channel_ids.is_empty() {
            self.rebalancer.cancel_rebalancers_except(
                RebalanceOrigin::WorkflowNode,
                id,
                &active_channel_ids,
            );
        } else {
            for channel_id in &run.event_channel_ids {
                if !active_channel_ids.contains(channel_id) {
                    self.rebalancer.cancel_rebalancer(
                        RebalanceOrigin::WorkflowNode,
                        id,
                        *channel_id,
                    );
                }
            }
        }

        let responses = if requests.is_empty() {
            Vec::new()
        } else {
            self.rebalancer.submit(requests).await
        };
        if !configurations.is_empty() {
            data.outputs.insert(label::STATUS.to_string(), encode(id, &responses)?);
        }
        Ok(())
    }
}

fn is_event_trigger(node_type: WorkflowNodeType) -> bool {
    matches!(
        node_type,
        WorkflowNodeType::ChannelBalanceEventTrigger
            | WorkflowNodeType::ChannelOpenEventTrigger
            | WorkflowNodeType::ChannelCloseEventTrigger
    )
}

fn is_rebalance_node(node_type: WorkflowNodeType) -> bool {
    matches!(
        node_type,
        WorkflowNodeType::RebalanceConfigurator
            | WorkflowNodeType::RebalanceAutoRun
            | WorkflowNodeType::RebalanceRun
    )
}

/// `(focus label, opposite label)`
fn focus_labels(focus: RebalanceFocus) -> (&'static str, &'static str) {
    match focus {
        RebalanceFocus::IncomingChannels => (label::INCOMING_CHANNELS, label::OUTGOING_CHANNELS),
        RebalanceFocus::OutgoingChannels => (label::OUTGOING_CHANNELS, label::INCOMING_CHANNELS),
    }
}

/// Ancestors that produced the unfocused side of `node`, oldest first.
///
/// Rebalance nodes are followed through the opposite label first, everything else
/// through its channels input. Recording starts once the opposite label was crossed.
fn unfocused_path(
    graph: &WorkflowGraph,
    node: &WorkflowVersionNode,
    focus: RebalanceFocus,
) -> Vec<UnfocusedPathNode> {
    let (focus_label, opposite_label) = focus_labels(focus);
    let mut path = Vec::new();
    let mut recording = false;
    let mut visited = BTreeSet::from([node.workflow_version_node_id]);
    let mut current = node;
    loop {
        let labels: &[&str] = if is_rebalance_node(current.node_type) {
            &[opposite_label, focus_label]
        } else {
            &[label::CHANNELS]
        };
        let Some((via, parent)) = graph.parent_by_labels(current.workflow_version_node_id, labels)
        else {
            break;
        };
        if !visited.insert(parent.workflow_version_node_id) {
            break;
        }
        if via == opposite_label {
            recording = true;
        }
        if recording && !parent.node_type.is_trigger() {
            path.push(UnfocusedPathNode::from(parent));
        }
        current = parent;
    }
    path.reverse();
    path
}

fn is_ready(run: &Run<'_>, id: WorkflowVersionNodeId) -> bool {
    let mut groups: BTreeMap<&str, bool> = BTreeMap::new();
    for link in run.graph.parent_links(id) {
        let active = run.outcome.status(link.parent_id) == Status::Active;
        *groups.entry(link.child_input.as_str()).or_default() |= active;
    }
    groups.values().all(|active| *active)
}

/// Seeds the node with the stage inputs, then copies what its active parents produced.
/// The node's outputs start as a copy of its inputs.
fn collect_inputs(
    run: &Run<'_>,
    node: &WorkflowVersionNode,
    seed: &Labels,
    seed_by_reference: &LabelsByReference,
) -> NodeData {
    let mut data = NodeData::seeded(seed, seed_by_reference);
    let mut linked = Labels::new();
    let mut linked_by_reference = LabelsByReference::new();
    for link in run.graph.parent_links(node.workflow_version_node_id) {
        if run.outcome.status(link.parent_id) != Status::Active {
            continue;
        }
        let Some(parent) = run.outcome.data.get(&link.parent_id) else {
            continue;
        };
        data.linked.insert(link.child_input.clone());
        if let Some(value) = parent.outputs.get(&link.parent_output) {
            merge_value(&mut linked, &link.child_input, value);
        }
        for (reference, labels) in &parent.outputs_by_reference {
            for (name, value) in labels {
                let target = if label::ENFORCED.contains(&name.as_str()) {
                    name
                } else if *name == link.parent_output {
                    &link.child_input
                } else {
                    continue;
                };
                linked_by_reference
                    .entry(*reference)
                    .or_default()
                    .insert(target.clone(), value.clone());
            }
        }
    }
    data.inputs.extend(linked);
    for (reference, labels) in linked_by_reference {
        data.inputs_by_reference
            .entry(reference)
            .or_default()
            .extend(labels);
    }
    data.outputs = data.inputs.clone();
    data.outputs_by_reference = data.inputs_by_reference.clone();
    data
}

/// Channel sets arriving on the same label are united, other values are replaced.
fn merge_value(labels: &mut Labels, name: &str, value: &str) {
    let merged = labels.get(name).and_then(|existing| {
        let mut ids = decode_ids(existing).ok()?;
        for id in decode_ids(value).ok()? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Some(encode_ids(&ids))
    });
    labels.insert(name.to_string(), merged.unwrap_or_else(|| value.to_string()));
}

fn decode_reference<T: DeserializeOwned>(
    labels: &LabelsByReference,
    id: WorkflowVersionNodeId,
    reference: ChannelId,
    label: &str,
) -> Result<Option<T>, WorkflowError> {
    labels
        .get(&reference)
        .and_then(|labels| labels.get(label))
        .map(|value| serde_json::from_str(value))
        .transpose()
        .map_err(|err| WorkflowError::invalid_parameters(id, format!("{}: {}", label, err)))
}

fn decode_ids(value: &str) -> Result<Vec<ChannelId>, serde_json::Error> {
    serde_json::from_str(value)
}

fn encode_ids(ids: &[ChannelId]) -> String {
    serde_json::Value::from(ids.to_vec()).to_string()
}

fn encode<T: Serialize + ?Sized>(
    workflow_version_node_id: WorkflowVersionNodeId,
    value: &T,
) -> Result<String, WorkflowError> {
    serde_json::to_string(value).map_err(|err| WorkflowError::Encoding {
        workflow_version_node_id,
        reason: err.to_string(),
    })
}
