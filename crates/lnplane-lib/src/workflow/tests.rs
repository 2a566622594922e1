use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{
    engine::{Activation, RunOutcome, WorkflowEngine, WorkflowEvent},
    filter::{FilterClauses, FilterValue, Record},
    graph::WorkflowGraph,
    label,
    parameters::{RebalanceConfiguration, RebalanceFocus, UnfocusedPathNode},
    triggers::{parse_schedule, WorkflowTriggerActor, WorkflowTriggerArgs, DEFAULT_CRON_TICK},
    WorkflowError, WorkflowNodeType, WorkflowVersion, WorkflowVersionNode,
    WorkflowVersionNodeLink,
};
use crate::{
    backend::RoutingPolicy,
    channel_state::ChannelState,
    commands::types::CommandResponse,
    events::{BalanceUpdateSource, ChannelBalanceEvent},
    rebalancer::{
        RebalanceDispatcher, RebalanceOrigin, RebalanceRequest, RebalanceResponse,
        RebalanceStatus,
    },
    store::{Store, TagStore, WorkflowStore},
    test_utils::{get_test_root_actor, wait_until, MockNode, TestPlane},
    types::{
        ChannelId, CustomSettings, Implementation, NodeId, ServiceType, Status, TaggedEntity,
    },
};

const VERSION_ID: u32 = 1;

#[derive(Default)]
struct RecordingDispatcher {
    submitted: Mutex<Vec<RebalanceRequest>>,
    cancelled_except: Mutex<Vec<(RebalanceOrigin, u32, Vec<ChannelId>)>>,
    cancelled: Mutex<Vec<(RebalanceOrigin, u32, ChannelId)>>,
}

#[async_trait::async_trait]
impl RebalanceDispatcher for RecordingDispatcher {
    async fn submit(&self, requests: Vec<RebalanceRequest>) -> Vec<RebalanceResponse> {
        self.submitted.lock().unwrap().extend(requests.clone());
        requests
            .into_iter()
            .map(|request| RebalanceResponse {
                request,
                status: RebalanceStatus::Running,
                message: None,
            })
            .collect()
    }

    fn cancel_rebalancers_except(
        &self,
        origin: RebalanceOrigin,
        origin_id: u32,
        active_channel_ids: &[ChannelId],
    ) {
        self.cancelled_except
            .lock()
            .unwrap()
            .push((origin, origin_id, active_channel_ids.to_vec()));
    }

    fn cancel_rebalancer(&self, origin: RebalanceOrigin, origin_id: u32, channel_id: ChannelId) {
        self.cancelled
            .lock()
            .unwrap()
            .push((origin, origin_id, channel_id));
    }
}

/// A ready LND node with channels to three distinct peers.
struct Fixture {
    plane: TestPlane,
    engine: WorkflowEngine<Store>,
    dispatcher: Arc<RecordingDispatcher>,
    node_id: NodeId,
    mock: Arc<MockNode>,
    peers: Vec<NodeId>,
    channels: Vec<ChannelId>,
}

impl Fixture {
    fn new() -> Self {
        let plane = TestPlane::new();
        let (node_id, mock) = plane.add_managed_node(Implementation::Lnd, CustomSettings::empty());
        plane.set_ready(node_id);
        let mut peers = Vec::new();
        let mut channels = Vec::new();
        for height in [700_001, 700_002, 700_003] {
            let peer = plane.add_peer_node(Implementation::Lnd);
            channels.push(plane.add_channel(height, node_id, peer, 1_000_000).channel_id);
            peers.push(peer);
        }
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = WorkflowEngine::new(
            plane.cache.clone(),
            plane.store.clone(),
            plane.command_bus(),
            dispatcher.clone(),
        );
        Self {
            plane,
            engine,
            dispatcher,
            node_id,
            mock,
            peers,
            channels,
        }
    }

    async fn run(
        &self,
        nodes: Vec<WorkflowVersionNode>,
        links: Vec<WorkflowVersionNodeLink>,
        activation: Activation,
    ) -> Result<RunOutcome, WorkflowError> {
        self.plane.store.save_workflow_version(version(nodes, links));
        self.engine
            .trigger(VERSION_ID, activation, &CancellationToken::new())
            .await
    }

    fn balance_event(&self, channel_id: ChannelId, local_balance_msat: u64) -> WorkflowEvent {
        WorkflowEvent::ChannelBalance(ChannelBalanceEvent {
            node_id: self.node_id,
            channel_id,
            source: BalanceUpdateSource::Forward,
            inbound: false,
            amount_msat: 1_000,
            capacity_msat: 1_000_000_000,
            previous_local_balance_msat: local_balance_msat + 1_000,
            previous_remote_balance_msat: 1_000_000_000 - local_balance_msat - 1_000,
            local_balance_msat,
            remote_balance_msat: 1_000_000_000 - local_balance_msat,
            timestamp: 1_700_000_000_000,
        })
    }
}

fn node(
    id: u32,
    node_type: WorkflowNodeType,
    stage: u32,
    parameters: Value,
) -> WorkflowVersionNode {
    WorkflowVersionNode {
        workflow_version_node_id: id,
        name: format!("{}-{}", node_type, id),
        node_type,
        stage,
        active: true,
        parameters: parameters.to_string(),
    }
}

fn link(
    link_id: u32,
    parent_id: u32,
    parent_output: &str,
    child_id: u32,
    child_input: &str,
) -> WorkflowVersionNodeLink {
    WorkflowVersionNodeLink {
        link_id,
        parent_id,
        parent_output: parent_output.to_string(),
        child_id,
        child_input: child_input.to_string(),
    }
}

fn version(
    nodes: Vec<WorkflowVersionNode>,
    links: Vec<WorkflowVersionNodeLink>,
) -> WorkflowVersion {
    WorkflowVersion {
        workflow_version_id: VERSION_ID,
        workflow_id: 1,
        name: "test workflow".to_string(),
        version: 1,
        active: true,
        nodes,
        links,
    }
}

fn channel_id_filter(func_name: &str, channel_id: ChannelId) -> Value {
    json!({
        "$filter": {
            "funcName": func_name,
            "key": "channelId",
            "parameter": channel_id,
            "category": "number"
        }
    })
}

fn ids(value: Option<&str>) -> Vec<ChannelId> {
    serde_json::from_str(value.expect("label present")).expect("channel ids")
}

/// trigger(1) -> source(2) -> {incoming filter(3), outgoing filter(4)} -> auto run(5)
fn rebalance_workflow(
    trigger: WorkflowNodeType,
    focal: ChannelId,
) -> (Vec<WorkflowVersionNode>, Vec<WorkflowVersionNodeLink>) {
    let nodes = vec![
        node(1, trigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(3, WorkflowNodeType::ChannelFilter, 1, channel_id_filter("eq", focal)),
        node(4, WorkflowNodeType::ChannelFilter, 1, channel_id_filter("neq", focal)),
        node(
            5,
            WorkflowNodeType::RebalanceAutoRun,
            1,
            json!({
                "focus": "incomingChannels",
                "amountMsat": 100_000,
                "maximumCostMsat": 10
            }),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
        link(3, 2, label::CHANNELS, 4, label::CHANNELS),
        link(4, 3, label::CHANNELS, 5, label::INCOMING_CHANNELS),
        link(5, 4, label::CHANNELS, 5, label::OUTGOING_CHANNELS),
    ];
    (nodes, links)
}

#[tokio::test]
async fn test_rebalance_fan_out_per_incoming_channel() {
    let fixture = Fixture::new();
    fixture
        .plane
        .set_active(ServiceType::LndServiceRebalanceService, fixture.node_id);
    let [c1, c2, c3] = fixture.channels[..] else {
        panic!("three channels");
    };
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ManualTrigger, c1);

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .expect("run workflow");

    let submitted = fixture.dispatcher.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    let request = &submitted[0];
    assert_eq!(request.origin, RebalanceOrigin::WorkflowNode);
    assert_eq!(request.origin_id, 5);
    assert_eq!(request.origin_reference, "manual");
    assert_eq!(request.node_id, fixture.node_id);
    assert_eq!(request.incoming_channel_id, c1);
    assert_eq!(request.outgoing_channel_id, 0);
    assert_eq!(request.channel_ids, vec![c2, c3]);
    assert_eq!(request.amount_msat, 100_000);
    assert_eq!(request.maximum_cost_msat, 10);
    assert_eq!(request.maximum_concurrency, 1);

    let path: Vec<UnfocusedPathNode> =
        serde_json::from_str(&request.workflow_unfocused_path).unwrap();
    let path_ids: Vec<u32> = path.iter().map(|n| n.workflow_version_node_id).collect();
    assert_eq!(path_ids, vec![2, 4]);

    assert_eq!(
        *fixture.dispatcher.cancelled_except.lock().unwrap(),
        vec![(RebalanceOrigin::WorkflowNode, 5, vec![c1])]
    );
    assert!(fixture.dispatcher.cancelled.lock().unwrap().is_empty());

    let responses: Vec<RebalanceResponse> =
        serde_json::from_str(outcome.output(5, label::STATUS).unwrap()).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, RebalanceStatus::Running);

    let settings: RebalanceConfiguration = serde_json::from_str(
        outcome
            .reference_output(5, c1, label::REBALANCE_SETTINGS)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(settings.focus, Some(RebalanceFocus::IncomingChannels));
    assert_eq!(settings.incoming_channel_ids, vec![c1]);
    assert_eq!(settings.outgoing_channel_ids, vec![c2, c3]);
}

#[tokio::test]
async fn test_event_run_cancels_only_inactive_event_channels() {
    let fixture = Fixture::new();
    fixture
        .plane
        .set_active(ServiceType::LndServiceRebalanceService, fixture.node_id);
    let [c1, c2, _] = fixture.channels[..] else {
        panic!("three channels");
    };
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ChannelBalanceEventTrigger, c1);
    let activation = Activation::new(1, "event")
        .with_events(vec![fixture.balance_event(c1, 100), fixture.balance_event(c2, 100)]);

    fixture.run(nodes, links, activation).await.expect("run workflow");

    assert!(fixture.dispatcher.cancelled_except.lock().unwrap().is_empty());
    assert_eq!(
        *fixture.dispatcher.cancelled.lock().unwrap(),
        vec![(RebalanceOrigin::WorkflowNode, 5, c2)]
    );
    assert_eq!(fixture.dispatcher.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rebalance_requires_active_rebalance_service() {
    let fixture = Fixture::new();
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ManualTrigger, fixture.channels[0]);

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();

    assert_eq!(outcome.status(5), Status::Inactive);
    assert_eq!(
        outcome.failure(5),
        Some(WorkflowError::RebalanceServiceInactive(fixture.node_id).to_string().as_str())
    );
    assert!(fixture.dispatcher.submitted.lock().unwrap().is_empty());
    let logs = fixture.plane.store.get_workflow_node_logs(VERSION_ID);
    let failed = logs
        .iter()
        .find(|log| log.workflow_version_node_id == 5)
        .expect("log of the failing node");
    assert!(failed.error_data.as_deref().unwrap().contains("Rebalance service"));
}

#[tokio::test]
async fn test_every_executed_node_is_logged() {
    let fixture = Fixture::new();
    fixture
        .plane
        .set_active(ServiceType::LndServiceRebalanceService, fixture.node_id);
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ManualTrigger, fixture.channels[0]);

    fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .expect("run workflow");

    let logs = fixture.plane.store.get_workflow_node_logs(VERSION_ID);
    let mut logged: Vec<u32> = logs.iter().map(|log| log.workflow_version_node_id).collect();
    logged.sort();
    assert_eq!(logged, vec![2, 3, 4, 5]);
    for log in &logs {
        assert_eq!(log.triggering_workflow_version_node_id, Some(1));
        assert_eq!(log.trigger_reference, "manual");
        assert!(log.error_data.is_none());
        let input: Vec<Value> = serde_json::from_str(&log.input_data).unwrap();
        assert_eq!(input.len(), 2);
    }
}

#[tokio::test]
async fn test_cyclic_workflow_is_rejected() {
    let fixture = Fixture::new();
    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelFilter, 1, json!({})),
        node(3, WorkflowNodeType::ChannelFilter, 1, json!({})),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
        link(3, 3, label::CHANNELS, 2, label::CHANNELS),
    ];

    let result = fixture.run(nodes, links, Activation::new(1, "manual")).await;

    assert_eq!(
        result.unwrap_err(),
        WorkflowError::CycleDetected {
            workflow_version_id: VERSION_ID
        }
    );
    assert!(fixture.plane.store.get_workflow_node_logs(VERSION_ID).is_empty());
}

#[test]
fn test_dangling_link_is_rejected() {
    let version = version(
        vec![node(1, WorkflowNodeType::ManualTrigger, 1, json!({}))],
        vec![link(7, 1, label::CHANNELS, 9, label::CHANNELS)],
    );
    assert_eq!(
        WorkflowGraph::new(&version).unwrap_err(),
        WorkflowError::DanglingLink {
            link_id: 7,
            workflow_version_node_id: 9
        }
    );
}

#[tokio::test]
async fn test_unknown_version_and_trigger() {
    let fixture = Fixture::new();
    let result = fixture
        .engine
        .trigger(42, Activation::new(1, "manual"), &CancellationToken::new())
        .await;
    assert_eq!(result.unwrap_err(), WorkflowError::VersionNotFound(42));

    let nodes = vec![node(1, WorkflowNodeType::ManualTrigger, 1, json!({}))];
    let result = fixture.run(nodes, vec![], Activation::new(9, "manual")).await;
    assert_eq!(result.unwrap_err(), WorkflowError::NodeNotFound(9));
}

#[tokio::test]
async fn test_channel_source_modes() {
    let fixture = Fixture::new();
    let [c1, c2, c3] = fixture.channels[..] else {
        panic!("three channels");
    };
    // A channel between two managed nodes is never part of all channels.
    let (other, _) = fixture
        .plane
        .add_managed_node(Implementation::Lnd, CustomSettings::empty());
    fixture.plane.add_channel(700_004, fixture.node_id, other, 1_000_000);

    let nodes = vec![
        node(1, WorkflowNodeType::ChannelBalanceEventTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(3, WorkflowNodeType::ChannelSource, 1, json!({"source": "event"})),
        node(4, WorkflowNodeType::ChannelSource, 1, json!({"source": "eventXorAll"})),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 1, label::CHANNELS, 3, label::CHANNELS),
        link(3, 1, label::CHANNELS, 4, label::CHANNELS),
    ];

    let with_event = Activation::new(1, "event").with_events(vec![fixture.balance_event(c2, 100)]);
    let outcome = fixture
        .run(nodes.clone(), links.clone(), with_event)
        .await
        .unwrap();
    assert_eq!(ids(outcome.output(2, label::CHANNELS)), vec![c1, c2, c3]);
    assert_eq!(ids(outcome.output(3, label::CHANNELS)), vec![c2]);
    assert_eq!(ids(outcome.output(4, label::CHANNELS)), vec![c2]);

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "eventless"))
        .await
        .unwrap();
    assert!(ids(outcome.output(3, label::CHANNELS)).is_empty());
    assert_eq!(ids(outcome.output(4, label::CHANNELS)), vec![c1, c2, c3]);
}

fn balance_filter_workflow(
    ignore_when_eventless: bool,
) -> (Vec<WorkflowVersionNode>, Vec<WorkflowVersionNodeLink>) {
    let nodes = vec![
        node(1, WorkflowNodeType::ChannelBalanceEventTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(
            3,
            WorkflowNodeType::ChannelBalanceEventFilter,
            1,
            json!({
                "filterClauses": {
                    "$filter": {
                        "funcName": "gt",
                        "key": "localBalancePerMilli",
                        "parameter": 500,
                        "category": "number"
                    }
                },
                "ignoreWhenEventless": ignore_when_eventless
            }),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
    ];
    (nodes, links)
}

#[tokio::test]
async fn test_channel_balance_event_filter() {
    let fixture = Fixture::new();
    let [c1, c2, c3] = fixture.channels[..] else {
        panic!("three channels");
    };

    let (nodes, links) = balance_filter_workflow(false);
    let activation = Activation::new(1, "event").with_events(vec![
        fixture.balance_event(c1, 800_000_000),
        fixture.balance_event(c2, 100_000_000),
    ]);
    let outcome = fixture.run(nodes.clone(), links.clone(), activation).await.unwrap();
    assert_eq!(ids(outcome.output(3, label::CHANNELS)), vec![c1]);

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "eventless"))
        .await
        .unwrap();
    assert_eq!(outcome.failure(3), Some(WorkflowError::NoEvents(3).to_string().as_str()));
    assert_eq!(outcome.output(3, label::CHANNELS), None);

    let (nodes, links) = balance_filter_workflow(true);
    let outcome = fixture
        .run(nodes, links, Activation::new(1, "eventless"))
        .await
        .unwrap();
    assert_eq!(ids(outcome.output(3, label::CHANNELS)), vec![c1, c2, c3]);
}

#[tokio::test]
async fn test_filter_requires_linked_channels() {
    let fixture = Fixture::new();
    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelFilter, 1, json!({})),
        node(3, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(4, WorkflowNodeType::ChannelFilter, 1, json!({})),
    ];
    let links = vec![
        link(1, 1, label::EVENTS, 2, "unrelated"),
        link(2, 1, label::CHANNELS, 3, label::CHANNELS),
        link(3, 2, label::CHANNELS, 4, label::CHANNELS),
    ];

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();

    let missing = WorkflowError::MissingInput {
        workflow_version_node_id: 2,
        label: label::CHANNELS.to_string(),
    };
    assert_eq!(outcome.failure(2), Some(missing.to_string().as_str()));
    assert_eq!(outcome.status(2), Status::Inactive);
    // The sibling still runs, the failed node's child never becomes ready.
    assert_eq!(outcome.status(3), Status::Active);
    assert_eq!(ids(outcome.output(3, label::CHANNELS)), fixture.channels);
    assert_eq!(outcome.status(4), Status::Pending);
    let logs = fixture.plane.store.get_workflow_node_logs(VERSION_ID);
    assert_eq!(logs.len(), 2);
}

struct PanickingDispatcher;

#[async_trait::async_trait]
impl RebalanceDispatcher for PanickingDispatcher {
    async fn submit(&self, _requests: Vec<RebalanceRequest>) -> Vec<RebalanceResponse> {
        panic!("rebalancer lost its channel");
    }

    fn cancel_rebalancers_except(&self, _: RebalanceOrigin, _: u32, _: &[ChannelId]) {}

    fn cancel_rebalancer(&self, _: RebalanceOrigin, _: u32, _: ChannelId) {}
}

#[tokio::test]
async fn test_panicking_node_is_logged_and_fails() {
    let fixture = Fixture::new();
    fixture
        .plane
        .set_active(ServiceType::LndServiceRebalanceService, fixture.node_id);
    let engine = WorkflowEngine::new(
        fixture.plane.cache.clone(),
        fixture.plane.store.clone(),
        fixture.plane.command_bus(),
        Arc::new(PanickingDispatcher),
    );
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ManualTrigger, fixture.channels[0]);
    fixture.plane.store.save_workflow_version(version(nodes, links));

    let outcome = engine
        .trigger(VERSION_ID, Activation::new(1, "manual"), &CancellationToken::new())
        .await
        .expect("a panic stays inside the node");

    assert_eq!(outcome.status(2), Status::Active);
    assert_eq!(outcome.status(5), Status::Inactive);
    let failure = outcome.failure(5).expect("failure of the rebalance node");
    assert!(failure.contains("rebalancer lost its channel"));
    let logs = fixture.plane.store.get_workflow_node_logs(VERSION_ID);
    let logged = logs
        .iter()
        .find(|log| log.workflow_version_node_id == 5)
        .expect("log of the panicking node");
    assert!(logged.error_data.as_deref().unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_tags_on_channels_and_peers() {
    let fixture = Fixture::new();
    let [c1, _, _] = fixture.channels[..] else {
        panic!("three channels");
    };
    let (other, _) = fixture
        .plane
        .add_managed_node(Implementation::Lnd, CustomSettings::empty());
    let shared = fixture
        .plane
        .add_channel(700_004, fixture.node_id, other, 1_000_000)
        .channel_id;

    let nodes = vec![
        node(1, WorkflowNodeType::ChannelBalanceEventTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "event"})),
        node(
            3,
            WorkflowNodeType::AddTag,
            1,
            json!({"addedTags": [7, 0], "applyTo": "nodes"}),
        ),
        node(
            4,
            WorkflowNodeType::AddTag,
            1,
            json!({"addedTags": [8], "applyTo": "channels"}),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
        link(3, 2, label::CHANNELS, 4, label::CHANNELS),
    ];
    let activation = Activation::new(1, "event")
        .with_events(vec![fixture.balance_event(c1, 1), fixture.balance_event(shared, 1)]);
    fixture.run(nodes, links, activation).await.unwrap();

    let registry = &fixture.plane.registry;
    assert_eq!(registry.get_tag_ids(TaggedEntity::Node(fixture.peers[0])), vec![7]);
    assert!(registry.get_tag_ids(TaggedEntity::Node(other)).is_empty());
    assert!(registry.get_tag_ids(TaggedEntity::Node(fixture.node_id)).is_empty());
    assert_eq!(registry.get_tag_ids(TaggedEntity::Channel(c1)), vec![8]);
    assert_eq!(registry.get_tag_ids(TaggedEntity::Channel(shared)), vec![8]);
    let stored = fixture.plane.store.get_tagged_entities();
    assert!(stored.contains(&(TaggedEntity::Node(fixture.peers[0]), 7)));
    assert!(stored.contains(&(TaggedEntity::Channel(c1), 8)));

    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(
            3,
            WorkflowNodeType::RemoveTag,
            1,
            json!({"removedTags": [7], "applyTo": "nodes"}),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
    ];
    fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();
    assert!(registry
        .get_tag_ids(TaggedEntity::Node(fixture.peers[0]))
        .is_empty());
    assert!(!fixture
        .plane
        .store
        .get_tagged_entities()
        .contains(&(TaggedEntity::Node(fixture.peers[0]), 7)));
}

#[tokio::test]
async fn test_policy_auto_run_applies_merged_configuration() {
    let fixture = Fixture::new();
    let [c1, _, _] = fixture.channels[..] else {
        panic!("three channels");
    };
    fixture.plane.cache.set_channel_state(ChannelState {
        node_id: fixture.node_id,
        channel_id: c1,
        remote_node_id: fixture.peers[0],
        status: Status::Active,
        capacity_msat: 1_000_000_000,
        local_balance_msat: 500_000_000,
        remote_balance_msat: 500_000_000,
        local_routing_policy: RoutingPolicy {
            disabled: false,
            time_lock_delta: 40,
            min_htlc_msat: 1_000,
            max_htlc_msat: 990_000_000,
            fee_base_msat: 1_000,
            fee_rate_milli_msat: 300,
        },
        ..Default::default()
    });

    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(3, WorkflowNodeType::ChannelFilter, 1, channel_id_filter("eq", c1)),
        node(
            4,
            WorkflowNodeType::ChannelPolicyConfigurator,
            1,
            json!({"fee_base_msat": 2_000}),
        ),
        node(
            5,
            WorkflowNodeType::ChannelPolicyAutoRun,
            1,
            json!({"fee_rate_milli_msat": 500}),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
        link(3, 3, label::CHANNELS, 4, label::CHANNELS),
        link(4, 4, label::CHANNELS, 5, label::CHANNELS),
    ];

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();

    let updates = fixture.mock.with_state(|s| s.policy_updates.clone());
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].policy.fee_rate_milli_msat, Some(500));
    assert_eq!(updates[0].policy.fee_base_msat, Some(2_000));
    let responses: Vec<CommandResponse<()>> =
        serde_json::from_str(outcome.output(5, label::STATUS).unwrap()).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, Status::Active);
}

#[tokio::test]
async fn test_policy_run_on_unmanaged_channel_fails() {
    let fixture = Fixture::new();
    let stranger = fixture.plane.add_peer_node(Implementation::Lnd);
    let unmanaged = fixture
        .plane
        .add_channel(700_009, fixture.peers[0], stranger, 1_000_000)
        .channel_id;

    let nodes = vec![
        node(1, WorkflowNodeType::ChannelBalanceEventTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "event"})),
        node(
            3,
            WorkflowNodeType::ChannelPolicyAutoRun,
            1,
            json!({"fee_rate_milli_msat": 500}),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
    ];
    let activation =
        Activation::new(1, "event").with_events(vec![fixture.balance_event(unmanaged, 1)]);

    let outcome = fixture.run(nodes, links, activation).await.unwrap();

    let unmanaged_error = WorkflowError::UnmanagedChannel {
        workflow_version_node_id: 3,
        channel_id: unmanaged,
    };
    assert_eq!(outcome.failure(3), Some(unmanaged_error.to_string().as_str()));
    assert!(fixture.mock.with_state(|s| s.policy_updates.is_empty()));
}

#[tokio::test]
async fn test_variables_cross_stages() {
    let fixture = Fixture::new();
    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"})),
        node(
            3,
            WorkflowNodeType::SetVariable,
            1,
            json!({"variableName": "mode", "value": "drain"}),
        ),
        node(4, WorkflowNodeType::StageTrigger, 2, json!({})),
        node(
            5,
            WorkflowNodeType::FilterOnVariable,
            2,
            json!({"variableName": "mode", "value": "drain"}),
        ),
        node(
            6,
            WorkflowNodeType::FilterOnVariable,
            2,
            json!({"variableName": "mode", "value": "fill"}),
        ),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
        link(3, 4, label::CHANNELS, 5, label::CHANNELS),
        link(4, 4, label::CHANNELS, 6, label::CHANNELS),
    ];

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();

    assert_eq!(outcome.output(3, "mode"), Some("drain"));
    assert_eq!(outcome.status(4), Status::Active);
    assert_eq!(ids(outcome.output(5, label::CHANNELS)), fixture.channels);
    assert!(ids(outcome.output(6, label::CHANNELS)).is_empty());
}

#[tokio::test]
async fn test_inactive_parent_blocks_children() {
    let fixture = Fixture::new();
    let mut source = node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "all"}));
    source.active = false;
    let nodes = vec![
        node(1, WorkflowNodeType::ManualTrigger, 1, json!({})),
        source,
        node(3, WorkflowNodeType::ChannelFilter, 1, json!({})),
    ];
    let links = vec![
        link(1, 1, label::CHANNELS, 2, label::CHANNELS),
        link(2, 2, label::CHANNELS, 3, label::CHANNELS),
    ];

    let outcome = fixture
        .run(nodes, links, Activation::new(1, "manual"))
        .await
        .unwrap();

    assert_eq!(outcome.status(3), Status::Pending);
    assert!(fixture.plane.store.get_workflow_node_logs(VERSION_ID).is_empty());
}

#[tokio::test]
async fn test_cancelled_run_stops() {
    let fixture = Fixture::new();
    let (nodes, links) = rebalance_workflow(WorkflowNodeType::ManualTrigger, fixture.channels[0]);
    fixture.plane.store.save_workflow_version(version(nodes, links));
    let token = CancellationToken::new();
    token.cancel();

    let result = fixture
        .engine
        .trigger(VERSION_ID, Activation::new(1, "manual"), &token)
        .await;

    assert_eq!(result.unwrap_err(), WorkflowError::Cancelled(VERSION_ID));
}

#[test]
fn test_rebalance_configuration_merge() {
    let node_parameters = RebalanceConfiguration {
        focus: Some(RebalanceFocus::OutgoingChannels),
        amount_msat: Some(50_000),
        maximum_cost_milli_msat: Some(2_000),
        ..Default::default()
    };
    let upstream = RebalanceConfiguration {
        focus: Some(RebalanceFocus::OutgoingChannels),
        maximum_cost_msat: Some(99),
        ..Default::default()
    };
    let merged = node_parameters
        .configure(Some(upstream), 4, &[1, 2], &[], 10)
        .unwrap();
    assert_eq!(merged.incoming_channel_ids, vec![1, 2]);
    assert_eq!(merged.outgoing_channel_ids, vec![4]);
    assert_eq!(merged.maximum_cost_msat, None);
    assert_eq!(merged.maximum_cost(), 100);
    assert!(merged.is_runnable());

    // No unfocused channels upstream: the settings are still emitted, no request is made.
    let lonely = node_parameters.configure(None, 4, &[], &[], 10).unwrap();
    assert_eq!(lonely.outgoing_channel_ids, vec![4]);
    assert!(lonely.incoming_channel_ids.is_empty());
    assert!(!lonely.is_runnable());

    let mismatch = RebalanceConfiguration {
        focus: Some(RebalanceFocus::IncomingChannels),
        ..Default::default()
    };
    assert_eq!(
        node_parameters.configure(Some(mismatch), 4, &[], &[], 10),
        Err(WorkflowError::FocusMismatch(10))
    );
}

fn record(fields: Vec<(&str, FilterValue)>) -> Record {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect::<BTreeMap<_, _>>()
}

fn matches(clauses: Value, record: &Record) -> bool {
    let clauses: FilterClauses = serde_json::from_value(clauses).unwrap();
    clauses.compile().evaluate(record)
}

fn predicate(func_name: &str, key: &str, parameter: Value, category: &str) -> Value {
    json!({
        "$filter": {
            "funcName": func_name,
            "key": key,
            "parameter": parameter,
            "category": category
        }
    })
}

#[test]
fn test_filter_groups() {
    let record = record(vec![("capacity", FilterValue::Number(5.0))]);
    assert!(matches(json!({"$and": []}), &record));
    assert!(!matches(json!({"$or": []}), &record));
    assert!(!matches(json!({}), &record));
    assert!(matches(
        json!({"$and": [
            predicate("gt", "capacity", json!(1), "number"),
            {"$or": [
                predicate("lt", "capacity", json!(2), "number"),
                predicate("eq", "capacity", json!("5"), "number")
            ]}
        ]}),
        &record
    ));
    assert!(!matches(
        json!({"$and": [
            predicate("gt", "capacity", json!(1), "number"),
            predicate("gt", "capacity", json!(10), "number")
        ]}),
        &record
    ));
}

#[test]
fn test_filter_predicates() {
    let record = record(vec![
        ("capacity", FilterValue::Number(5.0)),
        ("alias", FilterValue::String("Alpha Node".to_string())),
        (
            "fundedon",
            FilterValue::Date("2024-01-01T10:00:30Z".parse().unwrap()),
        ),
        ("tags", FilterValue::Tags(vec![1, 2])),
        ("private", FilterValue::Boolean(false)),
        ("empty", FilterValue::Null),
    ]);

    // A key the record does not carry lets it through.
    assert!(matches(predicate("gt", "missing", json!(1), "number"), &record));
    assert!(matches(predicate("eq", "Capacity", json!(5), "number"), &record));
    assert!(matches(predicate("like", "alias", json!("alp"), "string"), &record));
    assert!(!matches(predicate("notLike", "alias", json!("alp"), "string"), &record));
    assert!(matches(
        predicate("eq", "fundedOn", json!("2024-01-01T10:00:00Z"), "date"),
        &record
    ));
    assert!(matches(predicate("any", "tags", json!([2, 3]), "tag"), &record));
    assert!(matches(predicate("notAny", "tags", json!([3]), "tag"), &record));
    assert!(matches(predicate("eq", "private", json!(false), "boolean"), &record));

    // Unknown or unsupported comparators evaluate to false.
    assert!(!matches(predicate("between", "capacity", json!(1), "number"), &record));
    assert!(!matches(predicate("like", "capacity", json!(5), "number"), &record));

    // Nulls never panic.
    assert!(matches(predicate("eq", "empty", Value::Null, "number"), &record));
    assert!(matches(predicate("neq", "empty", json!(1), "number"), &record));
    assert!(!matches(predicate("gt", "empty", json!(1), "number"), &record));
    assert!(!matches(predicate("eq", "capacity", Value::Null, "number"), &record));
}

#[test]
fn test_cron_expressions() {
    assert!(parse_schedule("*/5 * * * *").is_ok());
    assert!(parse_schedule("0 0 12 * * Mon").is_ok());
    assert!(parse_schedule("every minute").is_err());
}

#[tokio::test]
async fn test_trigger_actor_runs_on_balance_events() {
    let fixture = Fixture::new();
    let c1 = fixture.channels[0];
    let nodes = vec![
        node(1, WorkflowNodeType::ChannelBalanceEventTrigger, 1, json!({})),
        node(2, WorkflowNodeType::ChannelSource, 1, json!({"source": "event"})),
    ];
    let links = vec![link(1, 1, label::CHANNELS, 2, label::CHANNELS)];
    fixture.plane.store.save_workflow_version(version(nodes, links));

    let root = get_test_root_actor().await;
    let engine = Arc::new(WorkflowEngine::new(
        fixture.plane.cache.clone(),
        fixture.plane.store.clone(),
        fixture.plane.command_bus(),
        fixture.dispatcher.clone(),
    ));
    let token = CancellationToken::new();
    let actor = WorkflowTriggerActor::start(
        WorkflowTriggerArgs {
            engine,
            events: fixture.plane.events.clone(),
            tracker: tokio_util::task::TaskTracker::new(),
            token: token.clone(),
            cron_tick: DEFAULT_CRON_TICK,
        },
        root.get_cell(),
    )
    .await
    .expect("start trigger actor");

    let WorkflowEvent::ChannelBalance(event) = fixture.balance_event(c1, 100) else {
        unreachable!();
    };
    fixture.plane.events.channel_balance.send(event);

    let store = fixture.plane.store.clone();
    wait_until(|| !store.get_workflow_node_logs(VERSION_ID).is_empty()).await;
    let logs = store.get_workflow_node_logs(VERSION_ID);
    assert_eq!(logs[0].workflow_version_node_id, 2);
    let (outputs, _): (BTreeMap<String, String>, Value) =
        serde_json::from_str(&logs[0].output_data).unwrap();
    assert_eq!(outputs[label::CHANNELS], format!("[{}]", c1));

    token.cancel();
    actor.stop(None);
}
