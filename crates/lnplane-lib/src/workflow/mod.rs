//! Operator-defined automations: staged DAGs of typed nodes exchanging channel sets and
//! per-channel configurations.
//!
//! A [`WorkflowVersion`] is the persisted definition. [`graph::WorkflowGraph`] turns it into
//! an arena the [`engine::WorkflowEngine`] walks, and [`triggers::WorkflowTriggerActor`]
//! decides when a version runs.

pub mod engine;
pub mod filter;
pub mod graph;
pub mod parameters;
pub mod triggers;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChannelId, NodeId, WorkflowVersionId, WorkflowVersionNodeId};

pub type WorkflowVersionNodeLinkId = u32;

/// Values exchanged between nodes, keyed by label. Every value is a JSON document.
pub type Labels = BTreeMap<String, String>;
/// [`Labels`] per referenced channel.
pub type LabelsByReference = BTreeMap<ChannelId, Labels>;

pub mod label {
    pub const CHANNELS: &str = "channels";
    pub const INCOMING_CHANNELS: &str = "incomingChannels";
    pub const OUTGOING_CHANNELS: &str = "outgoingChannels";
    pub const EVENT_CHANNELS: &str = "eventChannels";
    pub const ALL_CHANNELS: &str = "allChannels";
    pub const EVENTS: &str = "events";
    pub const ROUTING_POLICY_SETTINGS: &str = "routingPolicySettings";
    pub const REBALANCE_SETTINGS: &str = "rebalanceSettings";
    pub const STATUS: &str = "status";

    /// Carried along every per-reference path whether or not a link names them.
    pub const ENFORCED: [&str; 2] = [ROUTING_POLICY_SETTINGS, REBALANCE_SETTINGS];
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum WorkflowNodeType {
    Trigger,
    IntervalTrigger,
    CronTrigger,
    ChannelBalanceEventTrigger,
    ChannelOpenEventTrigger,
    ChannelCloseEventTrigger,
    ManualTrigger,
    StageTrigger,
    ChannelSource,
    ChannelFilter,
    ChannelBalanceEventFilter,
    AddTag,
    RemoveTag,
    ChannelPolicyConfigurator,
    ChannelPolicyAutoRun,
    ChannelPolicyRun,
    RebalanceConfigurator,
    RebalanceAutoRun,
    RebalanceRun,
    SetVariable,
    FilterOnVariable,
}

impl WorkflowNodeType {
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            WorkflowNodeType::Trigger
                | WorkflowNodeType::IntervalTrigger
                | WorkflowNodeType::CronTrigger
                | WorkflowNodeType::ChannelBalanceEventTrigger
                | WorkflowNodeType::ChannelOpenEventTrigger
                | WorkflowNodeType::ChannelCloseEventTrigger
                | WorkflowNodeType::ManualTrigger
                | WorkflowNodeType::StageTrigger
        )
    }

    /// Triggers and groups are marked done without being executed.
    pub fn is_grouped(&self) -> bool {
        self.is_trigger()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowVersionNode {
    pub workflow_version_node_id: WorkflowVersionNodeId,
    pub name: String,
    pub node_type: WorkflowNodeType,
    pub stage: u32,
    pub active: bool,
    /// JSON document whose shape depends on `node_type`, see [`parameters`].
    pub parameters: String,
}

/// A directed edge: `parent_output` of the parent feeds `child_input` of the child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowVersionNodeLink {
    pub link_id: WorkflowVersionNodeLinkId,
    pub parent_id: WorkflowVersionNodeId,
    pub parent_output: String,
    pub child_id: WorkflowVersionNodeId,
    pub child_input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_version_id: WorkflowVersionId,
    pub workflow_id: u32,
    pub name: String,
    pub version: u32,
    pub active: bool,
    pub nodes: Vec<WorkflowVersionNode>,
    pub links: Vec<WorkflowVersionNodeLink>,
}

/// One execution of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNodeLog {
    pub workflow_version_id: WorkflowVersionId,
    pub workflow_version_node_id: WorkflowVersionNodeId,
    pub triggering_workflow_version_node_id: Option<WorkflowVersionNodeId>,
    pub trigger_reference: String,
    /// `[inputs, inputs by reference]` as JSON.
    pub input_data: String,
    /// `[outputs, outputs by reference]` as JSON.
    pub output_data: String,
    pub error_data: Option<String>,
    /// Unix millis
    pub created_on: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow version {workflow_version_id} has a cyclic link set")]
    CycleDetected { workflow_version_id: WorkflowVersionId },
    #[error("Workflow version {workflow_version_id} did not converge in stage {stage}")]
    IterationLimit {
        workflow_version_id: WorkflowVersionId,
        stage: u32,
    },
    #[error("Workflow version {0} not found")]
    VersionNotFound(WorkflowVersionId),
    #[error("Workflow node {0} not found")]
    NodeNotFound(WorkflowVersionNodeId),
    #[error("Link {link_id} points to unknown node {workflow_version_node_id}")]
    DanglingLink {
        link_id: WorkflowVersionNodeLinkId,
        workflow_version_node_id: WorkflowVersionNodeId,
    },
    #[error("Invalid parameters for node {workflow_version_node_id}: {reason}")]
    InvalidParameters {
        workflow_version_node_id: WorkflowVersionNodeId,
        reason: String,
    },
    #[error("Input {label} of node {workflow_version_node_id} is missing or empty")]
    MissingInput {
        workflow_version_node_id: WorkflowVersionNodeId,
        label: String,
    },
    #[error("No event to filter for node {0}")]
    NoEvents(WorkflowVersionNodeId),
    #[error("Rebalance settings of node {0} have a mismatching focus")]
    FocusMismatch(WorkflowVersionNodeId),
    #[error("Channel {channel_id} of node {workflow_version_node_id} has no managed end")]
    UnmanagedChannel {
        workflow_version_node_id: WorkflowVersionNodeId,
        channel_id: ChannelId,
    },
    #[error("Rebalance service is not active for node {0}")]
    RebalanceServiceInactive(NodeId),
    #[error("Failed to encode the outputs of node {workflow_version_node_id}: {reason}")]
    Encoding {
        workflow_version_node_id: WorkflowVersionNodeId,
        reason: String,
    },
    #[error("Workflow node {workflow_version_node_id} panicked: {message}")]
    Panicked {
        workflow_version_node_id: WorkflowVersionNodeId,
        message: String,
    },
    #[error("Workflow version {0} was cancelled")]
    Cancelled(WorkflowVersionId),
}

impl WorkflowError {
    pub(crate) fn invalid_parameters(
        workflow_version_node_id: WorkflowVersionNodeId,
        reason: impl ToString,
    ) -> Self {
        WorkflowError::InvalidParameters {
            workflow_version_node_id,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn missing_input(
        workflow_version_node_id: WorkflowVersionNodeId,
        label: &str,
    ) -> Self {
        WorkflowError::MissingInput {
            workflow_version_node_id,
            label: label.to_string(),
        }
    }
}
