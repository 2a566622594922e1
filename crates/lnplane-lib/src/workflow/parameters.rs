//! JSON parameters of the node types and the per-channel configurations nodes hand to each
//! other.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{WorkflowError, WorkflowNodeType, WorkflowVersionNode};
use crate::{
    commands::types::PolicyUpdate,
    types::{ChannelId, TagId, WorkflowVersionNodeId},
    workflow::filter::FilterClauses,
};

/// Empty parameters parse like `{}`.
pub fn parse<T: DeserializeOwned>(node: &WorkflowVersionNode) -> Result<T, WorkflowError> {
    let parameters = match node.parameters.trim() {
        "" => "{}",
        parameters => parameters,
    };
    serde_json::from_str(parameters)
        .map_err(|err| WorkflowError::invalid_parameters(node.workflow_version_node_id, err))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalTriggerParameters {
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTriggerParameters {
    pub cron_value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelSourceKind {
    #[default]
    All,
    Event,
    /// The event channels, or every channel when the run carries none.
    EventXorAll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSourceParameters {
    #[serde(default)]
    pub source: ChannelSourceKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBalanceEventFilterParameters {
    #[serde(default)]
    pub filter_clauses: FilterClauses,
    #[serde(default)]
    pub ignore_when_eventless: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagTarget {
    /// The peer end of each channel.
    Nodes,
    Channels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagParameters {
    #[serde(default)]
    pub added_tags: Vec<TagId>,
    #[serde(default)]
    pub removed_tags: Vec<TagId>,
    pub apply_to: TagTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableParameters {
    pub variable_name: String,
    pub value: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPolicyConfiguration {
    #[serde(default)]
    pub channel_id: ChannelId,
    #[serde(flatten)]
    pub policy: PolicyUpdate,
}

impl RoutingPolicyConfiguration {
    /// Fields set on `self` override the upstream configuration.
    pub fn merge_into(&self, upstream: Option<Self>, channel_id: ChannelId) -> Self {
        let mut merged = upstream.unwrap_or_default();
        let policy = &self.policy;
        if policy.fee_base_msat.is_some() {
            merged.policy.fee_base_msat = policy.fee_base_msat;
        }
        if policy.fee_rate_milli_msat.is_some() {
            merged.policy.fee_rate_milli_msat = policy.fee_rate_milli_msat;
        }
        if policy.max_htlc_msat.is_some() {
            merged.policy.max_htlc_msat = policy.max_htlc_msat;
        }
        if policy.min_htlc_msat.is_some() {
            merged.policy.min_htlc_msat = policy.min_htlc_msat;
        }
        if policy.time_lock_delta.is_some() {
            merged.policy.time_lock_delta = policy.time_lock_delta;
        }
        merged.channel_id = channel_id;
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum RebalanceFocus {
    IncomingChannels,
    OutgoingChannels,
}

/// An ancestor on the unfocused side of a rebalance node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfocusedPathNode {
    pub workflow_version_node_id: WorkflowVersionNodeId,
    pub name: String,
    pub node_type: WorkflowNodeType,
    pub stage: u32,
}

impl From<&WorkflowVersionNode> for UnfocusedPathNode {
    fn from(node: &WorkflowVersionNode) -> Self {
        Self {
            workflow_version_node_id: node.workflow_version_node_id,
            name: node.name.clone(),
            node_type: node.node_type,
            stage: node.stage,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceConfiguration {
    pub focus: Option<RebalanceFocus>,
    pub amount_msat: Option<u64>,
    pub maximum_cost_msat: Option<u64>,
    /// Parts per million of the amount.
    pub maximum_cost_milli_msat: Option<u64>,
    #[serde(default)]
    pub incoming_channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub outgoing_channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub workflow_unfocused_path: Vec<UnfocusedPathNode>,
}

impl RebalanceConfiguration {
    /// Merges the node's parameters (`self`) into the upstream configuration of one focal
    /// channel. Of the two cost limits the one set last wins.
    pub fn configure(
        &self,
        upstream: Option<RebalanceConfiguration>,
        channel_id: ChannelId,
        incoming_channel_ids: &[ChannelId],
        outgoing_channel_ids: &[ChannelId],
        workflow_version_node_id: WorkflowVersionNodeId,
    ) -> Result<RebalanceConfiguration, WorkflowError> {
        let mut merged = upstream.unwrap_or_default();
        if merged.focus.is_some() && merged.focus != self.focus {
            return Err(WorkflowError::FocusMismatch(workflow_version_node_id));
        }
        merged.focus = self.focus;
        if self.amount_msat.is_some() {
            merged.amount_msat = self.amount_msat;
        }
        if self.maximum_cost_milli_msat.is_some() {
            merged.maximum_cost_milli_msat = self.maximum_cost_milli_msat;
            merged.maximum_cost_msat = None;
        }
        if self.maximum_cost_msat.is_some() {
            merged.maximum_cost_milli_msat = None;
            merged.maximum_cost_msat = self.maximum_cost_msat;
        }
        match self.focus {
            Some(RebalanceFocus::IncomingChannels) => {
                merged.incoming_channel_ids = vec![channel_id];
                if !outgoing_channel_ids.is_empty() {
                    merged.outgoing_channel_ids = outgoing_channel_ids.to_vec();
                }
            }
            Some(RebalanceFocus::OutgoingChannels) => {
                if !incoming_channel_ids.is_empty() {
                    merged.incoming_channel_ids = incoming_channel_ids.to_vec();
                }
                merged.outgoing_channel_ids = vec![channel_id];
            }
            None => {}
        }
        Ok(merged)
    }

    pub fn maximum_cost(&self) -> u64 {
        match (self.maximum_cost_milli_msat, self.maximum_cost_msat) {
            (Some(ppm), _) => {
                let amount = self.amount_msat.unwrap_or_default();
                (ppm as u128 * amount as u128 / 1_000_000) as u64
            }
            (None, Some(msat)) => msat,
            (None, None) => 0,
        }
    }

    /// A request needs an amount and channels on both sides. Settings with an empty side are
    /// still emitted, they just never reach the rebalancer.
    pub fn is_runnable(&self) -> bool {
        self.amount_msat.is_some()
            && !self.incoming_channel_ids.is_empty()
            && !self.outgoing_channel_ids.is_empty()
    }
}
