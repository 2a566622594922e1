use std::collections::{BTreeMap, HashMap};

use super::{
    WorkflowError, WorkflowNodeType, WorkflowVersion, WorkflowVersionNode, WorkflowVersionNodeLink,
    WorkflowVersionNodeLinkId,
};
use crate::types::{WorkflowVersionId, WorkflowVersionNodeId};

/// Arena view of a [`WorkflowVersion`]. Nodes refer to each other only through link ids.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow_version_id: WorkflowVersionId,
    nodes: Vec<WorkflowVersionNode>,
    index: HashMap<WorkflowVersionNodeId, usize>,
    links: BTreeMap<WorkflowVersionNodeLinkId, WorkflowVersionNodeLink>,
    parent_links: Vec<Vec<WorkflowVersionNodeLinkId>>,
    child_links: Vec<Vec<WorkflowVersionNodeLinkId>>,
}

impl WorkflowGraph {
    /// Fails on links to unknown nodes and on cyclic link sets.
    pub fn new(version: &WorkflowVersion) -> Result<Self, WorkflowError> {
        let nodes = version.nodes.clone();
        let index: HashMap<_, _> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.workflow_version_node_id, i))
            .collect();
        let mut parent_links = vec![Vec::new(); nodes.len()];
        let mut child_links = vec![Vec::new(); nodes.len()];
        let mut links = BTreeMap::new();
        for link in &version.links {
            let dangling = |workflow_version_node_id| WorkflowError::DanglingLink {
                link_id: link.link_id,
                workflow_version_node_id,
            };
            let parent = *index
                .get(&link.parent_id)
                .ok_or_else(|| dangling(link.parent_id))?;
            let child = *index
                .get(&link.child_id)
                .ok_or_else(|| dangling(link.child_id))?;
            parent_links[child].push(link.link_id);
            child_links[parent].push(link.link_id);
            links.insert(link.link_id, link.clone());
        }
        let graph = Self {
            workflow_version_id: version.workflow_version_id,
            nodes,
            index,
            links,
            parent_links,
            child_links,
        };
        if graph.has_cycle() {
            return Err(WorkflowError::CycleDetected {
                workflow_version_id: version.workflow_version_id,
            });
        }
        Ok(graph)
    }

    /// Kahn's algorithm: a cycle leaves nodes that never reach in-degree zero.
    fn has_cycle(&self) -> bool {
        let mut in_degree: Vec<usize> = self.parent_links.iter().map(Vec::len).collect();
        let mut ready: Vec<usize> = (0..self.nodes.len())
            .filter(|i| in_degree[*i] == 0)
            .collect();
        let mut visited = 0;
        while let Some(i) = ready.pop() {
            visited += 1;
            for link_id in &self.child_links[i] {
                let child = self.index[&self.links[link_id].child_id];
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(child);
                }
            }
        }
        visited != self.nodes.len()
    }

    pub fn workflow_version_id(&self) -> WorkflowVersionId {
        self.workflow_version_id
    }

    pub fn node(&self, id: WorkflowVersionNodeId) -> Option<&WorkflowVersionNode> {
        self.index.get(&id).map(|i| &self.nodes[*i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowVersionNode> {
        self.nodes.iter()
    }

    pub fn link(&self, link_id: WorkflowVersionNodeLinkId) -> Option<&WorkflowVersionNodeLink> {
        self.links.get(&link_id)
    }

    /// Inbound links of a node, in declaration order.
    pub fn parent_links(
        &self,
        id: WorkflowVersionNodeId,
    ) -> impl Iterator<Item = &WorkflowVersionNodeLink> {
        self.index
            .get(&id)
            .into_iter()
            .flat_map(|i| self.parent_links[*i].iter())
            .filter_map(|link_id| self.links.get(link_id))
    }

    pub fn nodes_in_stage(&self, stage: u32) -> Vec<&WorkflowVersionNode> {
        self.nodes.iter().filter(|node| node.stage == stage).collect()
    }

    pub fn nodes_of_type(&self, node_type: WorkflowNodeType) -> Vec<&WorkflowVersionNode> {
        self.nodes
            .iter()
            .filter(|node| node.node_type == node_type)
            .collect()
    }

    /// Active stage triggers after `stage`, in stage order.
    pub fn stage_triggers_after(&self, stage: u32) -> Vec<&WorkflowVersionNode> {
        let mut triggers: Vec<_> = self
            .nodes
            .iter()
            .filter(|node| {
                node.node_type == WorkflowNodeType::StageTrigger
                    && node.active
                    && node.stage > stage
            })
            .collect();
        triggers.sort_by_key(|node| node.stage);
        triggers
    }

    /// The first parent wired to one of `labels`, trying the labels in order.
    pub fn parent_by_labels<'a>(
        &self,
        id: WorkflowVersionNodeId,
        labels: &[&'a str],
    ) -> Option<(&'a str, &WorkflowVersionNode)> {
        labels.iter().find_map(|label| {
            self.parent_links(id)
                .find(|link| link.child_input == *label)
                .and_then(|link| self.node(link.parent_id))
                .map(|parent| (*label, parent))
        })
    }
}
