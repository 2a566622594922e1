//! Domain types shared by every component of the plane.

mod channel;
mod node;
mod service;

pub use channel::{
    ChannelFlags, ChannelPoint, ChannelSettings, ChannelStatus, ParseIdError, ShortChannelId,
};
pub use node::{
    Chain, ConnectionMaterial, CustomSettings, Implementation, Network, NodeConnectionDetails,
    NodeKey, NodeRole, NodeSettings, PingSystems,
};
pub use service::{ServiceStatus, ServiceType};

use serde::{Deserialize, Serialize};

/// Internal surrogate key of a node (managed or peer).
pub type NodeId = u32;
/// Internal surrogate key of a channel.
pub type ChannelId = u32;
pub type TagId = u32;
pub type WorkflowVersionId = u32;
pub type WorkflowVersionNodeId = u32;

/// Generic lifecycle status used by channel states, tags and command responses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum Status {
    #[default]
    Inactive,
    Active,
    Pending,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: TagId,
    pub name: String,
    pub style: String,
    pub category_id: Option<u32>,
}

/// What a tag is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaggedEntity {
    Channel(ChannelId),
    Node(NodeId),
}

/// A single failed item of a command, e.g. one channel of a routing-policy update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailedRequest {
    pub reason: String,
    pub error: String,
}
