use ractor::SpawnErr;
use thiserror::Error;

use crate::{
    backend::BackendError,
    types::{ChannelId, NodeId, ServiceStatus, ServiceType},
    workflow::WorkflowError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Store(String),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Service is not active for node {0}")]
    ServiceInactive(NodeId),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Invalid transition of {service_type} for node {node_id:?}: {from} -> {to}")]
    InvalidTransition {
        service_type: ServiceType,
        node_id: Option<NodeId>,
        from: ServiceStatus,
        to: ServiceStatus,
    },
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("Rebalance error: {0}")]
    Rebalance(String),
    #[error("Operation timed out")]
    Timeout,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Panicked: {0}")]
    Panicked(String),
    #[error("Failed to spawn actor: {0}")]
    SpawnErr(#[from] SpawnErr),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    InternalError(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
