//! One RPC transport per managed node, shared by subscribers and command handlers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use tracing::{debug, info};

use crate::{
    backend::{BackendError, ClnClient, LndClient},
    registry::{read_lock, write_lock, Registry},
    types::{ConnectionMaterial, NodeId},
    Error, Result,
};

/// Dials a node. The pool never retries a failed dial; errors go back to the caller.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: ?Sized + Send + Sync + 'static;

    async fn connect(
        &self,
        node_id: NodeId,
        material: &ConnectionMaterial,
    ) -> std::result::Result<Arc<Self::Client>, BackendError>;

    /// Called with the replaced transport after a newer one has been swapped in.
    async fn close(&self, _node_id: NodeId, _client: Arc<Self::Client>) {}
}

struct CachedConnection<T: ?Sized> {
    material: ConnectionMaterial,
    client: Arc<T>,
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    registry: Arc<Registry>,
    connections: RwLock<HashMap<NodeId, CachedConnection<C::Client>>>,
    dial_locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, registry: Arc<Registry>) -> Self {
        Self {
            connector,
            registry,
            connections: RwLock::new(HashMap::new()),
            dial_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, node_id: NodeId, material: &ConnectionMaterial) -> Option<Arc<C::Client>> {
        read_lock(&self.connections)
            .get(&node_id)
            .filter(|cached| cached.material == *material)
            .map(|cached| cached.client.clone())
    }

    fn dial_lock(&self, node_id: NodeId) -> Arc<tokio::sync::Mutex<()>> {
        self.dial_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node_id)
            .or_default()
            .clone()
    }

    /// Returns the node's transport, dialing a new one when the registered connection
    /// material differs from the material the cached transport was built with.
    pub async fn acquire(&self, node_id: NodeId) -> Result<Arc<C::Client>> {
        let details = self
            .registry
            .get_connection_details(node_id)
            .ok_or(Error::NodeNotFound(node_id))?;
        if let Some(client) = self.cached(node_id, &details.material) {
            return Ok(client);
        }

        let lock = self.dial_lock(node_id);
        let _guard = lock.lock().await;
        // Another caller may have dialed while we waited.
        if let Some(client) = self.cached(node_id, &details.material) {
            return Ok(client);
        }

        debug!(node_id, endpoint = %details.material.endpoint, "dialing node");
        let client = self.connector.connect(node_id, &details.material).await?;
        let previous = write_lock(&self.connections).insert(
            node_id,
            CachedConnection {
                material: details.material,
                client: client.clone(),
            },
        );
        if let Some(previous) = previous {
            info!(node_id, "connection material changed, closing previous connection");
            self.connector.close(node_id, previous.client).await;
        }
        Ok(client)
    }

    /// Drops and closes the cached transport of a node, e.g. when it is deactivated.
    pub async fn remove(&self, node_id: NodeId) {
        let previous = write_lock(&self.connections).remove(&node_id);
        if let Some(previous) = previous {
            self.connector.close(node_id, previous.client).await;
        }
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        read_lock(&self.connections).contains_key(&node_id)
    }
}

/// Hands out the transport of a node. Implemented by [`ConnectionPool`]; tests provide
/// in-memory clients.
#[async_trait::async_trait]
pub trait ClientProvider<T: ?Sized + Send + Sync + 'static>: Send + Sync + 'static {
    async fn acquire(&self, node_id: NodeId) -> Result<Arc<T>>;
}

#[async_trait::async_trait]
impl<C: Connector> ClientProvider<C::Client> for ConnectionPool<C> {
    async fn acquire(&self, node_id: NodeId) -> Result<Arc<C::Client>> {
        ConnectionPool::acquire(self, node_id).await
    }
}

/// The transports of both daemon families.
#[derive(Clone)]
pub struct Clients {
    pub lnd: Arc<dyn ClientProvider<dyn LndClient>>,
    pub cln: Arc<dyn ClientProvider<dyn ClnClient>>,
}

impl Clients {
    pub fn new(
        lnd: Arc<dyn ClientProvider<dyn LndClient>>,
        cln: Arc<dyn ClientProvider<dyn ClnClient>>,
    ) -> Self {
        Self { lnd, cln }
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}
