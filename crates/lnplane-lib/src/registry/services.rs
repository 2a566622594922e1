use std::{collections::HashMap, sync::RwLock};

use super::{read_lock, write_lock};
use crate::{
    now_timestamp_as_millis_u64,
    supervisor::state_machine::is_permitted,
    types::{Implementation, NodeId, ServiceStatus, ServiceType},
    Error, Result,
};

/// Core services have no node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service_type: ServiceType,
    pub node_id: Option<NodeId>,
}

impl ServiceKey {
    pub fn core(service_type: ServiceType) -> Self {
        Self {
            service_type,
            node_id: None,
        }
    }

    pub fn node(service_type: ServiceType, node_id: NodeId) -> Self {
        Self {
            service_type,
            node_id: Some(node_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub status: ServiceStatus,
    pub previous: Option<ServiceStatus>,
    /// Unix millis of the last transition.
    pub updated_on: u64,
    /// Error or panic message attached to a `Failed` transition.
    pub reason: Option<String>,
}

impl Default for ServiceEntry {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Inactive,
            previous: None,
            updated_on: 0,
            reason: None,
        }
    }
}

/// Per (service type, node) health entries. All transitions go through one lock, which
/// serializes concurrent transitions on the same entry.
#[derive(Debug, Default)]
pub struct ServiceStates {
    entries: RwLock<HashMap<ServiceKey, ServiceEntry>>,
}

impl ServiceStates {
    pub fn get(&self, key: ServiceKey) -> Option<ServiceEntry> {
        read_lock(&self.entries).get(&key).cloned()
    }

    pub fn status(&self, key: ServiceKey) -> ServiceStatus {
        read_lock(&self.entries)
            .get(&key)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    /// Moves an entry to `to`. Returns `Ok(None)` when the entry already has that status and
    /// the updated entry otherwise.
    pub fn transition(
        &self,
        key: ServiceKey,
        to: ServiceStatus,
        reason: Option<String>,
    ) -> Result<Option<ServiceEntry>> {
        let mut entries = write_lock(&self.entries);
        let entry = entries.entry(key).or_default();
        let from = entry.status;
        if from == to {
            return Ok(None);
        }
        if !is_permitted(from, to) {
            return Err(Error::InvalidTransition {
                service_type: key.service_type,
                node_id: key.node_id,
                from,
                to,
            });
        }
        *entry = ServiceEntry {
            status: to,
            previous: Some(from),
            updated_on: now_timestamp_as_millis_u64(),
            reason,
        };
        Ok(Some(entry.clone()))
    }

    pub fn node_entries(&self, node_id: NodeId) -> Vec<(ServiceType, ServiceEntry)> {
        let mut entries: Vec<_> = read_lock(&self.entries)
            .iter()
            .filter(|(key, _)| key.node_id == Some(node_id))
            .map(|(key, entry)| (key.service_type, entry.clone()))
            .collect();
        entries.sort_by_key(|(service_type, _)| service_type.to_string());
        entries
    }

    pub fn all(&self) -> Vec<(ServiceKey, ServiceEntry)> {
        read_lock(&self.entries)
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect()
    }

    pub fn remove_node(&self, node_id: NodeId) {
        write_lock(&self.entries).retain(|key, _| key.node_id != Some(node_id));
    }

    pub fn is_node_ready(&self, node_id: NodeId, implementation: Implementation) -> bool {
        let entries = read_lock(&self.entries);
        ServiceType::readiness_set(implementation)
            .iter()
            .all(|service_type| {
                entries
                    .get(&ServiceKey::node(*service_type, node_id))
                    .is_some_and(|entry| entry.status == ServiceStatus::Active)
            })
    }

    pub fn is_lnd_service_active(&self, node_id: NodeId) -> bool {
        self.is_node_ready(node_id, Implementation::Lnd)
    }

    pub fn is_cln_service_active(&self, node_id: NodeId) -> bool {
        self.is_node_ready(node_id, Implementation::Cln)
    }
}
